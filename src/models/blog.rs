use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{
    comment::CommentNode,
    content::ContentDocument,
    user::{UploadedFile, UserSummary},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blog {
    pub id: String,
    pub creator: String,
    pub title: String,
    pub description: String,
    pub content: ContentDocument,
    pub draft: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub likes: BTreeSet<String>,
    #[serde(default)]
    pub total_saves: BTreeSet<String>,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
    /// 本服务为正文上传的图片 id，只有这些会被删除
    #[serde(default)]
    pub embedded_image_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Blog {
    pub fn is_published(&self) -> bool {
        !self.draft
    }

    /// Assets this blog owns: the cover plus the embedded images uploaded
    /// for it. Ids quoted in the content but never uploaded here are not
    /// included.
    pub fn asset_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.image_id.iter().cloned().collect();
        ids.extend(self.embedded_image_ids.iter().cloned());
        ids
    }
}

/// 列表/搜索条件，只返回已发布的博客
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlogFilter {
    Published,
    /// Case-insensitive substring of title or description.
    Text(String),
    /// Exact tag match.
    Tag(String),
}

impl BlogFilter {
    pub fn matches(&self, blog: &Blog) -> bool {
        if blog.draft {
            return false;
        }
        match self {
            BlogFilter::Published => true,
            BlogFilter::Text(text) => {
                let needle = text.to_lowercase();
                blog.title.to_lowercase().contains(&needle)
                    || blog.description.to_lowercase().contains(&needle)
            }
            BlogFilter::Tag(tag) => blog.tags.contains(tag),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogCard {
    #[serde(flatten)]
    pub blog: Blog,
    pub author: Option<UserSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPage {
    pub blogs: Vec<BlogCard>,
    pub has_more: bool,
    pub total: u64,
}

/// 博客详情：服务端已经把评论树展开
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogDetail {
    #[serde(flatten)]
    pub blog: Blog,
    pub author: Option<UserSummary>,
    pub comment_tree: Vec<CommentNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
    pub tag: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// Parsed multipart body of a blog create request.
#[derive(Debug, Clone, Default)]
pub struct CreateBlogInput {
    pub title: String,
    pub description: String,
    pub content: Option<ContentDocument>,
    pub draft: bool,
    pub tags: BTreeSet<String>,
    pub cover: Option<UploadedFile>,
    /// Embedded image files keyed by the block's `uploadToken`.
    pub images: BTreeMap<String, UploadedFile>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateBlogInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<ContentDocument>,
    pub draft: Option<bool>,
    pub tags: Option<BTreeSet<String>>,
    pub cover: Option<UploadedFile>,
    pub images: BTreeMap<String, UploadedFile>,
}
