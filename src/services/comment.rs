use chrono::Utc;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, info};

use crate::{
    error::{AppError, Result},
    models::{
        blog::Blog,
        comment::{Comment, CommentNode},
        notification::{NotificationDraft, NotificationType},
        user::UserSummary,
    },
    services::{
        database::{Database, Mutation, SetField},
        notification::NotificationService,
    },
};

enum Frame {
    Enter(String),
    Exit(Comment),
}

/// 评论树维护
#[derive(Clone)]
pub struct CommentService {
    db: Arc<dyn Database>,
    notifications: NotificationService,
    max_length: usize,
}

impl CommentService {
    pub fn new(db: Arc<dyn Database>, notifications: NotificationService, max_length: usize) -> Self {
        Self {
            db,
            notifications,
            max_length,
        }
    }

    fn validate_text(&self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::validation("Please enter the comment"));
        }
        if text.chars().count() > self.max_length {
            return Err(AppError::Validation(format!(
                "Comment must be at most {} characters",
                self.max_length
            )));
        }
        Ok(text.to_string())
    }

    async fn author_name(&self, user_id: &str) -> Result<String> {
        self.db
            .get_user(user_id)
            .await?
            .map(|u| u.name)
            .ok_or_else(|| AppError::not_found("User"))
    }

    pub async fn add_comment(&self, user_id: &str, blog_id: &str, text: &str) -> Result<Comment> {
        let text = self.validate_text(text)?;
        let blog = self
            .db
            .get_blog(blog_id)
            .await?
            .ok_or_else(|| AppError::not_found("Blog"))?;
        let author = self.author_name(user_id).await?;

        let comment = Comment::new(blog_id, user_id, &text, None);
        self.db.apply(Mutation::PutComment(comment.clone())).await?;
        self.db
            .apply(Mutation::AddToSet {
                field: SetField::BlogComments,
                id: blog_id.to_string(),
                value: comment.id.clone(),
            })
            .await?;

        self.notifications
            .dispatch(
                NotificationDraft::new(
                    &blog.creator,
                    user_id,
                    NotificationType::Comment,
                    format!("{} commented on your blog", author),
                )
                .with_blog(blog_id)
                .with_comment(&comment.id),
            )
            .await;

        info!("Comment {} added to blog {}", comment.id, blog_id);
        Ok(comment)
    }

    pub async fn add_reply(&self, user_id: &str, parent_id: &str, blog_id: &str, text: &str) -> Result<Comment> {
        let text = self.validate_text(text)?;
        let parent = self
            .db
            .get_comment(parent_id)
            .await?
            .ok_or_else(|| AppError::not_found("Parent comment"))?;
        if self.db.get_blog(blog_id).await?.is_none() {
            return Err(AppError::not_found("Blog"));
        }
        if parent.blog != blog_id {
            return Err(AppError::bad_request("Parent comment belongs to another blog"));
        }
        let author = self.author_name(user_id).await?;

        let reply = Comment::new(blog_id, user_id, &text, Some(parent_id));
        self.db.apply(Mutation::PutComment(reply.clone())).await?;
        self.db
            .apply(Mutation::AddToSet {
                field: SetField::CommentReplies,
                id: parent_id.to_string(),
                value: reply.id.clone(),
            })
            .await?;

        self.notifications
            .dispatch(
                NotificationDraft::new(
                    &parent.user,
                    user_id,
                    NotificationType::Reply,
                    format!("{} replied to your comment", author),
                )
                .with_blog(blog_id)
                .with_comment(parent_id),
            )
            .await;

        info!("Reply {} added under comment {}", reply.id, parent_id);
        Ok(reply)
    }

    pub async fn edit_comment(&self, user_id: &str, comment_id: &str, text: &str) -> Result<Comment> {
        let text = self.validate_text(text)?;
        let mut comment = self
            .db
            .get_comment(comment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Comment"))?;
        if comment.user != user_id {
            return Err(AppError::forbidden("You are not authorized to edit this comment"));
        }

        comment.comment = text;
        comment.updated_at = Utc::now();
        self.db.apply(Mutation::PutComment(comment.clone())).await?;
        Ok(comment)
    }

    /// Author or blog creator. Returns the number of records removed.
    pub async fn delete_comment(&self, user_id: &str, comment_id: &str) -> Result<usize> {
        let comment = self
            .db
            .get_comment(comment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Comment"))?;

        if comment.user != user_id {
            let blog_creator = self.db.get_blog(&comment.blog).await?.map(|b| b.creator);
            if blog_creator.as_deref() != Some(user_id) {
                return Err(AppError::forbidden("You are not authorized to delete this comment"));
            }
        }

        self.delete_subtree(comment_id).await
    }

    /// Deletes a comment and all its replies, children first.
    ///
    /// Each node leaves its parent's `replies` before it is removed. Once the
    /// traversal is done the root id is pulled from its blog's comment list.
    /// A missing root removes nothing.
    pub async fn delete_subtree(&self, root_id: &str) -> Result<usize> {
        let root = match self.db.get_comment(root_id).await? {
            Some(root) => root,
            None => return Ok(0),
        };

        let mut removed = 0;
        let mut stack = vec![Frame::Enter(root_id.to_string())];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    if let Some(node) = self.db.get_comment(&id).await? {
                        let children = node.replies.clone();
                        stack.push(Frame::Exit(node));
                        stack.extend(children.into_iter().rev().map(Frame::Enter));
                    }
                }
                Frame::Exit(node) => {
                    if let Some(parent) = &node.parent_comment {
                        self.db
                            .apply(Mutation::PullFromSet {
                                field: SetField::CommentReplies,
                                id: parent.clone(),
                                value: node.id.clone(),
                            })
                            .await?;
                    }
                    self.db.apply(Mutation::DeleteComment(node.id.clone())).await?;
                    removed += 1;
                }
            }
        }

        self.db
            .apply(Mutation::PullFromSet {
                field: SetField::BlogComments,
                id: root.blog.clone(),
                value: root_id.to_string(),
            })
            .await?;

        debug!("Deleted comment {} with {} records", root_id, removed);
        Ok(removed)
    }

    /// Top-level comments of the blog with replies nested.
    pub async fn comment_tree(&self, blog: &Blog) -> Result<Vec<CommentNode>> {
        let arena: HashMap<String, Comment> = self
            .db
            .comments_for_blog(&blog.id)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut author_ids: Vec<String> = arena.values().map(|c| c.user.clone()).collect();
        author_ids.sort();
        author_ids.dedup();
        let authors: HashMap<String, UserSummary> = self
            .db
            .get_users(&author_ids)
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u.summary()))
            .collect();

        let mut seen = HashSet::new();
        Ok(blog
            .comments
            .iter()
            .filter_map(|id| render(id, &arena, &authors, &mut seen))
            .collect())
    }
}

fn render(
    id: &str,
    arena: &HashMap<String, Comment>,
    authors: &HashMap<String, UserSummary>,
    seen: &mut HashSet<String>,
) -> Option<CommentNode> {
    if !seen.insert(id.to_string()) {
        return None;
    }
    let comment = arena.get(id)?;
    let replies = comment
        .replies
        .iter()
        .filter_map(|child| render(child, arena, authors, seen))
        .collect();

    Some(CommentNode {
        id: comment.id.clone(),
        blog: comment.blog.clone(),
        user: authors.get(&comment.user).cloned(),
        comment: comment.comment.clone(),
        parent_comment: comment.parent_comment.clone(),
        likes: comment.likes.clone(),
        replies,
        created_at: comment.created_at,
        updated_at: comment.updated_at,
    })
}
