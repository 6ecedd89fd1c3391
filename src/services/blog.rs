use chrono::Utc;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        blog::{Blog, BlogCard, BlogDetail, BlogFilter, BlogPage, CreateBlogInput, SearchQuery, UpdateBlogInput},
        content::ContentDocument,
        notification::{NotificationDraft, NotificationType},
        user::{UploadedFile, User},
    },
    services::{
        comment::CommentService,
        database::{Database, Mutation, SetField},
        media::{release_assets, ImageStore},
        notification::NotificationService,
    },
    utils::{
        slug::blog_id,
        validation::{normalize_tags, require_non_empty},
    },
};

/// 博客发布、编辑、删除和列表
#[derive(Clone)]
pub struct BlogService {
    db: Arc<dyn Database>,
    images: Arc<dyn ImageStore>,
    notifications: NotificationService,
    comments: CommentService,
    default_limit: u64,
    max_limit: u64,
}

impl BlogService {
    pub fn new(
        db: Arc<dyn Database>,
        images: Arc<dyn ImageStore>,
        notifications: NotificationService,
        comments: CommentService,
        config: &Config,
    ) -> Self {
        Self {
            db,
            images,
            notifications,
            comments,
            default_limit: config.default_blogs_per_page.max(1) as u64,
            max_limit: config.max_blogs_per_page.max(1) as u64,
        }
    }

    async fn user(&self, id: &str) -> Result<User> {
        self.db
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))
    }

    async fn owned_blog(&self, user_id: &str, blog_id: &str) -> Result<Blog> {
        let blog = self
            .db
            .get_blog(blog_id)
            .await?
            .ok_or_else(|| AppError::not_found("Blog"))?;
        if blog.creator != user_id {
            return Err(AppError::forbidden("You are not authorized for this action"));
        }
        Ok(blog)
    }

    /// Uploads the file of every image block that still carries an upload
    /// token and rewrites the block. Asset ids land in `uploaded` as they
    /// are created so the caller can release them on failure.
    async fn upload_embedded(
        &self,
        content: &mut ContentDocument,
        files: &BTreeMap<String, UploadedFile>,
        uploaded: &mut Vec<String>,
    ) -> Result<()> {
        for block in content.blocks_mut() {
            let token = match block.upload_token() {
                Some(token) => token.to_string(),
                None => continue,
            };
            let file = files
                .get(&token)
                .ok_or_else(|| AppError::BadRequest(format!("No image uploaded for token {}", token)))?;
            let image = self.images.upload(file.bytes.clone(), &file.file_name).await?;
            uploaded.push(image.asset_id.clone());
            block.set_uploaded(&image.url, &image.asset_id);
        }
        Ok(())
    }

    async fn fan_out_to_followers(&self, author: &User, blog: &Blog, message: String) -> usize {
        let drafts: Vec<NotificationDraft> = author
            .followers
            .iter()
            .map(|follower| {
                NotificationDraft::new(follower, &author.id, NotificationType::Custom, message.clone())
                    .with_blog(&blog.id)
            })
            .collect();
        let sent = self.notifications.fan_out(drafts).await;
        debug!("Blog {} fanned out to {} followers", blog.id, sent);
        sent
    }

    pub async fn create(&self, user_id: &str, input: CreateBlogInput) -> Result<Blog> {
        require_non_empty(&input.title, "title")?;
        require_non_empty(&input.description, "description")?;
        if input.content.is_none() {
            return Err(AppError::validation("Please enter the content"));
        }
        if input.cover.is_none() {
            return Err(AppError::validation("Please select the image"));
        }
        let author = self.user(user_id).await?;

        let mut uploaded = Vec::new();
        let blog = match self.store_new(&author, input, &mut uploaded).await {
            Ok(blog) => blog,
            Err(e) => {
                release_assets(self.images.as_ref(), &uploaded).await;
                return Err(e);
            }
        };

        if blog.is_published() {
            self.fan_out_to_followers(&author, &blog, format!("{} posted a new blog", author.name))
                .await;
        }

        info!("Blog {} created by {} (draft: {})", blog.id, user_id, blog.draft);
        Ok(blog)
    }

    async fn store_new(&self, author: &User, input: CreateBlogInput, uploaded: &mut Vec<String>) -> Result<Blog> {
        let mut content = input.content.unwrap_or_default();
        let first_new = uploaded.len();
        self.upload_embedded(&mut content, &input.images, uploaded).await?;
        let embedded_image_ids = claim_embedded(&mut content, &BTreeSet::new(), &uploaded[first_new..]);

        let (image, image_id) = match &input.cover {
            Some(cover) => {
                let image = self.images.upload(cover.bytes.clone(), &cover.file_name).await?;
                uploaded.push(image.asset_id.clone());
                (Some(image.url), Some(image.asset_id))
            }
            None => (None, None),
        };

        let now = Utc::now();
        let blog = Blog {
            id: blog_id(&input.title),
            creator: author.id.clone(),
            title: input.title.trim().to_string(),
            description: input.description.trim().to_string(),
            content,
            draft: input.draft,
            tags: normalize_tags(&input.tags),
            likes: Default::default(),
            total_saves: Default::default(),
            comments: Vec::new(),
            image,
            image_id,
            embedded_image_ids,
            created_at: now,
            updated_at: now,
        };

        self.db.apply(Mutation::PutBlog(blog.clone())).await?;
        self.db
            .apply(Mutation::AddToSet {
                field: SetField::UserBlogs,
                id: author.id.clone(),
                value: blog.id.clone(),
            })
            .await?;
        Ok(blog)
    }

    /// Replaced assets are released only after the new version is stored,
    /// so a failed write never leaves the blog pointing at a deleted image.
    pub async fn update(&self, user_id: &str, blog_id: &str, input: UpdateBlogInput) -> Result<Blog> {
        let current = self.owned_blog(user_id, blog_id).await?;
        let author = self.user(user_id).await?;

        let mut uploaded = Vec::new();
        let updated = match self.store_update(&current, input, &mut uploaded).await {
            Ok(blog) => blog,
            Err(e) => {
                release_assets(self.images.as_ref(), &uploaded).await;
                return Err(e);
            }
        };

        let mut stale: Vec<String> = Vec::new();
        if current.image_id != updated.image_id {
            stale.extend(current.image_id.iter().cloned());
        }
        stale.extend(
            current
                .embedded_image_ids
                .difference(&updated.embedded_image_ids)
                .cloned(),
        );
        release_assets(self.images.as_ref(), &stale).await;

        if updated.is_published() {
            self.fan_out_to_followers(
                &author,
                &updated,
                format!("{} updated their blog: {}", author.name, updated.title),
            )
            .await;
        }

        info!("Blog {} updated by {}", blog_id, user_id);
        Ok(updated)
    }

    async fn store_update(&self, current: &Blog, input: UpdateBlogInput, uploaded: &mut Vec<String>) -> Result<Blog> {
        let mut blog = current.clone();

        if let Some(title) = input.title {
            require_non_empty(&title, "title")?;
            blog.title = title.trim().to_string();
        }
        if let Some(description) = input.description {
            require_non_empty(&description, "description")?;
            blog.description = description.trim().to_string();
        }
        if let Some(tags) = input.tags {
            blog.tags = normalize_tags(&tags);
        }
        if let Some(draft) = input.draft {
            blog.draft = draft;
        }
        if let Some(mut content) = input.content {
            let first_new = uploaded.len();
            self.upload_embedded(&mut content, &input.images, uploaded).await?;
            blog.embedded_image_ids =
                claim_embedded(&mut content, &current.embedded_image_ids, &uploaded[first_new..]);
            blog.content = content;
        }
        if let Some(cover) = input.cover {
            let image = self.images.upload(cover.bytes, &cover.file_name).await?;
            uploaded.push(image.asset_id.clone());
            blog.image = Some(image.url);
            blog.image_id = Some(image.asset_id);
        }

        blog.updated_at = Utc::now();
        self.db.apply(Mutation::PutBlog(blog.clone())).await?;
        Ok(blog)
    }

    pub async fn delete(&self, user_id: &str, blog_id: &str) -> Result<()> {
        let blog = self.owned_blog(user_id, blog_id).await?;
        self.purge(&blog).await?;
        info!("Blog {} deleted by {}", blog_id, user_id);
        Ok(())
    }

    /// Removes a blog with its images, comment trees and every reference to
    /// it. Returns the number of comments removed.
    pub async fn purge(&self, blog: &Blog) -> Result<usize> {
        release_assets(self.images.as_ref(), &blog.asset_ids()).await;

        let mut removed = 0;
        for comment_id in &blog.comments {
            removed += self.comments.delete_subtree(comment_id).await?;
        }
        for stray in self.db.comments_for_blog(&blog.id).await? {
            warn!("Removing unlinked comment {} of blog {}", stray.id, blog.id);
            self.db.apply(Mutation::DeleteComment(stray.id)).await?;
            removed += 1;
        }

        self.db.apply(Mutation::DeleteBlog(blog.id.clone())).await?;
        self.db
            .apply(Mutation::PullFromSet {
                field: SetField::UserBlogs,
                id: blog.creator.clone(),
                value: blog.id.clone(),
            })
            .await?;
        for field in [SetField::UserLikedBlogs, SetField::UserSavedBlogs] {
            self.db
                .apply(Mutation::PullEverywhere {
                    field,
                    value: blog.id.clone(),
                })
                .await?;
        }

        debug!("Purged blog {} and {} comments", blog.id, removed);
        Ok(removed)
    }

    /// Drafts are only visible to their creator.
    pub async fn get(&self, blog_id: &str, viewer: Option<&str>) -> Result<BlogDetail> {
        let blog = self
            .db
            .get_blog(blog_id)
            .await?
            .filter(|b| b.is_published() || viewer == Some(b.creator.as_str()))
            .ok_or_else(|| AppError::not_found("Blog"))?;

        let author = self.db.get_user(&blog.creator).await?.map(|u| u.summary());
        let comment_tree = self.comments.comment_tree(&blog).await?;
        Ok(BlogDetail {
            blog,
            author,
            comment_tree,
        })
    }

    fn window(&self, page: Option<u64>, limit: Option<u64>) -> (u64, u64) {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(self.default_limit).clamp(1, self.max_limit);
        // 超大页码返回空页
        let skip = (page - 1).saturating_mul(limit).min(i64::MAX as u64);
        (skip, limit)
    }

    async fn page(&self, filter: BlogFilter, page: Option<u64>, limit: Option<u64>) -> Result<BlogPage> {
        let (skip, limit) = self.window(page, limit);
        let (blogs, total) = self.db.list_blogs(&filter, skip, limit).await?;

        let mut creator_ids: Vec<String> = blogs.iter().map(|b| b.creator.clone()).collect();
        creator_ids.sort();
        creator_ids.dedup();
        let authors: HashMap<String, _> = self
            .db
            .get_users(&creator_ids)
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u.summary()))
            .collect();

        let blogs = blogs
            .into_iter()
            .map(|blog| {
                let author = authors.get(&blog.creator).cloned();
                BlogCard { blog, author }
            })
            .collect();

        Ok(BlogPage {
            blogs,
            has_more: skip.saturating_add(limit) < total,
            total,
        })
    }

    pub async fn list(&self, page: Option<u64>, limit: Option<u64>) -> Result<BlogPage> {
        self.page(BlogFilter::Published, page, limit).await
    }

    pub async fn search(&self, query: SearchQuery) -> Result<BlogPage> {
        let text = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let tag = query.tag.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let filter = match (text, tag) {
            (Some(text), _) => BlogFilter::Text(text.to_string()),
            (None, Some(tag)) => BlogFilter::Tag(tag.to_lowercase()),
            (None, None) => return Err(AppError::bad_request("Please provide a search query or tag")),
        };
        self.page(filter, query.page, query.limit).await
    }
}

/// Keeps only the image ids this blog owns: those it already had and those
/// just uploaded for it. Client-supplied ids for anything else are dropped.
fn claim_embedded(content: &mut ContentDocument, owned: &BTreeSet<String>, fresh: &[String]) -> BTreeSet<String> {
    let allowed: BTreeSet<String> = owned.iter().chain(fresh).cloned().collect();
    let dropped = content.retain_image_ids(&allowed);
    if dropped > 0 {
        warn!("Dropped {} image ids not owned by the blog", dropped);
    }
    content.image_ids()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::notification::Notification,
        services::{
            media::{MockImageStore, UploadedImage},
            memory_store::MemoryDatabase,
            realtime::NullNotifier,
        },
        test_support::{sample_content, seed_blog, seed_comment, seed_user},
    };
    use mockall::predicate::eq;
    use serde_json::json;

    fn file(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    /// Hands out `img-1`, `img-2`, ... and accepts every delete.
    fn counting_store() -> MockImageStore {
        let mut store = MockImageStore::new();
        let mut n = 0;
        store.expect_upload().returning(move |_, _| {
            n += 1;
            Ok(UploadedImage {
                url: format!("https://cdn/img-{}", n),
                asset_id: format!("img-{}", n),
            })
        });
        store.expect_delete().returning(|_| Ok(()));
        store
    }

    fn service(db: Arc<MemoryDatabase>, store: MockImageStore) -> BlogService {
        let config = Config::default();
        let notifications = NotificationService::new(db.clone(), Arc::new(NullNotifier));
        let comments = CommentService::new(db.clone(), notifications.clone(), config.max_comment_length);
        BlogService::new(db, Arc::new(store), notifications, comments, &config)
    }

    fn input(title: &str, draft: bool) -> CreateBlogInput {
        CreateBlogInput {
            title: title.to_string(),
            description: "desc".to_string(),
            content: Some(sample_content()),
            draft,
            cover: Some(file("cover.png")),
            ..Default::default()
        }
    }

    async fn follow(db: &MemoryDatabase, follower: &str, author: &str) {
        db.apply(Mutation::AddToSet {
            field: SetField::UserFollowers,
            id: author.to_string(),
            value: follower.to_string(),
        })
        .await
        .unwrap();
    }

    async fn inbox(db: &MemoryDatabase, user: &str) -> Vec<Notification> {
        db.list_notifications(user).await.unwrap()
    }

    #[tokio::test]
    async fn publishing_without_followers_notifies_nobody() {
        let db = Arc::new(MemoryDatabase::new());
        let svc = service(db.clone(), counting_store());
        let author = seed_user(db.as_ref(), "author").await;

        let blog = svc.create(&author.id, input("First", false)).await.unwrap();
        assert_eq!(blog.image_id.as_deref(), Some("img-1"));

        for user in db.list_users().await.unwrap() {
            assert!(inbox(&db, &user.id).await.is_empty());
        }
        let author = db.get_user(&author.id).await.unwrap().unwrap();
        assert_eq!(author.blogs, vec![blog.id]);
    }

    #[tokio::test]
    async fn publishing_notifies_each_follower_once() {
        let db = Arc::new(MemoryDatabase::new());
        let svc = service(db.clone(), counting_store());
        let author = seed_user(db.as_ref(), "author").await;
        let mut followers = Vec::new();
        for name in ["f1", "f2", "f3"] {
            let f = seed_user(db.as_ref(), name).await;
            follow(&db, &f.id, &author.id).await;
            followers.push(f.id);
        }

        let blog = svc.create(&author.id, input("Hello", false)).await.unwrap();

        for follower in &followers {
            let notes = inbox(&db, follower).await;
            assert_eq!(notes.len(), 1);
            assert_eq!(notes[0].kind, NotificationType::Custom);
            assert_eq!(notes[0].blog.as_deref(), Some(blog.id.as_str()));
            assert_eq!(notes[0].message, "author posted a new blog");
        }
    }

    #[tokio::test]
    async fn drafts_stay_quiet_until_published_by_edit() {
        let db = Arc::new(MemoryDatabase::new());
        let svc = service(db.clone(), counting_store());
        let author = seed_user(db.as_ref(), "author").await;
        let reader = seed_user(db.as_ref(), "reader").await;
        follow(&db, &reader.id, &author.id).await;

        let blog = svc.create(&author.id, input("Draft", true)).await.unwrap();
        assert!(inbox(&db, &reader.id).await.is_empty());
        assert!(svc.get(&blog.id, None).await.is_err());
        assert!(svc.get(&blog.id, Some(&author.id)).await.is_ok());

        let edit = UpdateBlogInput {
            draft: Some(false),
            ..Default::default()
        };
        svc.update(&author.id, &blog.id, edit).await.unwrap();
        let notes = inbox(&db, &reader.id).await;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].message, "author updated their blog: Draft");
    }

    #[tokio::test]
    async fn pagination_windows() {
        let db = Arc::new(MemoryDatabase::new());
        let svc = service(db.clone(), counting_store());
        let author = seed_user(db.as_ref(), "author").await;
        for i in 0..10 {
            seed_blog(db.as_ref(), &author.id, &format!("Post {}", i), false).await;
        }
        seed_blog(db.as_ref(), &author.id, "Hidden", true).await;

        let first = svc.list(Some(1), Some(4)).await.unwrap();
        assert_eq!(first.blogs.len(), 4);
        assert!(first.has_more);
        assert_eq!(first.total, 10);

        let last = svc.list(Some(3), Some(4)).await.unwrap();
        assert_eq!(last.blogs.len(), 2);
        assert!(!last.has_more);
        assert!(last.blogs.iter().all(|c| c.author.is_some()));
    }

    #[tokio::test]
    async fn search_by_text_or_tag() {
        let db = Arc::new(MemoryDatabase::new());
        let svc = service(db.clone(), counting_store());
        let author = seed_user(db.as_ref(), "author").await;

        let mut tagged = input("Borrow checker notes", false);
        tagged.tags = ["Rust".to_string()].into_iter().collect();
        svc.create(&author.id, tagged).await.unwrap();
        svc.create(&author.id, input("Gardening", false)).await.unwrap();

        let by_text = svc
            .search(SearchQuery {
                search: Some("BORROW".to_string()),
                tag: None,
                page: None,
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(by_text.total, 1);

        let by_tag = svc
            .search(SearchQuery {
                search: None,
                tag: Some("rust".to_string()),
                page: None,
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(by_tag.blogs[0].blog.title, "Borrow checker notes");

        assert!(svc
            .search(SearchQuery {
                search: Some("  ".to_string()),
                tag: None,
                page: None,
                limit: None,
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn embedded_images_are_matched_by_token() {
        let db = Arc::new(MemoryDatabase::new());
        let svc = service(db.clone(), counting_store());
        let author = seed_user(db.as_ref(), "author").await;

        let mut create = input("Gallery", false);
        create.content = Some(
            serde_json::from_value(json!({
                "blocks": [
                    { "type": "image", "data": { "file": { "uploadToken": "second" } } },
                    { "type": "paragraph", "data": { "text": "between" } },
                    { "type": "image", "data": { "file": { "uploadToken": "first" } } }
                ]
            }))
            .unwrap(),
        );
        create.images.insert("first".to_string(), file("a.png"));
        create.images.insert("second".to_string(), file("b.png"));

        let blog = svc.create(&author.id, create).await.unwrap();
        assert!(blog.content.upload_tokens().is_empty());
        assert_eq!(blog.content.image_ids().len(), 2);
        assert_eq!(blog.asset_ids().len(), 3);
    }

    #[tokio::test]
    async fn missing_file_for_token_releases_earlier_uploads() {
        let db = Arc::new(MemoryDatabase::new());
        let mut store = MockImageStore::new();
        store.expect_upload().times(1).returning(|_, _| {
            Ok(UploadedImage {
                url: "https://cdn/one".to_string(),
                asset_id: "one".to_string(),
            })
        });
        store.expect_delete().with(eq("one")).times(1).returning(|_| Ok(()));
        let svc = service(db.clone(), store);
        let author = seed_user(db.as_ref(), "author").await;

        let mut create = input("Broken", false);
        create.content = Some(
            serde_json::from_value(json!({
                "blocks": [
                    { "type": "image", "data": { "file": { "uploadToken": "ok" } } },
                    { "type": "image", "data": { "file": { "uploadToken": "missing" } } }
                ]
            }))
            .unwrap(),
        );
        create.images.insert("ok".to_string(), file("ok.png"));

        let result = svc.create(&author.id, create).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(db.list_blogs(&BlogFilter::Published, 0, 10).await.unwrap().1, 0);
    }

    #[tokio::test]
    async fn cover_upload_failure_fails_the_write() {
        let db = Arc::new(MemoryDatabase::new());
        let mut store = MockImageStore::new();
        store
            .expect_upload()
            .returning(|_, _| Err(AppError::FileUpload("cdn down".to_string())));
        let svc = service(db.clone(), store);
        let author = seed_user(db.as_ref(), "author").await;

        let result = svc.create(&author.id, input("Nope", false)).await;
        assert!(matches!(result, Err(AppError::FileUpload(_))));
        let author = db.get_user(&author.id).await.unwrap().unwrap();
        assert!(author.blogs.is_empty());
    }

    #[tokio::test]
    async fn replacing_the_cover_deletes_the_old_asset() {
        let db = Arc::new(MemoryDatabase::new());
        let mut store = MockImageStore::new();
        let mut n = 0;
        store.expect_upload().times(2).returning(move |_, _| {
            n += 1;
            Ok(UploadedImage {
                url: format!("https://cdn/cover-{}", n),
                asset_id: format!("cover-{}", n),
            })
        });
        store.expect_delete().with(eq("cover-1")).times(1).returning(|_| Ok(()));
        let svc = service(db.clone(), store);
        let author = seed_user(db.as_ref(), "author").await;

        let blog = svc.create(&author.id, input("Covered", true)).await.unwrap();
        let edit = UpdateBlogInput {
            cover: Some(file("new.png")),
            ..Default::default()
        };
        let updated = svc.update(&author.id, &blog.id, edit).await.unwrap();
        assert_eq!(updated.image_id.as_deref(), Some("cover-2"));
    }

    #[tokio::test]
    async fn only_the_creator_edits_or_deletes() {
        let db = Arc::new(MemoryDatabase::new());
        let svc = service(db.clone(), counting_store());
        let author = seed_user(db.as_ref(), "author").await;
        let other = seed_user(db.as_ref(), "other").await;
        let blog = seed_blog(db.as_ref(), &author.id, "Mine", false).await;

        assert!(matches!(
            svc.update(&other.id, &blog.id, UpdateBlogInput::default()).await,
            Err(AppError::Authorization(_))
        ));
        assert!(matches!(
            svc.delete(&other.id, &blog.id).await,
            Err(AppError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn deleting_a_blog_cascades() {
        let db = Arc::new(MemoryDatabase::new());
        let svc = service(db.clone(), counting_store());
        let author = seed_user(db.as_ref(), "author").await;
        let reader = seed_user(db.as_ref(), "reader").await;
        let blog = seed_blog(db.as_ref(), &author.id, "Doomed", false).await;
        let root = seed_comment(db.as_ref(), &blog.id, &reader.id, None).await;
        seed_comment(db.as_ref(), &blog.id, &author.id, Some(&root.id)).await;
        for field in [SetField::UserLikedBlogs, SetField::UserSavedBlogs] {
            db.apply(Mutation::AddToSet {
                field,
                id: reader.id.clone(),
                value: blog.id.clone(),
            })
            .await
            .unwrap();
        }

        svc.delete(&author.id, &blog.id).await.unwrap();

        assert!(db.get_blog(&blog.id).await.unwrap().is_none());
        assert!(db.comments_for_blog(&blog.id).await.unwrap().is_empty());
        let reader = db.get_user(&reader.id).await.unwrap().unwrap();
        assert!(reader.liked_blogs.is_empty());
        assert!(reader.saved_blogs.is_empty());
        let author = db.get_user(&author.id).await.unwrap().unwrap();
        assert!(author.blogs.is_empty());
    }

    #[tokio::test]
    async fn huge_page_numbers_return_an_empty_page() {
        let db = Arc::new(MemoryDatabase::new());
        let svc = service(db.clone(), counting_store());
        let author = seed_user(db.as_ref(), "author").await;
        seed_blog(db.as_ref(), &author.id, "Only", false).await;

        let page = svc.list(Some(u64::MAX), Some(u64::MAX)).await.unwrap();
        assert!(page.blogs.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.total, 1);
    }

    /// Records every delete instead of expecting specific ids.
    fn recording_store(deleted: Arc<parking_lot::Mutex<Vec<String>>>) -> MockImageStore {
        let mut store = MockImageStore::new();
        let mut n = 0;
        store.expect_upload().returning(move |_, _| {
            n += 1;
            Ok(UploadedImage {
                url: format!("https://cdn/img-{}", n),
                asset_id: format!("img-{}", n),
            })
        });
        store.expect_delete().returning(move |id| {
            deleted.lock().push(id.to_string());
            Ok(())
        });
        store
    }

    #[tokio::test]
    async fn foreign_image_ids_in_content_are_never_released() {
        let db = Arc::new(MemoryDatabase::new());
        let deleted = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let svc = service(db.clone(), recording_store(deleted.clone()));
        let author = seed_user(db.as_ref(), "author").await;

        let mut create = input("Borrowed", false);
        create.content = Some(
            serde_json::from_value(json!({
                "blocks": [
                    { "type": "image", "data": { "file": { "url": "https://cdn/v", "imageId": "someone-elses" } } },
                    { "type": "image", "data": { "file": { "uploadToken": "mine" } } }
                ]
            }))
            .unwrap(),
        );
        create.images.insert("mine".to_string(), file("mine.png"));

        let blog = svc.create(&author.id, create).await.unwrap();
        assert_eq!(
            blog.embedded_image_ids.iter().cloned().collect::<Vec<_>>(),
            vec!["img-1".to_string()]
        );
        assert!(!blog.content.image_ids().contains("someone-elses"));

        svc.delete(&author.id, &blog.id).await.unwrap();
        let mut released = deleted.lock().clone();
        released.sort();
        assert_eq!(released, vec!["img-1".to_string(), "img-2".to_string()]);
    }

    #[tokio::test]
    async fn edits_release_only_dropped_owned_images() {
        let db = Arc::new(MemoryDatabase::new());
        let deleted = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let svc = service(db.clone(), recording_store(deleted.clone()));
        let author = seed_user(db.as_ref(), "author").await;

        let mut create = input("Album", false);
        create.content = Some(
            serde_json::from_value(json!({
                "blocks": [
                    { "type": "image", "data": { "file": { "uploadToken": "a" } } },
                    { "type": "image", "data": { "file": { "uploadToken": "b" } } }
                ]
            }))
            .unwrap(),
        );
        create.images.insert("a".to_string(), file("a.png"));
        create.images.insert("b".to_string(), file("b.png"));
        let blog = svc.create(&author.id, create).await.unwrap();

        // img-1 stays, img-2 is dropped, a foreign id is smuggled in
        let edit = UpdateBlogInput {
            content: Some(
                serde_json::from_value(json!({
                    "blocks": [
                        { "type": "image", "data": { "file": { "url": "https://cdn/img-1", "imageId": "img-1" } } },
                        { "type": "image", "data": { "file": { "url": "https://cdn/x", "imageId": "foreign" } } }
                    ]
                }))
                .unwrap(),
            ),
            ..Default::default()
        };
        let updated = svc.update(&author.id, &blog.id, edit).await.unwrap();

        assert_eq!(
            updated.embedded_image_ids.iter().cloned().collect::<Vec<_>>(),
            vec!["img-1".to_string()]
        );
        assert_eq!(*deleted.lock(), vec!["img-2".to_string()]);
    }
}
