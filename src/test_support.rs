//! Fixtures shared by the unit tests.

use fake::{faker::internet::en::SafeEmail, Fake};
use serde_json::json;

use crate::{
    config::Config,
    models::{blog::Blog, comment::Comment, content::ContentDocument, user::User},
    services::{
        auth::AuthService,
        database::{Database, Mutation, SetField},
    },
};

/// Verified password-less user named `name`.
pub async fn seed_user(db: &dyn Database, name: &str) -> User {
    let email: String = SafeEmail().fake();
    let mut user = User::new(name, &format!("{}+{}", name, email), name);
    user.is_verified = true;
    db.apply(Mutation::PutUser(user.clone())).await.unwrap();
    user
}

/// Verified user that can sign in with `password`.
pub async fn seed_user_with_password(db: &dyn Database, name: &str, password: &str) -> User {
    let mut user = seed_user(db, name).await;
    user.password_hash = Some(AuthService::new(&Config::default()).hash_password(password).unwrap());
    db.apply(Mutation::PutUser(user.clone())).await.unwrap();
    user
}

pub fn sample_content() -> ContentDocument {
    serde_json::from_value(json!({
        "blocks": [{ "type": "paragraph", "data": { "text": "hello world" } }]
    }))
    .unwrap()
}

pub async fn seed_blog(db: &dyn Database, creator: &str, title: &str, draft: bool) -> Blog {
    let now = chrono::Utc::now();
    let blog = Blog {
        id: format!("{}-{}", slug::slugify(title), uuid::Uuid::new_v4().simple()),
        creator: creator.to_string(),
        title: title.to_string(),
        description: format!("About {}", title),
        content: sample_content(),
        draft,
        tags: Default::default(),
        likes: Default::default(),
        total_saves: Default::default(),
        comments: Vec::new(),
        image: Some("http://localhost/media/cover.png".to_string()),
        image_id: None,
        embedded_image_ids: Default::default(),
        created_at: now,
        updated_at: now,
    };
    db.apply(Mutation::PutBlog(blog.clone())).await.unwrap();
    db.apply(Mutation::AddToSet {
        field: SetField::UserBlogs,
        id: creator.to_string(),
        value: blog.id.clone(),
    })
    .await
    .unwrap();
    blog
}

/// Links the comment into its parent's replies, or the blog's list when top-level.
pub async fn seed_comment(db: &dyn Database, blog: &str, user: &str, parent: Option<&str>) -> Comment {
    let comment = Comment::new(blog, user, "seeded comment", parent);
    db.apply(Mutation::PutComment(comment.clone())).await.unwrap();
    let (field, id) = match parent {
        Some(parent) => (SetField::CommentReplies, parent.to_string()),
        None => (SetField::BlogComments, blog.to_string()),
    };
    db.apply(Mutation::AddToSet {
        field,
        id,
        value: comment.id.clone(),
    })
    .await
    .unwrap();
    comment
}
