use axum::{
    extract::{Multipart, Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tracing::debug;

use crate::{
    error::{AppError, Result},
    models::{
        blog::{CreateBlogInput, PageQuery, SearchQuery, UpdateBlogInput},
        content::ContentDocument,
        user::UploadedFile,
    },
    state::AppState,
    utils::middleware::OptionalAuth,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/blogs", get(list_blogs).post(create_blog))
        .route("/blogs/search", get(search_blogs))
        .route("/blogs/:id", get(get_blog).patch(update_blog).delete(delete_blog))
        .route("/blogs/like/:id", post(like_blog))
        .route("/blogs/save/:id", post(save_blog))
}

/// Multipart blog body. Embedded images arrive as `images[<uploadToken>]`.
#[derive(Debug, Default)]
struct BlogForm {
    title: Option<String>,
    description: Option<String>,
    draft: Option<bool>,
    content: Option<ContentDocument>,
    tags: Option<BTreeSet<String>>,
    cover: Option<UploadedFile>,
    images: BTreeMap<String, UploadedFile>,
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::BadRequest(format!("Invalid multipart body: {}", e))
}

/// Accepts a JSON array or a comma separated list.
fn parse_tags(raw: &str) -> BTreeSet<String> {
    serde_json::from_str::<Vec<String>>(raw)
        .unwrap_or_else(|_| raw.split(',').map(str::to_string).collect())
        .into_iter()
        .collect()
}

async fn read_blog_form(mut multipart: Multipart) -> Result<BlogForm> {
    let mut form = BlogForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "image" || name.starts_with("images[") {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let bytes = field.bytes().await.map_err(multipart_error)?.to_vec();
            if bytes.is_empty() {
                continue;
            }
            let file = UploadedFile { file_name, bytes };
            match name
                .strip_prefix("images[")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                Some(token) => {
                    form.images.insert(token.to_string(), file);
                }
                None => form.cover = Some(file),
            }
            continue;
        }

        let text = field.text().await.map_err(multipart_error)?;
        match name.as_str() {
            "title" => form.title = Some(text),
            "description" => form.description = Some(text),
            "draft" => form.draft = Some(text.trim() == "true"),
            "content" => {
                let content = ContentDocument::parse(&text)
                    .map_err(|e| AppError::Validation(format!("Invalid content: {}", e)))?;
                form.content = Some(content);
            }
            "tags" => form.tags = Some(parse_tags(&text)),
            other => debug!("Ignoring multipart field {}", other),
        }
    }

    Ok(form)
}

async fn create_blog(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let form = read_blog_form(multipart).await?;

    let input = CreateBlogInput {
        title: form.title.unwrap_or_default(),
        description: form.description.unwrap_or_default(),
        content: form.content,
        draft: form.draft.unwrap_or(false),
        tags: form.tags.unwrap_or_default(),
        cover: form.cover,
        images: form.images,
    };
    let blog = state.blog_service.create(&user.id, input).await?;

    let message = if blog.draft {
        "Blog saved as draft. You can publish it from your profile."
    } else {
        "Blog created successfully."
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "blog": blog
    })))
}

async fn list_blogs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>> {
    let page = state.blog_service.list(query.page, query.limit).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Blogs fetched successfully",
        "blogs": page.blogs,
        "hasMore": page.has_more,
        "total": page.total
    })))
}

async fn search_blogs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>> {
    let page = state.blog_service.search(query).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Blogs fetched successfully",
        "blogs": page.blogs,
        "hasMore": page.has_more,
        "total": page.total
    })))
}

async fn get_blog(
    State(state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    Path(blog_id): Path<String>,
) -> Result<Json<Value>> {
    let viewer = user.as_ref().map(|u| u.id.as_str());
    let blog = state.blog_service.get(&blog_id, viewer).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Blog fetched successfully",
        "blog": blog
    })))
}

async fn update_blog(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(blog_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let form = read_blog_form(multipart).await?;

    let input = UpdateBlogInput {
        title: form.title,
        description: form.description,
        content: form.content,
        draft: form.draft,
        tags: form.tags,
        cover: form.cover,
        images: form.images,
    };
    let blog = state.blog_service.update(&user.id, &blog_id, input).await?;

    let message = if blog.draft {
        "Blog saved as draft. You can publish it later."
    } else {
        "Blog updated successfully"
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "blog": blog
    })))
}

async fn delete_blog(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(blog_id): Path<String>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    state.blog_service.delete(&user.id, &blog_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Blog deleted successfully"
    })))
}

async fn like_blog(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(blog_id): Path<String>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let outcome = state.relationship_service.toggle_blog_like(&user.id, &blog_id).await?;
    let message = if outcome.active {
        "Blog liked successfully"
    } else {
        "Blog unliked successfully"
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "isLiked": outcome.active
    })))
}

async fn save_blog(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuth,
    Path(blog_id): Path<String>,
) -> Result<Json<Value>> {
    let user = auth.required()?;
    let outcome = state.relationship_service.toggle_blog_save(&user.id, &blog_id).await?;
    let message = if outcome.active { "Blog has been saved" } else { "Blog unsaved" };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "isSaved": outcome.active
    })))
}
