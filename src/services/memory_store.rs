use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::{
    error::{AppError, Result},
    models::{
        blog::{Blog, BlogFilter},
        comment::Comment,
        notification::Notification,
        user::User,
    },
    services::database::{Database, Mutation, SetField, TxOp},
};

#[derive(Debug, Clone, Default, PartialEq)]
struct Tables {
    users: BTreeMap<String, User>,
    blogs: BTreeMap<String, Blog>,
    comments: BTreeMap<String, Comment>,
    notifications: BTreeMap<String, Notification>,
}

/// 进程内文档存储，用于开发环境和测试
#[derive(Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
    #[cfg(test)]
    fail_step: parking_lot::Mutex<Option<&'static str>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next atomic batch fail when it reaches `step`.
    #[cfg(test)]
    pub fn fail_at_step(&self, step: &'static str) {
        *self.fail_step.lock() = Some(step);
    }

    #[cfg(test)]
    fn should_fail(&self, step: &str) -> bool {
        let mut guard = self.fail_step.lock();
        if guard.as_deref() == Some(step) {
            *guard = None;
            return true;
        }
        false
    }

    #[cfg(not(test))]
    fn should_fail(&self, _step: &str) -> bool {
        false
    }
}

fn set_add(set: &mut std::collections::BTreeSet<String>, value: &str) {
    set.insert(value.to_string());
}

fn list_add(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn list_pull(list: &mut Vec<String>, value: &str) {
    list.retain(|v| v != value);
}

impl Tables {
    fn add_to_set(&mut self, field: SetField, id: &str, value: &str) {
        match field {
            SetField::UserFollowers | SetField::UserFollowing | SetField::UserBlogs
            | SetField::UserLikedBlogs | SetField::UserSavedBlogs => {
                if let Some(user) = self.users.get_mut(id) {
                    match field {
                        SetField::UserFollowers => set_add(&mut user.followers, value),
                        SetField::UserFollowing => set_add(&mut user.following, value),
                        SetField::UserBlogs => list_add(&mut user.blogs, value),
                        SetField::UserLikedBlogs => set_add(&mut user.liked_blogs, value),
                        _ => set_add(&mut user.saved_blogs, value),
                    }
                }
            }
            SetField::BlogLikes | SetField::BlogSaves | SetField::BlogComments => {
                if let Some(blog) = self.blogs.get_mut(id) {
                    match field {
                        SetField::BlogLikes => set_add(&mut blog.likes, value),
                        SetField::BlogSaves => set_add(&mut blog.total_saves, value),
                        _ => list_add(&mut blog.comments, value),
                    }
                }
            }
            SetField::CommentLikes | SetField::CommentReplies => {
                if let Some(comment) = self.comments.get_mut(id) {
                    match field {
                        SetField::CommentLikes => set_add(&mut comment.likes, value),
                        _ => list_add(&mut comment.replies, value),
                    }
                }
            }
        }
    }

    fn pull_from_doc(&mut self, field: SetField, id: &str, value: &str) {
        match field.table() {
            "user" => {
                if let Some(user) = self.users.get_mut(id) {
                    pull_user(user, field, value);
                }
            }
            "blog" => {
                if let Some(blog) = self.blogs.get_mut(id) {
                    pull_blog(blog, field, value);
                }
            }
            _ => {
                if let Some(comment) = self.comments.get_mut(id) {
                    pull_comment(comment, field, value);
                }
            }
        }
    }

    fn pull_everywhere(&mut self, field: SetField, value: &str) {
        match field.table() {
            "user" => self.users.values_mut().for_each(|u| pull_user(u, field, value)),
            "blog" => self.blogs.values_mut().for_each(|b| pull_blog(b, field, value)),
            _ => self.comments.values_mut().for_each(|c| pull_comment(c, field, value)),
        }
    }

    fn replace_everywhere(&mut self, field: SetField, from: &str, to: &str) {
        let holders: Vec<String> = match field.table() {
            "user" => self
                .users
                .values()
                .filter(|u| user_holds(u, field, from))
                .map(|u| u.id.clone())
                .collect(),
            "blog" => self
                .blogs
                .values()
                .filter(|b| blog_holds(b, field, from))
                .map(|b| b.id.clone())
                .collect(),
            _ => self
                .comments
                .values()
                .filter(|c| comment_holds(c, field, from))
                .map(|c| c.id.clone())
                .collect(),
        };

        for id in holders {
            self.pull_from_doc(field, &id, from);
            if id != to {
                self.add_to_set(field, &id, to);
            }
        }
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::PutUser(user) => {
                self.users.insert(user.id.clone(), user);
            }
            Mutation::DeleteUser(id) => {
                self.users.remove(&id);
            }
            Mutation::PutBlog(blog) => {
                self.blogs.insert(blog.id.clone(), blog);
            }
            Mutation::DeleteBlog(id) => {
                self.blogs.remove(&id);
            }
            Mutation::PutComment(comment) => {
                self.comments.insert(comment.id.clone(), comment);
            }
            Mutation::DeleteComment(id) => {
                self.comments.remove(&id);
            }
            Mutation::PutNotification(notification) => {
                self.notifications.insert(notification.id.clone(), notification);
            }
            Mutation::DeleteNotification { recipient, id } => {
                if self.notifications.get(&id).map(|n| n.recipient == recipient).unwrap_or(false) {
                    self.notifications.remove(&id);
                }
            }
            Mutation::DeleteNotificationsFor(recipient) => {
                self.notifications.retain(|_, n| n.recipient != recipient);
            }
            Mutation::DeleteNotificationsBetween { sender, recipient } => {
                self.notifications
                    .retain(|_, n| !(n.recipient == recipient && n.sender.as_deref() == Some(sender.as_str())));
            }
            Mutation::MarkNotificationsRead { recipient, id } => {
                self.notifications
                    .values_mut()
                    .filter(|n| n.recipient == recipient)
                    .filter(|n| id.as_deref().map(|id| n.id == id).unwrap_or(true))
                    .for_each(|n| n.is_read = true);
            }
            Mutation::AddToSet { field, id, value } => self.add_to_set(field, &id, &value),
            Mutation::PullFromSet { field, id, value } => self.pull_from_doc(field, &id, &value),
            Mutation::PullEverywhere { field, value } => self.pull_everywhere(field, &value),
            Mutation::ReplaceEverywhere { field, from, to } => self.replace_everywhere(field, &from, &to),
            Mutation::ReassignBlogs { from, to } => {
                self.blogs
                    .values_mut()
                    .filter(|b| b.creator == from)
                    .for_each(|b| b.creator = to.clone());
            }
            Mutation::ReassignComments { from, to } => {
                self.comments
                    .values_mut()
                    .filter(|c| c.user == from)
                    .for_each(|c| c.user = to.clone());
            }
            Mutation::ReassignNotificationSender { from, to } => {
                self.notifications
                    .values_mut()
                    .filter(|n| n.sender.as_deref() == Some(from.as_str()))
                    .for_each(|n| n.sender = to.clone());
            }
        }
    }
}

fn pull_user(user: &mut User, field: SetField, value: &str) {
    match field {
        SetField::UserFollowers => {
            user.followers.remove(value);
        }
        SetField::UserFollowing => {
            user.following.remove(value);
        }
        SetField::UserBlogs => list_pull(&mut user.blogs, value),
        SetField::UserLikedBlogs => {
            user.liked_blogs.remove(value);
        }
        SetField::UserSavedBlogs => {
            user.saved_blogs.remove(value);
        }
        _ => {}
    }
}

fn pull_blog(blog: &mut Blog, field: SetField, value: &str) {
    match field {
        SetField::BlogLikes => {
            blog.likes.remove(value);
        }
        SetField::BlogSaves => {
            blog.total_saves.remove(value);
        }
        SetField::BlogComments => list_pull(&mut blog.comments, value),
        _ => {}
    }
}

fn pull_comment(comment: &mut Comment, field: SetField, value: &str) {
    match field {
        SetField::CommentLikes => {
            comment.likes.remove(value);
        }
        SetField::CommentReplies => list_pull(&mut comment.replies, value),
        _ => {}
    }
}

fn user_holds(user: &User, field: SetField, value: &str) -> bool {
    match field {
        SetField::UserFollowers => user.followers.contains(value),
        SetField::UserFollowing => user.following.contains(value),
        SetField::UserBlogs => user.blogs.iter().any(|b| b == value),
        SetField::UserLikedBlogs => user.liked_blogs.contains(value),
        SetField::UserSavedBlogs => user.saved_blogs.contains(value),
        _ => false,
    }
}

fn blog_holds(blog: &Blog, field: SetField, value: &str) -> bool {
    match field {
        SetField::BlogLikes => blog.likes.contains(value),
        SetField::BlogSaves => blog.total_saves.contains(value),
        SetField::BlogComments => blog.comments.iter().any(|c| c == value),
        _ => false,
    }
}

fn comment_holds(comment: &Comment, field: SetField, value: &str) -> bool {
    match field {
        SetField::CommentLikes => comment.likes.contains(value),
        SetField::CommentReplies => comment.replies.iter().any(|c| c == value),
        _ => false,
    }
}

fn newest_first<T, F>(items: &mut [T], created: F)
where
    F: Fn(&T) -> chrono::DateTime<chrono::Utc>,
{
    items.sort_by(|a, b| created(b).cmp(&created(a)));
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.tables.read().users.get(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_lowercase();
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.tables.read().users.values().cloned().collect();
        newest_first(&mut users, |u| u.created_at);
        Ok(users)
    }

    async fn get_users(&self, ids: &[String]) -> Result<Vec<User>> {
        let tables = self.tables.read();
        Ok(ids.iter().filter_map(|id| tables.users.get(id).cloned()).collect())
    }

    async fn get_blog(&self, id: &str) -> Result<Option<Blog>> {
        Ok(self.tables.read().blogs.get(id).cloned())
    }

    async fn get_blogs(&self, ids: &[String]) -> Result<Vec<Blog>> {
        let tables = self.tables.read();
        Ok(ids.iter().filter_map(|id| tables.blogs.get(id).cloned()).collect())
    }

    async fn list_blogs(&self, filter: &BlogFilter, skip: u64, limit: u64) -> Result<(Vec<Blog>, u64)> {
        let mut matching: Vec<Blog> = self
            .tables
            .read()
            .blogs
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        newest_first(&mut matching, |b| b.created_at);

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn blogs_by_creator(&self, user_id: &str) -> Result<Vec<Blog>> {
        Ok(self
            .tables
            .read()
            .blogs
            .values()
            .filter(|b| b.creator == user_id)
            .cloned()
            .collect())
    }

    async fn get_comment(&self, id: &str) -> Result<Option<Comment>> {
        Ok(self.tables.read().comments.get(id).cloned())
    }

    async fn comments_for_blog(&self, blog_id: &str) -> Result<Vec<Comment>> {
        Ok(self
            .tables
            .read()
            .comments
            .values()
            .filter(|c| c.blog == blog_id)
            .cloned()
            .collect())
    }

    async fn comments_by_author(&self, user_id: &str) -> Result<Vec<Comment>> {
        Ok(self
            .tables
            .read()
            .comments
            .values()
            .filter(|c| c.user == user_id)
            .cloned()
            .collect())
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        Ok(self.tables.read().notifications.get(id).cloned())
    }

    async fn list_notifications(&self, recipient: &str) -> Result<Vec<Notification>> {
        let mut inbox: Vec<Notification> = self
            .tables
            .read()
            .notifications
            .values()
            .filter(|n| n.recipient == recipient)
            .cloned()
            .collect();
        newest_first(&mut inbox, |n| n.created_at);
        Ok(inbox)
    }

    async fn count_unread(&self, recipient: &str) -> Result<u64> {
        Ok(self
            .tables
            .read()
            .notifications
            .values()
            .filter(|n| n.recipient == recipient && !n.is_read)
            .count() as u64)
    }

    async fn apply(&self, mutation: Mutation) -> Result<()> {
        self.tables.write().apply(mutation);
        Ok(())
    }

    async fn apply_atomic(&self, ops: Vec<TxOp>) -> Result<()> {
        let mut guard = self.tables.write();
        let mut staged = guard.clone();

        for op in ops {
            if self.should_fail(op.step) {
                warn!("Atomic batch aborted at step {}", op.step);
                return Err(AppError::Transaction(format!("step {} failed", op.step)));
            }
            debug!("Applying step {}", op.step);
            staged.apply(op.mutation);
        }

        *guard = staged;
        Ok(())
    }
}
