use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use surrealdb::{
    engine::remote::http::{Client, Http, Https},
    opt::auth::Root,
    Surreal,
};
use tracing::{debug, error, info};

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        blog::{Blog, BlogFilter},
        comment::Comment,
        notification::Notification,
        user::User,
    },
    services::database::{to_doc, Database, Mutation, TxOp},
};

/// SurrealDB 存储
///
/// Each record keeps the serialized model under a single `doc` field so the
/// model's own `id` never collides with the record id.
#[derive(Clone)]
pub struct SurrealDatabase {
    client: Surreal<Client>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct DocRow<T> {
    doc: T,
}

/// 一条语句及其绑定参数
struct Statement {
    sql: String,
    binds: Vec<(String, Value)>,
}

impl SurrealDatabase {
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Initializing database connection to {}", config.database_url);

        let client = if let Some(address) = config.database_url.strip_prefix("https://") {
            Surreal::new::<Https>(address).await?
        } else {
            let address = config
                .database_url
                .strip_prefix("http://")
                .unwrap_or(&config.database_url);
            Surreal::new::<Http>(address).await?
        };

        client
            .signin(Root {
                username: &config.database_username,
                password: &config.database_password,
            })
            .await?;
        client
            .use_ns(&config.database_namespace)
            .use_db(&config.database_name)
            .await?;

        Ok(Self { client })
    }

    async fn select_docs<T: DeserializeOwned>(&self, sql: &str, binds: Vec<(&str, Value)>) -> Result<Vec<T>> {
        debug!("Executing query: {}", sql);
        let mut query = self.client.query(sql);
        for (key, value) in binds {
            query = query.bind((key.to_string(), value));
        }
        let mut response = query.await?.check()?;
        let rows: Vec<T> = response.take(0)?;
        Ok(rows)
    }

    async fn select_one<T: DeserializeOwned>(&self, table: &str, id: &str) -> Result<Option<T>> {
        let rows: Vec<T> = self
            .select_docs(
                "SELECT VALUE doc FROM type::thing($tb, $id)",
                vec![("tb", json!(table)), ("id", json!(id))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn select_many<T: DeserializeOwned>(&self, table: &str, ids: &[String]) -> Result<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select_docs(
            "SELECT VALUE doc FROM type::table($tb) WHERE doc.id INSIDE $ids",
            vec![("tb", json!(table)), ("ids", json!(ids))],
        )
        .await
    }

    async fn newest_first<T: DeserializeOwned>(&self, sql: &str, binds: Vec<(&str, Value)>) -> Result<Vec<T>> {
        let rows: Vec<DocRow<T>> = self.select_docs(sql, binds).await?;
        Ok(rows.into_iter().map(|row| row.doc).collect())
    }

    async fn run(&self, statements: Vec<Statement>, transactional: bool) -> Result<()> {
        let mut sql = String::new();
        if transactional {
            sql.push_str("BEGIN TRANSACTION;\n");
        }
        let mut binds = Vec::new();
        for statement in statements {
            sql.push_str(&statement.sql);
            sql.push_str(";\n");
            binds.extend(statement.binds);
        }
        if transactional {
            sql.push_str("COMMIT TRANSACTION;\n");
        }

        debug!("Executing statement batch: {}", sql);
        let mut query = self.client.query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        query.await?.check()?;
        Ok(())
    }
}

fn filter_clause(filter: &BlogFilter) -> (&'static str, Vec<(&'static str, Value)>) {
    match filter {
        BlogFilter::Published => ("doc.draft = false", vec![]),
        BlogFilter::Text(text) => (
            "doc.draft = false AND (string::lowercase(doc.title) CONTAINS $needle \
             OR string::lowercase(doc.description) CONTAINS $needle)",
            vec![("needle", json!(text.to_lowercase()))],
        ),
        BlogFilter::Tag(tag) => ("doc.draft = false AND doc.tags CONTAINS $tag", vec![("tag", json!(tag))]),
    }
}

/// Renders one mutation as a SurrealQL statement with binds prefixed by `p`.
fn statement(mutation: &Mutation, p: &str) -> Result<Statement> {
    let key = |name: &str| format!("{}{}", p, name);
    let var = |name: &str| format!("${}{}", p, name);

    let put = |table: &str, id: &str, doc: Value| Statement {
        sql: format!("UPDATE type::thing('{}', {}) CONTENT {{ doc: {} }}", table, var("id"), var("doc")),
        binds: vec![(key("id"), json!(id)), (key("doc"), doc)],
    };
    let delete = |table: &str, id: &str| Statement {
        sql: format!("DELETE type::thing('{}', {})", table, var("id")),
        binds: vec![(key("id"), json!(id))],
    };

    let statement = match mutation {
        Mutation::PutUser(user) => put("user", &user.id, to_doc(user)?),
        Mutation::DeleteUser(id) => delete("user", id),
        Mutation::PutBlog(blog) => put("blog", &blog.id, to_doc(blog)?),
        Mutation::DeleteBlog(id) => delete("blog", id),
        Mutation::PutComment(comment) => put("comment", &comment.id, to_doc(comment)?),
        Mutation::DeleteComment(id) => delete("comment", id),
        Mutation::PutNotification(n) => put("notification", &n.id, to_doc(n)?),
        Mutation::DeleteNotification { recipient, id } => Statement {
            sql: format!(
                "DELETE type::thing('notification', {}) WHERE doc.recipient = {}",
                var("id"),
                var("recipient")
            ),
            binds: vec![(key("id"), json!(id)), (key("recipient"), json!(recipient))],
        },
        Mutation::DeleteNotificationsFor(recipient) => Statement {
            sql: format!("DELETE notification WHERE doc.recipient = {}", var("recipient")),
            binds: vec![(key("recipient"), json!(recipient))],
        },
        Mutation::DeleteNotificationsBetween { sender, recipient } => Statement {
            sql: format!(
                "DELETE notification WHERE doc.recipient = {} AND doc.sender = {}",
                var("recipient"),
                var("sender")
            ),
            binds: vec![(key("recipient"), json!(recipient)), (key("sender"), json!(sender))],
        },
        Mutation::MarkNotificationsRead { recipient, id } => {
            let mut sql = format!(
                "UPDATE notification SET doc.isRead = true WHERE doc.recipient = {}",
                var("recipient")
            );
            let mut binds = vec![(key("recipient"), json!(recipient))];
            if let Some(id) = id {
                sql.push_str(&format!(" AND doc.id = {}", var("id")));
                binds.push((key("id"), json!(id)));
            }
            Statement { sql, binds }
        }
        Mutation::AddToSet { field, id, value } => Statement {
            sql: format!(
                "UPDATE type::thing('{table}', {id}) SET doc.{f} = array::union(doc.{f} ?? [], [{v}]) WHERE doc != NONE",
                table = field.table(),
                id = var("id"),
                f = field.field(),
                v = var("value"),
            ),
            binds: vec![(key("id"), json!(id)), (key("value"), json!(value))],
        },
        Mutation::PullFromSet { field, id, value } => Statement {
            sql: format!(
                "UPDATE type::thing('{table}', {id}) SET doc.{f} -= {v} WHERE doc != NONE",
                table = field.table(),
                id = var("id"),
                f = field.field(),
                v = var("value"),
            ),
            binds: vec![(key("id"), json!(id)), (key("value"), json!(value))],
        },
        Mutation::PullEverywhere { field, value } => Statement {
            sql: format!(
                "UPDATE {table} SET doc.{f} -= {v} WHERE doc.{f} CONTAINS {v}",
                table = field.table(),
                f = field.field(),
                v = var("value"),
            ),
            binds: vec![(key("value"), json!(value))],
        },
        Mutation::ReplaceEverywhere { field, from, to } => Statement {
            sql: format!(
                "UPDATE {table} SET doc.{f} = array::union(array::complement(doc.{f}, [{from}]), \
                 IF doc.id = {to} THEN [] ELSE [{to}] END) WHERE doc.{f} CONTAINS {from}",
                table = field.table(),
                f = field.field(),
                from = var("from"),
                to = var("to"),
            ),
            binds: vec![(key("from"), json!(from)), (key("to"), json!(to))],
        },
        Mutation::ReassignBlogs { from, to } => Statement {
            sql: format!("UPDATE blog SET doc.creator = {} WHERE doc.creator = {}", var("to"), var("from")),
            binds: vec![(key("from"), json!(from)), (key("to"), json!(to))],
        },
        Mutation::ReassignComments { from, to } => Statement {
            sql: format!("UPDATE comment SET doc.user = {} WHERE doc.user = {}", var("to"), var("from")),
            binds: vec![(key("from"), json!(from)), (key("to"), json!(to))],
        },
        Mutation::ReassignNotificationSender { from, to } => Statement {
            sql: format!(
                "UPDATE notification SET doc.sender = {} WHERE doc.sender = {}",
                var("to"),
                var("from")
            ),
            binds: vec![(key("from"), json!(from)), (key("to"), json!(to))],
        },
    };

    Ok(statement)
}

#[async_trait]
impl Database for SurrealDatabase {
    async fn ping(&self) -> Result<()> {
        match self.client.health().await {
            Ok(_) => {
                info!("Database connection verified successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to verify database connection: {}", e);
                Err(AppError::from(e))
            }
        }
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.select_one("user", id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let rows: Vec<User> = self
            .select_docs(
                "SELECT VALUE doc FROM user WHERE string::lowercase(doc.email) = $email LIMIT 1",
                vec![("email", json!(email.to_lowercase()))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let rows: Vec<User> = self
            .select_docs(
                "SELECT VALUE doc FROM user WHERE doc.username = $username LIMIT 1",
                vec![("username", json!(username))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.newest_first(
            "SELECT doc, doc.createdAt AS created_at FROM user ORDER BY created_at DESC",
            vec![],
        )
        .await
    }

    async fn get_users(&self, ids: &[String]) -> Result<Vec<User>> {
        self.select_many("user", ids).await
    }

    async fn get_blog(&self, id: &str) -> Result<Option<Blog>> {
        self.select_one("blog", id).await
    }

    async fn get_blogs(&self, ids: &[String]) -> Result<Vec<Blog>> {
        self.select_many("blog", ids).await
    }

    async fn list_blogs(&self, filter: &BlogFilter, skip: u64, limit: u64) -> Result<(Vec<Blog>, u64)> {
        let (clause, binds) = filter_clause(filter);

        let page_sql = format!(
            "SELECT doc, doc.createdAt AS created_at FROM blog WHERE {} \
             ORDER BY created_at DESC LIMIT $limit START $skip",
            clause
        );
        let mut page_binds = binds.clone();
        page_binds.push(("limit", json!(limit)));
        page_binds.push(("skip", json!(skip)));
        let blogs: Vec<Blog> = self.newest_first(&page_sql, page_binds).await?;

        let count_sql = format!("SELECT count() AS count FROM blog WHERE {} GROUP ALL", clause);
        let counts: Vec<CountRow> = self.select_docs(&count_sql, binds).await?;
        let total = counts.first().map(|c| c.count).unwrap_or(0);

        Ok((blogs, total))
    }

    async fn blogs_by_creator(&self, user_id: &str) -> Result<Vec<Blog>> {
        self.select_docs(
            "SELECT VALUE doc FROM blog WHERE doc.creator = $user",
            vec![("user", json!(user_id))],
        )
        .await
    }

    async fn get_comment(&self, id: &str) -> Result<Option<Comment>> {
        self.select_one("comment", id).await
    }

    async fn comments_for_blog(&self, blog_id: &str) -> Result<Vec<Comment>> {
        self.select_docs(
            "SELECT VALUE doc FROM comment WHERE doc.blog = $blog",
            vec![("blog", json!(blog_id))],
        )
        .await
    }

    async fn comments_by_author(&self, user_id: &str) -> Result<Vec<Comment>> {
        self.select_docs(
            "SELECT VALUE doc FROM comment WHERE doc.user = $user",
            vec![("user", json!(user_id))],
        )
        .await
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        self.select_one("notification", id).await
    }

    async fn list_notifications(&self, recipient: &str) -> Result<Vec<Notification>> {
        self.newest_first(
            "SELECT doc, doc.createdAt AS created_at FROM notification \
             WHERE doc.recipient = $recipient ORDER BY created_at DESC",
            vec![("recipient", json!(recipient))],
        )
        .await
    }

    async fn count_unread(&self, recipient: &str) -> Result<u64> {
        let counts: Vec<CountRow> = self
            .select_docs(
                "SELECT count() AS count FROM notification \
                 WHERE doc.recipient = $recipient AND doc.isRead = false GROUP ALL",
                vec![("recipient", json!(recipient))],
            )
            .await?;
        Ok(counts.first().map(|c| c.count).unwrap_or(0))
    }

    async fn apply(&self, mutation: Mutation) -> Result<()> {
        let statement = statement(&mutation, "")?;
        self.run(vec![statement], false).await
    }

    async fn apply_atomic(&self, ops: Vec<TxOp>) -> Result<()> {
        let steps: Vec<&'static str> = ops.iter().map(|op| op.step).collect();
        let statements = ops
            .iter()
            .enumerate()
            .map(|(i, op)| statement(&op.mutation, &format!("p{}_", i)))
            .collect::<Result<Vec<_>>>()?;

        self.run(statements, true).await.map_err(|e| {
            error!("Transaction over steps {:?} failed: {}", steps, e);
            AppError::Transaction(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::SetField;

    #[test]
    fn statements_prefix_their_binds() {
        let s = statement(
            &Mutation::AddToSet {
                field: SetField::UserFollowers,
                id: "u1".into(),
                value: "u2".into(),
            },
            "p3_",
        )
        .unwrap();
        assert!(s.sql.contains("type::thing('user', $p3_id)"));
        assert!(s.sql.contains("doc.followers"));
        let keys: Vec<&str> = s.binds.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["p3_id", "p3_value"]);
    }

    #[test]
    fn replace_skips_the_target_document() {
        let s = statement(
            &Mutation::ReplaceEverywhere {
                field: SetField::BlogLikes,
                from: "s".into(),
                to: "t".into(),
            },
            "",
        )
        .unwrap();
        assert!(s.sql.starts_with("UPDATE blog SET doc.likes"));
        assert!(s.sql.contains("IF doc.id = $to THEN [] ELSE [$to] END"));
    }

    #[test]
    fn search_filter_lowercases_the_needle() {
        let (clause, binds) = filter_clause(&BlogFilter::Text("RuSt".into()));
        assert!(clause.contains("string::lowercase(doc.title)"));
        assert_eq!(binds[0].1, json!("rust"));
    }
}
