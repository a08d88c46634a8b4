// src/topics.rs
// Schema-less per-topic document collections, with live notification on insert

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{RelayError, Result};
use crate::events::Broadcaster;
use crate::types::SortDirection;

/// A stored document; always a JSON object carrying `_id`
pub type Document = Value;

/// Top-level field equality constraints
pub type Filter = Map<String, Value>;

pub const ID_FIELD: &str = "_id";

/// Objects are stored as-is; any other value is wrapped as `{"content": value}`
pub fn into_record(payload: Value) -> Map<String, Value> {
    match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("content".to_string(), other);
            map
        }
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// SQLite JSON path for a top-level key, quoted so dots and spaces stay literal
fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\"\""))
}

/// Paging, ordering and filtering for [`TopicStore::list`]
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: i64,
    /// Top-level field to order by; insertion order when absent
    pub sort: Option<String>,
    pub direction: SortDirection,
    pub filter: Filter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListPage {
    pub documents: Vec<Document>,
    /// Size of the whole filtered set, regardless of limit/offset
    pub total: i64,
}

#[derive(Clone)]
pub struct TopicStore {
    db: Arc<Database>,
    notifier: Arc<Broadcaster<String>>,
}

impl TopicStore {
    pub fn new(db: Arc<Database>, notifier: Arc<Broadcaster<String>>) -> Self {
        Self { db, notifier }
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.db.pool().await
    }

    /// Store a document (creating the topic on first write) and push it to subscribers.
    ///
    /// Returns the stored document with its `_id`.
    pub async fn insert(&self, topic: &str, payload: Value) -> Result<Document> {
        if topic.is_empty() {
            return Err(RelayError::InvalidInput("topic name is empty".to_string()));
        }

        let mut record = into_record(payload);
        let doc_id = match record.get(ID_FIELD).and_then(id_text) {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                record.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };

        let document = Value::Object(record);
        sqlx::query(
            "INSERT INTO topic_documents (topic, doc_id, body, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(topic)
        .bind(&doc_id)
        .bind(serde_json::to_string(&document)?)
        .bind(Utc::now())
        .execute(self.pool().await?)
        .await?;

        debug!(topic = %topic, doc_id = %doc_id, "Document stored");

        // Notification is best-effort; the write already succeeded
        if let Err(e) = self.notifier.broadcast(&topic.to_string(), &document).await {
            warn!(topic = %topic, "Notification failed: {}", e);
        }

        Ok(document)
    }

    pub async fn find(&self, topic: &str, filter: &Filter, limit: Option<i64>, offset: i64) -> Result<Vec<Document>> {
        let query = ListQuery {
            limit,
            offset,
            sort: None,
            direction: SortDirection::Asc,
            filter: filter.clone(),
        };
        self.fetch(topic, &query).await
    }

    pub async fn list(&self, topic: &str, query: &ListQuery) -> Result<ListPage> {
        let documents = self.fetch(topic, query).await?;
        let total = self.count(topic, &query.filter).await?;
        Ok(ListPage { documents, total })
    }

    pub async fn count(&self, topic: &str, filter: &Filter) -> Result<i64> {
        let (where_sql, binds) = where_clause(filter)?;
        let sql = format!("SELECT COUNT(*) FROM topic_documents WHERE topic = ?{}", where_sql);

        let mut q = sqlx::query(&sql).bind(topic);
        for bind in binds {
            q = q.bind(bind);
        }
        let row = q.fetch_one(self.pool().await?).await?;
        Ok(row.try_get(0)?)
    }

    async fn fetch(&self, topic: &str, query: &ListQuery) -> Result<Vec<Document>> {
        let (where_sql, mut binds) = where_clause(&query.filter)?;
        let dir = query.direction.as_sql();
        let order_sql = match &query.sort {
            Some(field) => {
                binds.push(json_path(field));
                format!("ORDER BY json_extract(body, ?) {dir}, seq {dir}")
            }
            None => format!("ORDER BY seq {dir}"),
        };
        let sql = format!(
            "SELECT body FROM topic_documents WHERE topic = ?{} {} LIMIT ? OFFSET ?",
            where_sql, order_sql
        );

        let mut q = sqlx::query(&sql).bind(topic);
        for bind in binds {
            q = q.bind(bind);
        }
        let rows = q
            .bind(query.limit.unwrap_or(-1))
            .bind(query.offset.max(0))
            .fetch_all(self.pool().await?)
            .await?;

        rows.iter()
            .map(|row| {
                let body: String = row.try_get("body")?;
                Ok(serde_json::from_str(&body)?)
            })
            .collect()
    }

    pub async fn get(&self, topic: &str, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT body FROM topic_documents WHERE topic = ? AND doc_id = ?")
            .bind(topic)
            .bind(id)
            .fetch_optional(self.pool().await?)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    /// Merge-patch a document's fields; `_id` is kept. Returns documents changed.
    pub async fn update(&self, topic: &str, id: &str, patch: Value) -> Result<u64> {
        let patch = Value::Object(into_record(patch));
        let result = sqlx::query(
            r#"
            UPDATE topic_documents
            SET body = json_set(json_patch(body, ?), '$._id', json_extract(body, '$._id'))
            WHERE topic = ? AND doc_id = ?
            "#,
        )
        .bind(serde_json::to_string(&patch)?)
        .bind(topic)
        .bind(id)
        .execute(self.pool().await?)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete(&self, topic: &str, id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM topic_documents WHERE topic = ? AND doc_id = ?")
            .bind(topic)
            .bind(id)
            .execute(self.pool().await?)
            .await?;

        Ok(result.rows_affected())
    }

    /// Names of topics that currently hold documents
    pub async fn topics(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT topic FROM topic_documents ORDER BY topic")
            .fetch_all(self.pool().await?)
            .await?;

        rows.iter().map(|r| Ok(r.try_get("topic")?)).collect()
    }
}

/// ` AND ...` fragment plus its binds; `IS` makes null compare equal to missing/null
fn where_clause(filter: &Filter) -> Result<(String, Vec<String>)> {
    let mut sql = String::new();
    let mut binds = Vec::with_capacity(filter.len() * 2);

    for (field, value) in filter {
        sql.push_str(" AND json_extract(body, ?) IS json_extract(?, '$')");
        binds.push(json_path(field));
        binds.push(serde_json::to_string(value)?);
    }

    Ok((sql, binds))
}
