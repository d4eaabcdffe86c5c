//! Data access for todo items.
//!
//! # Design
//! `TodoStore` is the seam between handlers and persistence. Handlers hold an
//! `Arc<dyn TodoStore>` so the Postgres store and the in-memory store are
//! interchangeable. "Not found" is part of the success type: `get_todo`
//! returns `None` and `delete_todo` returns `0`.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicI64, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::{
    context::RequestContext,
    error::StoreError,
    models::{NewTodo, TodoItem},
};

#[async_trait]
pub trait TodoStore: Send + Sync {
    async fn get_todo(&self, ctx: &RequestContext, id: i64) -> Result<Option<TodoItem>, StoreError>;

    /// Returns the number of rows removed.
    async fn delete_todo(&self, ctx: &RequestContext, id: i64) -> Result<u64, StoreError>;

    /// Stamps `created_on` and returns the assigned id.
    async fn post_todo(&self, ctx: &RequestContext, todo: NewTodo) -> Result<i64, StoreError>;
}

#[derive(Clone, Debug)]
pub struct PgTodoStore {
    pool: PgPool,
}

impl PgTodoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TodoStore for PgTodoStore {
    async fn get_todo(&self, ctx: &RequestContext, id: i64) -> Result<Option<TodoItem>, StoreError> {
        debug!(id, request_id = %ctx.request_id, "get db request for todo");

        let item = sqlx::query_as::<_, TodoItem>(
            "SELECT id, todo, created_on FROM todo WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|err| {
            error!(operation = "get_todo", id, request_id = %ctx.request_id, error = %err, "failed to get todo from db");
        })?;

        debug!(id, request_id = %ctx.request_id, found = item.is_some(), "todo lookup finished");
        Ok(item)
    }

    async fn delete_todo(&self, ctx: &RequestContext, id: i64) -> Result<u64, StoreError> {
        debug!(id, request_id = %ctx.request_id, "delete db request for todo");

        let result = sqlx::query("DELETE FROM todo WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .inspect_err(|err| {
                error!(
                    operation = "delete_todo",
                    id,
                    request_id = %ctx.request_id,
                    error = %err,
                    "failed to delete todo from db"
                );
            })?;

        Ok(result.rows_affected())
    }

    async fn post_todo(&self, ctx: &RequestContext, todo: NewTodo) -> Result<i64, StoreError> {
        debug!(request_id = %ctx.request_id, "insert db request for todo");

        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO todo (todo, created_on) VALUES ($1, $2) RETURNING id",
        )
        .bind(&todo.todo)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|err| {
            error!(operation = "post_todo", request_id = %ctx.request_id, error = %err, "failed to insert todo into db");
        })?;

        id.ok_or_else(|| {
            error!(operation = "post_todo", request_id = %ctx.request_id, "insert into todo returned no row");
            StoreError::NotInserted
        })
    }
}

/// Process-local store. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct MemoryTodoStore {
    items: RwLock<BTreeMap<i64, TodoItem>>,
    next_id: AtomicI64,
}

impl MemoryTodoStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

impl Default for MemoryTodoStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TodoStore for MemoryTodoStore {
    async fn get_todo(&self, _ctx: &RequestContext, id: i64) -> Result<Option<TodoItem>, StoreError> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn delete_todo(&self, _ctx: &RequestContext, id: i64) -> Result<u64, StoreError> {
        let removed = self.items.write().await.remove(&id);
        Ok(u64::from(removed.is_some()))
    }

    async fn post_todo(&self, _ctx: &RequestContext, todo: NewTodo) -> Result<i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let item = TodoItem {
            id,
            todo: todo.todo,
            created_on: Utc::now(),
        };
        self.items.write().await.insert(id, item);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_todo(text: &str) -> NewTodo {
        NewTodo {
            todo: text.to_string(),
        }
    }

    #[tokio::test]
    async fn missing_row_is_none_not_error() {
        let store = MemoryTodoStore::new();
        let found = store.get_todo(&RequestContext::new(), 42).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn post_assigns_increasing_ids_and_timestamp() {
        let store = MemoryTodoStore::new();
        let ctx = RequestContext::new();
        let before = Utc::now();

        let first = store.post_todo(&ctx, new_todo("a")).await.unwrap();
        let second = store.post_todo(&ctx, new_todo("b")).await.unwrap();
        assert_eq!((first, second), (1, 2));

        let item = store.get_todo(&ctx, first).await.unwrap().unwrap();
        assert_eq!(item.todo, "a");
        assert!(item.created_on >= before);
    }

    #[tokio::test]
    async fn delete_reports_rows_affected() {
        let store = MemoryTodoStore::new();
        let ctx = RequestContext::new();
        let id = store.post_todo(&ctx, new_todo("gone soon")).await.unwrap();

        assert_eq!(store.delete_todo(&ctx, id).await.unwrap(), 1);
        assert_eq!(store.delete_todo(&ctx, id).await.unwrap(), 0);
        assert!(store.get_todo(&ctx, id).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let store = MemoryTodoStore::new();
        let ctx = RequestContext::new();
        let id = store.post_todo(&ctx, new_todo("x")).await.unwrap();
        store.delete_todo(&ctx, id).await.unwrap();
        let next = store.post_todo(&ctx, new_todo("y")).await.unwrap();
        assert_eq!(next, id + 1);
        assert_eq!(store.len().await, 1);
    }
}
