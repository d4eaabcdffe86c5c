//! Wire and row types for the todo API.
//!
//! # Design
//! `TodoItem` doubles as the database row (`sqlx::FromRow`) and the JSON body
//! of `GET /api/todo/{id}`. Request and response payloads are separate small
//! structs so the handler never has to guess which fields a client supplied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted todo item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TodoItem {
    pub id: i64,
    pub todo: String,
    pub created_on: DateTime<Utc>,
}

/// A todo accepted by the handler but not yet stored. The store assigns the
/// id and stamps `created_on`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTodo {
    pub todo: String,
}

/// Body of `POST /api/todo`.
#[derive(Debug, Deserialize)]
pub struct TodoPostRequest {
    #[serde(default)]
    pub todo: String,
}

impl TodoPostRequest {
    /// Returns the validation message for an unusable request.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.todo.trim().is_empty() {
            return Err("todo must not be empty");
        }
        Ok(())
    }
}

/// Body returned by a successful `POST /api/todo`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoPostResponse {
    pub id: i64,
}

/// Uniform error envelope.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorMessage {
    pub message: String,
}

/// Query form of the id used by `GET/DELETE /api/todo?id=`.
#[derive(Debug, Default, Deserialize)]
pub struct IdQuery {
    pub id: Option<String>,
}
