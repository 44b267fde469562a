//! To-do API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{success, ApiResult};
use crate::models::{CreateTodoRequest, Todo};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TodoParams {
    #[serde(default)]
    pub all: bool,
}

/// GET /api/todos - Open items, or every item with `?all=true`.
pub async fn list_todos(State(state): State<AppState>, Query(params): Query<TodoParams>) -> ApiResult<Vec<Todo>> {
    success(state.repos.todos.list(params.all).await?)
}

/// POST /api/todos
pub async fn create_todo(State(state): State<AppState>, Json(request): Json<CreateTodoRequest>) -> ApiResult<Todo> {
    request.validate()?;
    success(state.repos.todos.add(&request).await?)
}

/// POST /api/todos/{id}/toggle
pub async fn toggle_todo(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Todo> {
    success(state.repos.todos.toggle(&id).await?)
}
