// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the chat relay.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::model::UserId;
use crate::state::RelayState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
    pub online_users: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: UserId,
    pub connections: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertUserRequest {
    pub nickname: String,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<RelayState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        connections: s.registry.connection_count(),
        online_users: s.registry.online_users().len(),
    })
}

/// `GET /api/v1/users/online`
pub async fn online_users(State(s): State<Arc<RelayState>>) -> impl IntoResponse {
    let users: Vec<OnlineUser> = s
        .registry
        .online_users()
        .into_iter()
        .map(|id| OnlineUser { id, connections: s.registry.lookup_by_user(id).len() })
        .collect();
    Json(users)
}

/// `PUT /api/v1/users/{id}`: record the nickname used for conversation names.
pub async fn upsert_user(
    State(s): State<Arc<RelayState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpsertUserRequest>,
) -> Response {
    let nickname = req.nickname.trim();
    if nickname.is_empty() {
        return ErrorCode::BadRequest.to_http_response("nickname must not be empty").into_response();
    }
    let user = UserId(id);
    match s.store.upsert_user(user, nickname).await {
        Ok(()) => {
            if let Err(e) = s.router.refresh_contacts(user).await {
                tracing::warn!(user = %user, err = %e, "conversation refresh failed");
            }
            Json(serde_json::json!({ "id": user, "nickname": nickname })).into_response()
        }
        Err(e) => {
            tracing::warn!(user = %user, err = %e, "user upsert failed");
            ErrorCode::StoreFailed.to_http_response(e.to_string()).into_response()
        }
    }
}
