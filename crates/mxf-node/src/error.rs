// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use mxf_hub::HubError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("authentication failed")]
    Auth,

    #[error("{0}")]
    Hub(#[from] HubError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            NodeError::Auth => (StatusCode::UNAUTHORIZED, self.to_string()),
            NodeError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            NodeError::Hub(e) => match e {
                HubError::ChannelNotFound(_)
                | HubError::AgentNotFound(_)
                | HubError::TaskNotFound(_)
                | HubError::KeyNotFound(_)
                | HubError::RequestNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                HubError::ChannelExists(_) | HubError::AgentExists(_) => {
                    (StatusCode::CONFLICT, e.to_string())
                }
                HubError::InvalidTaskSpec(_) | HubError::TaskTerminal(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
                }
                HubError::AuthFailed => (StatusCode::UNAUTHORIZED, e.to_string()),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            },
        };
        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_maps_to_401() {
        let resp = NodeError::Auth.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn missing_channel_maps_to_404() {
        let resp = NodeError::Hub(HubError::ChannelNotFound("c1".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_spec_maps_to_422() {
        let resp = NodeError::Hub(HubError::InvalidTaskSpec("bad".into())).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
