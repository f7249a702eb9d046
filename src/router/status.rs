//! Service health, backed by a database round trip.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub status: String,
    pub message: String,
    pub data: Option<Data>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub name: String,
    pub version: String,
}

/// Report whether PostgreSQL answers.
pub async fn handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<Status>) {
    match state.users.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Status {
                status: "success".into(),
                message: "Connected to database!".into(),
                data: Some(Data {
                    name: state.config.name.clone(),
                    version: state.config.version().to_owned(),
                }),
            }),
        ),
        Err(err) => {
            tracing::error!(error = %err, "database unreachable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Status {
                    status: "error".into(),
                    message: "Error connecting to database".into(),
                    data: None,
                }),
            )
        },
    }
}
