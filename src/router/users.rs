use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::Result;
use crate::user::User;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub users: Vec<User>,
}

/// List every registered user.
pub async fn handler(State(state): State<AppState>) -> Result<Json<Response>> {
    Ok(Json(Response {
        users: state.users.list().await?,
    }))
}
