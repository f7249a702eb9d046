use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;

use crate::AppState;
use crate::error::Result;

/// Serve the first stored photo of a user.
pub async fn handler(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse> {
    let photo = state.registration.photo(&username).await?;

    Ok(([(header::CONTENT_TYPE, photo.content_type)], photo.bytes))
}
