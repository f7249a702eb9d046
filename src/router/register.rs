use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::registration::{PhotoUpload, RegistrationForm};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub message: String,
}

/// Read `username`, `email` and `photo` parts. Other parts are skipped.
async fn read_form(mut multipart: Multipart) -> Result<RegistrationForm> {
    let mut form = RegistrationForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(ToOwned::to_owned);

        match name.as_deref() {
            Some("username") => form.username = Some(field.text().await?),
            Some("email") => form.email = Some(field.text().await?),
            Some("photo") => {
                let file_name =
                    field.file_name().unwrap_or_default().to_owned();
                form.photo = Some(PhotoUpload {
                    file_name,
                    bytes: field.bytes().await?,
                });
            },
            _ => (),
        }
    }

    Ok(form)
}

/// Handler to register a user with their photo.
pub async fn handler(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<Response>> {
    let multipart =
        multipart.map_err(|err| ServerError::ParsingForm(Box::new(err)))?;
    let registration = read_form(multipart).await?.validated()?;

    let message = state.registration.register(registration).await?;

    Ok(Json(Response {
        message: message.to_owned(),
    }))
}
