mod repository;

pub use repository::*;

use serde::{Deserialize, Serialize};

/// User as saved on database.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow,
)]
pub struct User {
    pub username: String,
    pub email: String,
    /// Location of the stored photo in the blob directory.
    pub photo_path: String,
}
