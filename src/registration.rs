//! Registration workflow.
//!
//! A registration stages the uploaded photo, checks that neither the
//! username nor the email is taken, stores a cover-fit copy of the photo
//! under the next free `photo{index}` name and finally inserts the user.
//! Whatever happens, the staged upload is removed. When the insert fails
//! after the photo was written, the photo is removed as well.
//!
//! Steps touching one username run one at a time, see [`UsernameLocks`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use image_processor::Format;
use serde::Serialize;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::clock::Clock;
use crate::config::Storage;
use crate::error::{Result, ServerError, ToInternal};
use crate::locks::UsernameLocks;
use crate::photo;
use crate::storage::{BlobDirectory, Resize, StorageError};
use crate::user::{User, UserStore};

pub const SUCCESS_MESSAGE: &str = "User registered successfully";

/// Uploaded photo, as received.
///
/// Only the file name shows up in validation error parameters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhotoUpload {
    /// Name of the file on the client, used for its extension.
    pub file_name: String,
    #[serde(skip)]
    pub bytes: Bytes,
}

/// Raw registration fields. Any of them may be missing.
#[derive(Debug, Default, Validate)]
pub struct RegistrationForm {
    #[validate(
        required(message = "Username is required."),
        length(
            min = 1,
            max = 32,
            message = "Username must be 1 to 32 characters long."
        ),
        custom(function = "validate_username")
    )]
    pub username: Option<String>,
    #[validate(
        required(message = "Email is required."),
        length(max = 254, message = "Email is too long."),
        email(message = "Email must be formatted.")
    )]
    pub email: Option<String>,
    #[validate(
        required(message = "Photo is required."),
        custom(function = "validate_photo")
    )]
    pub photo: Option<PhotoUpload>,
}

/// Checked registration request.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub photo: PhotoUpload,
}

impl RegistrationForm {
    /// Validate every field. No I/O happens here.
    pub fn validated(self) -> Result<Registration> {
        self.validate()?;

        match (self.username, self.email, self.photo) {
            (Some(username), Some(email), Some(photo)) => Ok(Registration {
                username,
                email,
                photo,
            }),
            _ => Err(ServerError::Validation(ValidationErrors::new())),
        }
    }
}

/// Username ends up in a file name split on `-`.
fn validate_username(username: &str) -> std::result::Result<(), ValidationError> {
    if username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(ValidationError::new("username").with_message(
            "Username must only contain letters, digits and underscores.".into(),
        ))
    }
}

fn validate_photo(photo: &PhotoUpload) -> std::result::Result<(), ValidationError> {
    if photo.bytes.is_empty() {
        return Err(ValidationError::new("photo")
            .with_message("Photo must not be empty.".into()));
    }

    if Format::from_extension(&photo::extension(&photo.file_name)).is_none() {
        return Err(ValidationError::new("photo")
            .with_message("Photo must be a PNG, JPEG or WebP file.".into()));
    }

    Ok(())
}

/// Stored photo, ready to be served.
#[derive(Debug, Clone)]
pub struct Photo {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Registration manager.
pub struct RegistrationService {
    users: Arc<dyn UserStore>,
    blobs: Arc<dyn BlobDirectory>,
    clock: Arc<dyn Clock>,
    locks: UsernameLocks,
    size: Resize,
    timeout: Duration,
}

impl RegistrationService {
    /// Create a new [`RegistrationService`].
    pub fn new(
        users: Arc<dyn UserStore>,
        blobs: Arc<dyn BlobDirectory>,
        clock: Arc<dyn Clock>,
        storage: &Storage,
    ) -> Self {
        Self {
            users,
            blobs,
            clock,
            locks: UsernameLocks::new(),
            size: Resize {
                width: storage.width,
                height: storage.height,
            },
            timeout: storage.timeout(),
        }
    }

    /// Register a user and store their photo.
    pub async fn register(&self, registration: Registration) -> Result<&'static str> {
        let Registration {
            username,
            email,
            photo,
        } = registration;
        let extension = photo::extension(&photo.file_name);

        let upload = self.blobs.stage_upload(&photo.bytes).await?;
        // Removes the staged upload even if this future is dropped.
        let mut cleanup = Cleanup::new(Arc::clone(&self.blobs));
        cleanup.track(upload.clone());

        let result = {
            let _guard = self.locks.acquire(&username).await;
            self.store(&username, &email, &upload, &extension, &mut cleanup)
                .await
        };

        cleanup.run().await;

        match &result {
            Ok(destination) => {
                tracing::info!(
                    %username,
                    photo = %destination.display(),
                    "user registered"
                );
                metrics::counter!("registrations_total", "outcome" => "created")
                    .increment(1);
            },
            Err(ServerError::Conflict) => {
                tracing::debug!(%username, "username or email already taken");
                metrics::counter!("registrations_total", "outcome" => "conflict")
                    .increment(1);
            },
            Err(_) => {
                metrics::counter!("registrations_total", "outcome" => "failed")
                    .increment(1);
            },
        }

        result.map(|_| SUCCESS_MESSAGE)
    }

    async fn store(
        &self,
        username: &str,
        email: &str,
        upload: &Path,
        extension: &str,
        cleanup: &mut Cleanup,
    ) -> Result<PathBuf> {
        let existing = self.users.find_by_username_or_email(username, email).await?;
        if !existing.is_empty() {
            return Err(ServerError::Conflict);
        }

        self.blobs.ensure_root().await?;

        let entries = bounded(
            self.timeout,
            "listing photos took too long",
            self.blobs.list_entries(),
        )
        .await?;
        let index = photo::next_index(&entries, username, extension);
        let file_name =
            photo::file_name(self.clock.now_millis(), username, index, extension);

        let destination = bounded(
            self.timeout,
            "resizing photo took too long",
            self.blobs.write_resized_image(upload, &file_name, self.size),
        )
        .await?;
        // Removed unless the user row lands.
        cleanup.track(destination.clone());

        let user = User {
            username: username.to_owned(),
            email: email.to_owned(),
            photo_path: destination.display().to_string(),
        };
        self.users.insert(&user).await?;
        cleanup.keep(&destination);

        Ok(destination)
    }

    /// Name of the first stored photo of `username`.
    pub async fn find_photo(&self, username: &str) -> Result<String> {
        let entries = bounded(
            self.timeout,
            "listing photos took too long",
            self.blobs.list_entries(),
        )
        .await?;

        photo::find_first(&entries, username)
            .map(ToOwned::to_owned)
            .ok_or(ServerError::NotFound)
    }

    /// Read the first stored photo of `username`.
    pub async fn photo(&self, username: &str) -> Result<Photo> {
        let file_name = self.find_photo(username).await?;
        let bytes = self.blobs.read(&file_name).await?;
        let content_type = Format::from_extension(&photo::extension(&file_name))
            .map_or("application/octet-stream", Format::mime_type);

        Ok(Photo {
            bytes,
            content_type,
        })
    }
}

/// Files to remove once a registration is over.
///
/// Dropping it with files left, when the request is cancelled, removes them
/// on a background task.
struct Cleanup {
    blobs: Arc<dyn BlobDirectory>,
    paths: Vec<PathBuf>,
}

impl Cleanup {
    fn new(blobs: Arc<dyn BlobDirectory>) -> Self {
        Self {
            blobs,
            paths: Vec::new(),
        }
    }

    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn keep(&mut self, path: &Path) {
        self.paths.retain(|tracked| tracked != path);
    }

    async fn run(mut self) {
        let paths = std::mem::take(&mut self.paths);
        discard_all(self.blobs.as_ref(), &paths).await;
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if self.paths.is_empty() {
            return;
        }

        let paths = std::mem::take(&mut self.paths);
        let blobs = Arc::clone(&self.blobs);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    discard_all(blobs.as_ref(), &paths).await;
                });
            },
            Err(err) => tracing::warn!(
                error = %err,
                files = paths.len(),
                "cannot remove files of a cancelled registration"
            ),
        }
    }
}

/// Best-effort removal. Failures are only logged.
async fn discard_all(blobs: &dyn BlobDirectory, paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = blobs.delete_file(path).await {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "cannot remove file"
            );
        }
    }
}

async fn bounded<T, F>(limit: Duration, details: &str, future: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, StorageError>>,
{
    Ok(tokio::time::timeout(limit, future).await.catch(details)??)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::fixtures::{self, Workspace};
    use crate::user::MemoryUserStore;
    use image::GenericImageView;

    const NOW: i64 = 1_718_000_000_000;

    fn service(workspace: &Workspace, users: Arc<MemoryUserStore>) -> RegistrationService {
        RegistrationService::new(
            users,
            Arc::new(workspace.blobs()),
            Arc::new(FixedClock::new(NOW)),
            &workspace.storage(),
        )
    }

    fn registration(username: &str, email: &str, file_name: &str) -> Registration {
        RegistrationForm {
            username: Some(username.into()),
            email: Some(email.into()),
            photo: Some(PhotoUpload {
                file_name: file_name.into(),
                bytes: fixtures::png(640, 480).into(),
            }),
        }
        .validated()
        .unwrap()
    }

    #[tokio::test]
    async fn test_register() {
        let workspace = Workspace::new();
        let users = Arc::new(MemoryUserStore::new());
        let service = service(&workspace, Arc::clone(&users));

        let message = service
            .register(registration("alice", "alice@example.com", "me.png"))
            .await
            .unwrap();
        assert_eq!(message, SUCCESS_MESSAGE);

        let expected = format!("{NOW}-alice-photo1.png");
        assert_eq!(workspace.photos(), [expected.clone()]);
        assert_eq!(
            users.users(),
            vec![User {
                username: "alice".into(),
                email: "alice@example.com".into(),
                photo_path: workspace
                    .storage()
                    .directory
                    .join(&expected)
                    .display()
                    .to_string(),
            }]
        );

        let stored = std::fs::read(workspace.storage().directory.join(&expected)).unwrap();
        let img = image::load_from_memory(&stored).unwrap();
        assert_eq!(img.dimensions(), (300, 300));
        assert!(workspace.staged().is_empty());
    }

    #[tokio::test]
    async fn test_register_duplicate_username() {
        let workspace = Workspace::new();
        let users = Arc::new(MemoryUserStore::new());
        let service = service(&workspace, Arc::clone(&users));

        service
            .register(registration("alice", "alice@example.com", "me.png"))
            .await
            .unwrap();
        let result = service
            .register(registration("alice", "other@example.com", "me.png"))
            .await;

        assert!(matches!(result, Err(ServerError::Conflict)));
        assert_eq!(users.users().len(), 1);
        assert_eq!(workspace.photos().len(), 1);
        assert!(workspace.staged().is_empty());
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let workspace = Workspace::new();
        let users = Arc::new(MemoryUserStore::new());
        let service = service(&workspace, Arc::clone(&users));

        service
            .register(registration("alice", "alice@example.com", "me.png"))
            .await
            .unwrap();
        let result = service
            .register(registration("bob", "alice@example.com", "me.jpg"))
            .await;

        assert!(matches!(result, Err(ServerError::Conflict)));
        assert_eq!(users.users().len(), 1);
        assert!(workspace.staged().is_empty());
    }

    #[tokio::test]
    async fn test_register_next_index() {
        let workspace = Workspace::new();
        workspace.add_photo("t1-alice-photo1.png");
        workspace.add_photo("t2-alice-photo3.png");
        workspace.add_photo("t3-alice-photo8.jpg");
        let service = service(&workspace, Arc::new(MemoryUserStore::new()));

        service
            .register(registration("alice", "alice@example.com", "me.png"))
            .await
            .unwrap();

        assert!(workspace.photos().contains(&format!("{NOW}-alice-photo4.png")));
    }

    #[tokio::test]
    async fn test_register_first_index() {
        let workspace = Workspace::new();
        workspace.add_photo("t1-alice-photo1.png");
        let service = service(&workspace, Arc::new(MemoryUserStore::new()));

        service
            .register(registration("bob", "bob@example.com", "bob.png"))
            .await
            .unwrap();

        assert!(workspace.photos().contains(&format!("{NOW}-bob-photo1.png")));
    }

    #[tokio::test]
    async fn test_register_keeps_extension_case() {
        let workspace = Workspace::new();
        let service = service(&workspace, Arc::new(MemoryUserStore::new()));

        service
            .register(registration("bob", "bob@example.com", "holiday.JPG"))
            .await
            .unwrap();

        assert_eq!(workspace.photos(), [format!("{NOW}-bob-photo1.JPG")]);
    }

    #[tokio::test]
    async fn test_insert_failure_removes_photo() {
        let workspace = Workspace::new();
        let service = service(&workspace, Arc::new(MemoryUserStore::with_broken_insert()));

        let result = service
            .register(registration("alice", "alice@example.com", "me.png"))
            .await;

        assert!(matches!(result, Err(ServerError::Internal { .. })));
        assert!(workspace.photos().is_empty());
        assert!(workspace.staged().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_image_is_internal() {
        let workspace = Workspace::new();
        let users = Arc::new(MemoryUserStore::new());
        let service = service(&workspace, Arc::clone(&users));

        let mut registration = registration("alice", "alice@example.com", "me.png");
        registration.photo.bytes = Bytes::from_static(b"not a png at all");

        let result = service.register(registration).await;

        assert!(matches!(result, Err(ServerError::Storage(StorageError::Image(_)))));
        assert!(users.users().is_empty());
        assert!(workspace.photos().is_empty());
        assert!(workspace.staged().is_empty());
    }

    #[tokio::test]
    async fn test_parallel_registrations_same_username() {
        let workspace = Workspace::new();
        let users = Arc::new(MemoryUserStore::new());
        let service = Arc::new(service(&workspace, Arc::clone(&users)));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service
                        .register(registration(
                            "alice",
                            &format!("alice{i}@example.com"),
                            "me.png",
                        ))
                        .await
                })
            })
            .collect();

        let mut created = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(ServerError::Conflict) => conflicts += 1,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        assert_eq!((created, conflicts), (1, 7));
        assert_eq!(users.users().len(), 1);
        assert_eq!(workspace.photos().len(), 1);
        assert!(workspace.staged().is_empty());
    }

    #[tokio::test]
    async fn test_parallel_registrations_same_email() {
        let workspace = Workspace::new();
        let users = Arc::new(MemoryUserStore::new());
        let service = Arc::new(service(&workspace, Arc::clone(&users)));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service
                        .register(registration(
                            &format!("user{i}"),
                            "shared@example.com",
                            "me.png",
                        ))
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(ServerError::Conflict) => (),
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(users.users().len(), 1);
        // Losers of the insert race have their photo removed.
        assert_eq!(workspace.photos().len(), 1);
        assert!(workspace.staged().is_empty());
    }

    /// Wait for background removal of a cancelled registration.
    async fn settled(workspace: &Workspace) {
        for _ in 0..100 {
            if workspace.staged().is_empty() && workspace.photos().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting_removes_upload() {
        let workspace = Workspace::new();
        let users = Arc::new(MemoryUserStore::new());
        let service = service(&workspace, Arc::clone(&users));

        let guard = service.locks.acquire("alice").await;
        let result = tokio::time::timeout(
            Duration::from_millis(100),
            service.register(registration("alice", "alice@example.com", "me.png")),
        )
        .await;
        assert!(result.is_err());
        drop(guard);

        settled(&workspace).await;
        assert!(workspace.staged().is_empty());
        assert!(workspace.photos().is_empty());
        assert_eq!(users.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_insert_removes_photo() {
        let workspace = Workspace::new();
        let users = Arc::new(MemoryUserStore::with_stalled_insert());
        let service = service(&workspace, Arc::clone(&users));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            service.register(registration("alice", "alice@example.com", "me.png")),
        )
        .await;
        assert!(result.is_err());

        settled(&workspace).await;
        assert!(workspace.staged().is_empty());
        assert!(workspace.photos().is_empty());
        assert!(users.users().is_empty());
    }

    #[tokio::test]
    async fn test_find_photo() {
        let workspace = Workspace::new();
        workspace.add_photo("200-alice-photo2.png");
        workspace.add_photo("100-alice-photo1.png");
        workspace.add_photo("50-carolyn-photo1.png");
        let service = service(&workspace, Arc::new(MemoryUserStore::new()));

        assert_eq!(
            service.find_photo("alice").await.unwrap(),
            "100-alice-photo1.png"
        );
        assert!(matches!(
            service.find_photo("carol").await,
            Err(ServerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_find_photo_without_directory() {
        let workspace = Workspace::new();
        let service = service(&workspace, Arc::new(MemoryUserStore::new()));

        assert!(matches!(
            service.find_photo("carol").await,
            Err(ServerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_photo_content_type() {
        let workspace = Workspace::new();
        let service = service(&workspace, Arc::new(MemoryUserStore::new()));
        service
            .register(registration("alice", "alice@example.com", "me.webp"))
            .await
            .unwrap();

        let photo = service.photo("alice").await.unwrap();
        assert_eq!(photo.content_type, "image/webp");
        assert_eq!(
            image::load_from_memory(&photo.bytes).unwrap().dimensions(),
            (300, 300)
        );
    }

    #[test]
    fn test_missing_fields() {
        let Err(ServerError::Validation(errors)) =
            RegistrationForm::default().validated()
        else {
            panic!("missing fields must not validate");
        };

        let fields = errors.field_errors();
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("photo"));
    }

    #[test]
    fn test_invalid_fields() {
        let form = |username: &str, email: &str, file_name: &str, bytes: &'static [u8]| {
            RegistrationForm {
                username: Some(username.into()),
                email: Some(email.into()),
                photo: Some(PhotoUpload {
                    file_name: file_name.into(),
                    bytes: Bytes::from_static(bytes),
                }),
            }
            .validated()
        };

        assert!(form("alice", "alice@example.com", "me.png", b"\x89PNG").is_ok());
        let cases: [(&str, &str, &str, &'static [u8]); 8] = [
            ("", "alice@example.com", "me.png", b"\x89PNG"),
            ("al-ice", "alice@example.com", "me.png", b"\x89PNG"),
            ("../alice", "alice@example.com", "me.png", b"\x89PNG"),
            ("alice", "", "me.png", b"\x89PNG"),
            ("alice", "not-an-email", "me.png", b"\x89PNG"),
            ("alice", "alice@example.com", "me", b"\x89PNG"),
            ("alice", "alice@example.com", "me.gif", b"GIF89a"),
            ("alice", "alice@example.com", "me.png", b""),
        ];
        for (username, email, file_name, bytes) in cases {
            assert!(
                matches!(
                    form(username, email, file_name, bytes),
                    Err(ServerError::Validation(_))
                ),
                "{username:?} {email:?} {file_name:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_rejected_photo_params_omit_bytes() {
        let Err(ServerError::Validation(errors)) = RegistrationForm {
            username: Some("alice".into()),
            email: Some("alice@example.com".into()),
            photo: Some(PhotoUpload {
                file_name: "me.gif".into(),
                bytes: Bytes::from_static(b"GIF89a"),
            }),
        }
        .validated() else {
            panic!("gif must not validate");
        };

        let issue = &errors.field_errors()["photo"][0];
        assert_eq!(
            issue.params["value"],
            serde_json::json!({ "file_name": "me.gif" })
        );
    }
}
