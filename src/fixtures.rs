//! Shared test fixtures.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

use crate::AppState;
use crate::clock::FixedClock;
use crate::config::{Configuration, Storage};
use crate::registration::RegistrationService;
use crate::storage::LocalDirectory;
use crate::user::MemoryUserStore;

const BOUNDARY: &str = "portrait-test-boundary";
const NOW: i64 = 1_700_000_000_000;

/// Encode a plain PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut output = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut output, ImageFormat::Png)
        .unwrap();
    output.into_inner()
}

/// Temporary photo and staging directories.
pub struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            tmp: tempfile::tempdir().unwrap(),
        }
    }

    pub fn storage(&self) -> Storage {
        Storage {
            directory: self.tmp.path().join("photos"),
            staging: self.tmp.path().join("uploads"),
            ..Storage::default()
        }
    }

    pub fn blobs(&self) -> LocalDirectory {
        let storage = self.storage();
        LocalDirectory::new(storage.directory, storage.staging)
    }

    /// Put an already stored photo in place.
    pub fn add_photo(&self, file_name: &str) {
        let directory = self.storage().directory;
        std::fs::create_dir_all(&directory).unwrap();
        std::fs::write(directory.join(file_name), png(8, 8)).unwrap();
    }

    /// Stored photo names, sorted.
    pub fn photos(&self) -> Vec<String> {
        list(&self.storage().directory)
    }

    /// Application state over this workspace and `users`.
    pub fn state(&self, users: Arc<MemoryUserStore>) -> AppState {
        let mut config = Configuration::default();
        config.storage = self.storage();
        let registration = RegistrationService::new(
            users.clone(),
            Arc::new(self.blobs()),
            Arc::new(FixedClock::new(NOW)),
            &config.storage,
        );

        AppState {
            config: Arc::new(config),
            users,
            registration: Arc::new(registration),
            metrics: None,
        }
    }

    /// Uploads still waiting in the staging directory.
    pub fn staged(&self) -> Vec<String> {
        list(&self.storage().staging)
    }
}

fn list(directory: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(directory) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

/// One `multipart/form-data` part.
pub struct Part<'a> {
    name: &'a str,
    file_name: Option<&'a str>,
    content: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            file_name: None,
            content: value.as_bytes(),
        }
    }

    pub fn file(name: &'a str, file_name: &'a str, content: &'a [u8]) -> Self {
        Self {
            name,
            file_name: Some(file_name),
            content,
        }
    }
}

/// Encode parts, returning the `Content-Type` header and the body.
pub fn multipart(parts: &[Part<'_>]) -> (String, Vec<u8>) {
    let mut body = Vec::new();

    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    part.name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    part.name
                )
                .as_bytes(),
            ),
        }
        body.extend_from_slice(part.content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}
