//! Stored photo naming scheme.
//!
//! A stored photo is named `{timestamp}-{username}-photo{index}{extension}`,
//! e.g. `1718000000000-alice-photo2.png`. Only names made of exactly three
//! hyphen-separated parts take part in index derivation and lookup.

use std::cmp::Ordering;
use std::path::Path;

const PHOTO_PREFIX: &str = "photo";

/// A directory entry that follows the stored photo naming scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoName<'a> {
    pub timestamp: &'a str,
    pub username: &'a str,
    /// Third component, `photo{index}{extension}`.
    pub tail: &'a str,
}

impl<'a> PhotoName<'a> {
    /// Split an entry name. Returns `None` unless it has exactly three
    /// hyphen-separated parts.
    pub fn parse(name: &'a str) -> Option<Self> {
        let mut parts = name.split('-');
        let (Some(timestamp), Some(username), Some(tail), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };

        Some(Self {
            timestamp,
            username,
            tail,
        })
    }

    /// Index of this photo when it was stored with `extension`.
    pub fn index(&self, extension: &str) -> Option<u32> {
        let digits = self
            .tail
            .strip_prefix(PHOTO_PREFIX)?
            .strip_suffix(extension)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        digits.parse().ok()
    }
}

/// Extension of a file name, leading dot included (`.png`).
///
/// Empty when there is none. Dot-files such as `.profile` have no extension.
pub fn extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// Next free photo index for `username` and `extension` among `entries`.
///
/// It is one more than the highest index in use, `1` when none is.
pub fn next_index<S: AsRef<str>>(
    entries: &[S],
    username: &str,
    extension: &str,
) -> u32 {
    entries
        .iter()
        .map(|entry| AsRef::<str>::as_ref(entry))
        .filter(|entry| self::extension(entry) == extension)
        .filter_map(PhotoName::parse)
        .filter(|name| name.username == username)
        .filter_map(|name| name.index(extension))
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

/// Build a stored photo file name.
pub fn file_name(
    timestamp: i64,
    username: &str,
    index: u32,
    extension: &str,
) -> String {
    format!("{timestamp}-{username}-{PHOTO_PREFIX}{index}{extension}")
}

/// First stored photo of `username`.
///
/// Entries are ordered by their embedded timestamp, oldest first, so the
/// result does not depend on directory listing order. Entries with a
/// non-numeric timestamp come last, ties are broken by name.
pub fn find_first<'a, S: AsRef<str>>(
    entries: &'a [S],
    username: &str,
) -> Option<&'a str> {
    entries
        .iter()
        .map(|entry| AsRef::<str>::as_ref(entry))
        .filter_map(|entry| PhotoName::parse(entry).map(|name| (entry, name)))
        .filter(|(_, name)| name.username == username)
        .min_by(|(a, a_name), (b, b_name)| {
            let a_time = a_name.timestamp.parse::<u64>().ok();
            let b_time = b_name.timestamp.parse::<u64>().ok();

            let by_time = match (a_time, b_time) {
                (Some(a_time), Some(b_time)) => a_time.cmp(&b_time),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_time.then_with(|| a.cmp(b))
        })
        .map(|(entry, _)| entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            PhotoName::parse("1700-alice-photo2.png"),
            Some(PhotoName {
                timestamp: "1700",
                username: "alice",
                tail: "photo2.png",
            })
        );
        assert_eq!(PhotoName::parse("1700-alice"), None);
        assert_eq!(PhotoName::parse("1700-al-ice-photo2.png"), None);
        assert_eq!(PhotoName::parse("upload-3f2a"), None);
    }

    #[test]
    fn test_index() {
        let name = PhotoName::parse("t1-alice-photo12.png").unwrap();
        assert_eq!(name.index(".png"), Some(12));
        assert_eq!(name.index(".jpg"), None);

        let name = PhotoName::parse("t1-alice-avatar1.png").unwrap();
        assert_eq!(name.index(".png"), None);

        let name = PhotoName::parse("t1-alice-photo.png").unwrap();
        assert_eq!(name.index(".png"), None);

        let name = PhotoName::parse("t1-alice-photo+7.png").unwrap();
        assert_eq!(name.index(".png"), None);
    }

    #[test]
    fn test_next_index_ignores_signed_index() {
        let entries = ["t1-alice-photo2.png", "t2-alice-photo+7.png"];
        assert_eq!(next_index(&entries, "alice", ".png"), 3);
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("me.png"), ".png");
        assert_eq!(extension("archive.tar.JPG"), ".JPG");
        assert_eq!(extension("README"), "");
        assert_eq!(extension(".profile"), "");
    }

    #[test]
    fn test_next_index_after_highest() {
        let entries = ["t1-alice-photo1.png", "t2-alice-photo3.png"];
        assert_eq!(next_index(&entries, "alice", ".png"), 4);
    }

    #[test]
    fn test_next_index_without_prior_photo() {
        let entries = ["t1-alice-photo1.png"];
        assert_eq!(next_index(&entries, "bob", ".png"), 1);
        assert_eq!(next_index::<&str>(&[], "bob", ".png"), 1);
    }

    #[test]
    fn test_next_index_is_per_extension() {
        let entries = [
            "t1-alice-photo1.png",
            "t2-alice-photo7.jpg",
            "t3-alicia-photo9.png",
            "t4-x-alice-photo20.png",
            "upload-0a1b2c",
        ];
        assert_eq!(next_index(&entries, "alice", ".png"), 2);
        assert_eq!(next_index(&entries, "alice", ".jpg"), 8);
        assert_eq!(next_index(&entries, "alice", ".webp"), 1);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            file_name(1718000000000, "alice", 4, ".png"),
            "1718000000000-alice-photo4.png"
        );
    }

    #[test]
    fn test_find_first_missing_user() {
        let entries = ["t1-alice-photo1.png", "t2-carolyn-photo1.png"];
        assert_eq!(find_first(&entries, "carol"), None);
    }

    #[test]
    fn test_find_first_oldest_timestamp() {
        let entries = [
            "300-alice-photo3.png",
            "abc-alice-photo9.png",
            "100-alice-photo1.jpg",
            "200-alice-photo2.png",
            "50-bob-photo1.png",
        ];
        assert_eq!(find_first(&entries, "alice"), Some("100-alice-photo1.jpg"));

        let mut reversed = entries;
        reversed.reverse();
        assert_eq!(find_first(&reversed, "alice"), Some("100-alice-photo1.jpg"));
    }
}
