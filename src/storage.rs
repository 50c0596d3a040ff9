//! Photo uploads for service orders, stored on local disk and served under
//! `/uploads`.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::auth::new_id;

pub const PUBLIC_PREFIX: &str = "/uploads";
pub const PLACEHOLDER_URL: &str = "/static/photo-unavailable.svg";
const MAX_NAME_LEN: usize = 80;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("empty upload")]
    Empty,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct PhotoStorage {
    root: PathBuf,
}

impl PhotoStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the file and returns its public URL.
    pub async fn upload(
        &self,
        owner: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::Empty);
        }

        let owner = sanitize_name(owner);
        let stored_name = format!("{}_{}", new_id(), sanitize_name(file_name));
        let dir = self.root.join(&owner);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&stored_name), bytes).await?;

        Ok(format!("{PUBLIC_PREFIX}/{owner}/{stored_name}"))
    }

    /// Upload with the placeholder URL standing in when the write fails.
    /// Empty bodies are still rejected.
    pub async fn upload_or_placeholder(
        &self,
        owner: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        match self.upload(owner, file_name, bytes).await {
            Ok(url) => Ok(url),
            Err(StorageError::Empty) => Err(StorageError::Empty),
            Err(err) => {
                log::warn!("Photo upload failed, storing placeholder: {err}");
                Ok(PLACEHOLDER_URL.to_string())
            }
        }
    }
}

/// Keeps ASCII alphanumerics, dots, dashes and underscores; everything else
/// becomes `_`. Leading dots are stripped so names never escape the folder.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "photo".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_flattened() {
        assert_eq!(sanitize_name("kitchen door.jpg"), "kitchen_door.jpg");
        assert_eq!(sanitize_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_name("..."), "photo");
        assert_eq!(sanitize_name(""), "photo");
    }

    #[tokio::test]
    async fn upload_writes_under_owner_folder() {
        let dir = tempfile::tempdir().unwrap();
        let storage = PhotoStorage::new(dir.path().to_path_buf());

        let url = storage.upload("user-1", "front.png", b"png").await.unwrap();
        assert!(url.starts_with("/uploads/user-1/"));
        assert!(url.ends_with("_front.png"));

        let relative = url.trim_start_matches("/uploads/");
        let written = tokio::fs::read(dir.path().join(relative)).await.unwrap();
        assert_eq!(written, b"png");
    }

    #[tokio::test]
    async fn same_name_uploads_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let storage = PhotoStorage::new(dir.path().to_path_buf());

        let (first, second) = tokio::join!(
            storage.upload("user-1", "door.jpg", b"first"),
            storage.upload("user-1", "door.jpg", b"second"),
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_ne!(first, second);

        for (url, bytes) in [(first, b"first".as_slice()), (second, b"second".as_slice())] {
            let relative = url.trim_start_matches("/uploads/");
            assert_eq!(tokio::fs::read(dir.path().join(relative)).await.unwrap(), bytes);
        }
    }

    #[tokio::test]
    async fn empty_uploads_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = PhotoStorage::new(dir.path().to_path_buf());
        assert!(matches!(
            storage.upload_or_placeholder("user-1", "a.png", b"").await,
            Err(StorageError::Empty)
        ));
    }

    #[tokio::test]
    async fn failed_writes_fall_back_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the root directory should be.
        let blocked = dir.path().join("not-a-dir");
        std::fs::write(&blocked, b"x").unwrap();
        let storage = PhotoStorage::new(blocked);

        assert!(storage.upload("user-1", "a.png", b"data").await.is_err());
        let url = storage
            .upload_or_placeholder("user-1", "a.png", b"data")
            .await
            .unwrap();
        assert_eq!(url, PLACEHOLDER_URL);
    }
}
