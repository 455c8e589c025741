// src/utils/upload.rs

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::utils::form::UploadedFile;

/// Size cap for post/comment attachments.
pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;
/// Size cap for profile pictures.
pub const MAX_PROFILE_PICTURE_BYTES: usize = 2 * 1024 * 1024;

/// Public URL prefix under which the upload root is served.
pub const PUBLIC_PREFIX: &str = "/static";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureKind {
    Attached,
    Profile,
}

impl PictureKind {
    fn dir(self) -> &'static str {
        match self {
            PictureKind::Attached => "uploads/attached_pictures",
            PictureKind::Profile => "uploads/profile_pictures",
        }
    }

    fn for_url(url: &str) -> Self {
        let profile_prefix = format!("{}/{}/", PUBLIC_PREFIX, PictureKind::Profile.dir());
        if url.starts_with(&profile_prefix) {
            PictureKind::Profile
        } else {
            PictureKind::Attached
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Jpeg,
    Png,
    Webp,
}

impl ImageType {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "image/jpeg" => Some(ImageType::Jpeg),
            "image/png" => Some(ImageType::Png),
            "image/webp" => Some(ImageType::Webp),
            _ => None,
        }
    }

    fn default_extension(self) -> &'static str {
        match self {
            ImageType::Jpeg => "jpg",
            ImageType::Png => "png",
            ImageType::Webp => "webp",
        }
    }

    /// Keeps the client's extension when it is a known image extension.
    fn extension_for(self, file_name: Option<&str>) -> String {
        file_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|ext| matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "webp"))
            .unwrap_or_else(|| self.default_extension().to_string())
    }
}

/// Returns the image type when the file is an allowed type and within `max_bytes`.
pub fn accept_picture(file: &UploadedFile, max_bytes: usize) -> Option<ImageType> {
    if file.data.len() > max_bytes {
        return None;
    }
    file.content_type
        .as_deref()
        .and_then(ImageType::from_content_type)
}

/// Filesystem-backed picture storage rooted at the static directory.
///
/// Writes and removals are never part of a database transaction; removal is
/// best-effort and only logs failures.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for kind in [PictureKind::Attached, PictureKind::Profile] {
            tokio::fs::create_dir_all(self.root.join(kind.dir())).await?;
        }
        Ok(())
    }

    fn public_url(kind: PictureKind, filename: &str) -> String {
        format!("{}/{}/{}", PUBLIC_PREFIX, kind.dir(), filename)
    }

    /// Maps a public URL back to its file, using only the basename.
    fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let filename = Path::new(url).file_name()?;
        Some(self.root.join(PictureKind::for_url(url).dir()).join(filename))
    }

    /// Writes one already-accepted picture and returns its public URL.
    pub async fn save(
        &self,
        kind: PictureKind,
        name_prefix: &str,
        image_type: ImageType,
        file: &UploadedFile,
    ) -> std::io::Result<String> {
        let filename = format!(
            "{}_{}.{}",
            name_prefix,
            Uuid::new_v4(),
            image_type.extension_for(file.file_name.as_deref())
        );
        tokio::fs::write(self.root.join(kind.dir()).join(&filename), &file.data).await?;
        Ok(Self::public_url(kind, &filename))
    }

    /// Saves the acceptable attachments and silently skips the rest
    /// (oversized, wrong type or failed write).
    pub async fn save_attachments(&self, name_prefix: &str, files: &[UploadedFile]) -> Vec<String> {
        let mut urls = Vec::with_capacity(files.len());
        for file in files {
            let Some(image_type) = accept_picture(file, MAX_ATTACHMENT_BYTES) else {
                tracing::debug!(
                    "Skipping attachment {:?} ({:?}, {} bytes)",
                    file.file_name,
                    file.content_type,
                    file.data.len()
                );
                continue;
            };
            match self
                .save(PictureKind::Attached, name_prefix, image_type, file)
                .await
            {
                Ok(url) => urls.push(url),
                Err(e) => tracing::error!("Error saving attachment: {}", e),
            }
        }
        urls
    }

    pub async fn remove(&self, url: &str) {
        let Some(path) = self.path_for_url(url) else {
            tracing::warn!("Ignoring picture URL without a filename: {}", url);
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!("Deleted picture {}", path.display()),
            Err(e) => tracing::warn!("Error deleting file {}: {}", path.display(), e),
        }
    }

    pub async fn remove_all(&self, urls: &[String]) {
        for url in urls {
            self.remove(url).await;
        }
    }
}
