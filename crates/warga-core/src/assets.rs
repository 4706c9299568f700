//! Avatar upload preparation.
//!
//! Size checks happen here, before the provider is ever called.

use crate::error::{SessionError, SessionResult};

/// Avatar file picked by the user.
#[derive(Clone, PartialEq, Eq)]
pub struct AvatarUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for AvatarUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarUpload")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl AvatarUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Rejects files larger than `limit` bytes.
    ///
    /// # Errors
    /// Returns [`SessionError::AssetTooLarge`] when the file is over the limit.
    pub fn validate(&self, limit: usize) -> SessionResult<()> {
        if self.bytes.len() > limit {
            return Err(SessionError::AssetTooLarge {
                size: self.bytes.len(),
                limit,
            });
        }
        Ok(())
    }

    /// Lowercased file extension, `bin` when there is none.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map_or_else(|| "bin".to_string(), str::to_ascii_lowercase)
    }

    pub fn content_type(&self) -> &'static str {
        match self.extension().as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "webp" => "image/webp",
            "gif" => "image/gif",
            _ => "application/octet-stream",
        }
    }

    /// Object path: `avatars/<identity id>-<unix millis>.<ext>`.
    pub fn storage_path(&self, identity_id: &str, now_millis: u64) -> String {
        format!("avatars/{identity_id}-{now_millis}.{}", self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_AVATAR_BYTES;

    #[test]
    fn limit_is_inclusive() {
        let exact = AvatarUpload::new("a.png", vec![0; DEFAULT_MAX_AVATAR_BYTES]);
        assert!(exact.validate(DEFAULT_MAX_AVATAR_BYTES).is_ok());

        let over = AvatarUpload::new("a.png", vec![0; DEFAULT_MAX_AVATAR_BYTES + 1]);
        assert_eq!(
            over.validate(DEFAULT_MAX_AVATAR_BYTES),
            Err(SessionError::AssetTooLarge {
                size: DEFAULT_MAX_AVATAR_BYTES + 1,
                limit: DEFAULT_MAX_AVATAR_BYTES,
            })
        );
    }

    #[test]
    fn storage_path_uses_identity_time_and_extension() {
        let upload = AvatarUpload::new("Foto Saya.JPG", vec![1, 2, 3]);
        assert_eq!(
            upload.storage_path("u1", 1_714_550_400_000),
            "avatars/u1-1714550400000.jpg"
        );
        assert_eq!(upload.content_type(), "image/jpeg");
    }

    #[test]
    fn missing_extension_falls_back_to_bin() {
        let upload = AvatarUpload::new("avatar", vec![]);
        assert_eq!(upload.extension(), "bin");
        assert_eq!(upload.content_type(), "application/octet-stream");
    }

    #[test]
    fn debug_hides_file_contents() {
        let upload = AvatarUpload::new("a.png", vec![7; 4]);
        assert_eq!(
            format!("{upload:?}"),
            "AvatarUpload { file_name: \"a.png\", len: 4 }"
        );
    }
}
