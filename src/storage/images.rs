//! Screenshot persistence, bucketed by country: `{root}/{country}/{round}_{timestamp}.{ext}`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use image::ImageFormat;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::phash::phash_image;
use crate::geo::Gazetteer;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

pub const UNKNOWN_SEGMENT: &str = "unknown";
const DEFAULT_SEGMENT: &str = "default";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("malformed image payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredImage {
    pub path: PathBuf,
    pub phash: String,
}

/// Strict standard-alphabet base64, surrounding whitespace ignored.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, ImageError> {
    STANDARD
        .decode(payload.trim())
        .map_err(|err| ImageError::Malformed(format!("invalid base64: {err}")))
}

/// Identifies the encoded image format from its magic bytes.
pub fn sniff_format(bytes: &[u8]) -> Result<ImageFormat, ImageError> {
    image::guess_format(bytes)
        .map_err(|err| ImageError::Malformed(format!("unrecognized image format: {err}")))
}

/// Runs of characters outside `[A-Za-z0-9_-]` collapse to a single `-`.
pub fn safe_segment(value: Option<&str>) -> String {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return DEFAULT_SEGMENT.to_string();
    };

    let mut cleaned = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            cleaned.push(c);
            in_run = false;
        } else if !in_run {
            cleaned.push('-');
            in_run = true;
        }
    }

    if cleaned.is_empty() {
        DEFAULT_SEGMENT.to_string()
    } else {
        cleaned
    }
}

/// Directory name for a country label: a known code, an uppercased two-letter
/// label, or a sanitized free-text label.
pub fn country_segment(gazetteer: &Gazetteer, label: Option<&str>) -> String {
    let Some(label) = label.map(str::trim).filter(|v| !v.is_empty()) else {
        return UNKNOWN_SEGMENT.to_string();
    };
    if let Some(code) = gazetteer.find_code(label) {
        return code.to_string();
    }
    if label.len() == 2 && label.chars().all(|c| c.is_ascii_alphabetic()) {
        return label.to_ascii_uppercase();
    }
    safe_segment(Some(label))
}

#[derive(Clone)]
pub struct ImageStore {
    root: PathBuf,
    gazetteer: Arc<Gazetteer>,
}

impl ImageStore {
    pub fn new(root: PathBuf, gazetteer: Arc<Gazetteer>) -> Self {
        Self { root, gazetteer }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn save(
        &self,
        bytes: Vec<u8>,
        round_hint: Option<String>,
        country_hint: Option<String>,
    ) -> Result<StoredImage, ImageError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.save_blocking(&bytes, round_hint.as_deref(), country_hint.as_deref())
        })
        .await
        .map_err(|err| ImageError::Io(anyhow!("image save worker join failed: {err}")))?
    }

    /// Rejects bytes that do not decode as an image before touching disk.
    pub fn save_blocking(
        &self,
        bytes: &[u8],
        round_hint: Option<&str>,
        country_hint: Option<&str>,
    ) -> Result<StoredImage, ImageError> {
        let format = sniff_format(bytes)?;
        let img = image::load_from_memory_with_format(bytes, format)
            .map_err(|err| ImageError::Malformed(format!("undecodable image: {err}")))?;
        let phash = phash_image(&img);

        let folder = self
            .root
            .join(country_segment(&self.gazetteer, country_hint));
        fs::create_dir_all(&folder)
            .with_context(|| format!("failed to create image directory {}", folder.display()))?;

        let round_segment = match round_hint.filter(|r| !r.trim().is_empty()) {
            Some(round) => safe_segment(Some(round)),
            None => Uuid::new_v4().simple().to_string(),
        };
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let extension = format.extensions_str().first().copied().unwrap_or("png");
        let path = folder.join(format!("{round_segment}_{timestamp}.{extension}"));

        fs::write(&path, bytes)
            .with_context(|| format!("failed to write screenshot {}", path.display()))?;
        log_info!("Stored screenshot {} ({} bytes)", path.display(), bytes.len());

        Ok(StoredImage { path, phash })
    }

    pub async fn relocate(&self, existing: PathBuf, country: String) -> PathBuf {
        let store = self.clone();
        let fallback = existing.clone();
        match tokio::task::spawn_blocking(move || store.relocate_blocking(&existing, &country)).await {
            Ok(path) => path,
            Err(err) => {
                log_warn!("Screenshot relocation worker failed: {err}");
                fallback
            }
        }
    }

    /// Moves a stored screenshot into the bucket for `country`. Missing files
    /// and failed moves leave the path unchanged.
    pub fn relocate_blocking(&self, existing: &Path, country: &str) -> PathBuf {
        if country.trim().is_empty() || !existing.exists() {
            return existing.to_path_buf();
        }
        let Some(file_name) = existing.file_name() else {
            return existing.to_path_buf();
        };
        if !self.contains(existing) {
            log_warn!(
                "Refusing to move {}: not inside image store {}",
                existing.display(),
                self.root.display()
            );
            return existing.to_path_buf();
        }

        let target_dir = self
            .root
            .join(country_segment(&self.gazetteer, Some(country)));
        let target = target_dir.join(file_name);

        if let (Ok(src), Ok(dst_dir)) = (existing.canonicalize(), target_dir.canonicalize()) {
            if src == dst_dir.join(file_name) {
                return target;
            }
        }

        if let Err(err) = fs::create_dir_all(&target_dir) {
            log_warn!("Failed to create {}: {err}", target_dir.display());
            return existing.to_path_buf();
        }

        match fs::rename(existing, &target) {
            Ok(()) => target,
            Err(err) => {
                log_warn!(
                    "Failed to move screenshot {} to {}: {err}",
                    existing.display(),
                    target.display()
                );
                existing.to_path_buf()
            }
        }
    }

    /// Reverses a [`relocate`](Self::relocate) whose result was never persisted.
    pub async fn move_back(&self, moved: PathBuf, original: PathBuf) -> anyhow::Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.move_back_blocking(&moved, &original))
            .await
            .context("screenshot restore worker failed")?
    }

    pub fn move_back_blocking(&self, moved: &Path, original: &Path) -> anyhow::Result<()> {
        if moved == original {
            return Ok(());
        }
        if let Some(parent) = original.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to recreate {}", parent.display()))?;
        }
        fs::rename(moved, original).with_context(|| {
            format!(
                "failed to move screenshot {} back to {}",
                moved.display(),
                original.display()
            )
        })
    }

    /// Whether `path` resolves to a location under the store root. Paths that
    /// cannot be resolved count as outside.
    fn contains(&self, path: &Path) -> bool {
        match (path.canonicalize(), self.root.canonicalize()) {
            (Ok(path), Ok(root)) => path.starts_with(root),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::storage::phash::tests::png_bytes;

    fn store(root: &Path) -> ImageStore {
        let gazetteer = Gazetteer::builtin().unwrap();
        ImageStore::new(root.to_path_buf(), Arc::new(gazetteer))
    }

    #[test]
    fn sanitizes_segments() {
        assert_eq!(safe_segment(Some(" round 7/../x ")), "round-7-x");
        assert_eq!(safe_segment(Some("ok_id-1")), "ok_id-1");
        assert_eq!(safe_segment(Some("   ")), "default");
        assert_eq!(safe_segment(None), "default");
    }

    #[test]
    fn country_segments_prefer_codes() {
        let gazetteer = Gazetteer::builtin().unwrap();
        assert_eq!(country_segment(&gazetteer, Some("Germany")), "DE");
        assert_eq!(country_segment(&gazetteer, Some("fr")), "FR");
        assert_eq!(country_segment(&gazetteer, Some("xq")), "XQ");
        assert_eq!(country_segment(&gazetteer, Some("Atlantis Isles")), "Atlantis-Isles");
        assert_eq!(country_segment(&gazetteer, None), "unknown");
    }

    #[test]
    fn rejects_bad_payloads() {
        assert!(matches!(decode_base64("@@not base64@@"), Err(ImageError::Malformed(_))));
        assert!(matches!(sniff_format(b"GIF89a"), Ok(ImageFormat::Gif)));
        assert!(matches!(sniff_format(b"hello"), Err(ImageError::Malformed(_))));

        let dir = tempdir().unwrap();
        let result = store(dir.path()).save_blocking(b"plain text", Some("r1"), None);
        assert!(matches!(result, Err(ImageError::Malformed(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn saves_into_country_bucket_then_relocates() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let bytes = png_bytes(16, 16, 3);

        let stored = store
            .save(bytes.clone(), Some("r 1".into()), None)
            .await
            .unwrap();
        assert!(stored.path.starts_with(dir.path().join("unknown")));
        let name = stored.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("r-1_"), "{name}");
        assert!(name.ends_with(".png"));
        assert_eq!(fs::read(&stored.path).unwrap(), bytes);
        assert!(!stored.phash.is_empty());

        let moved = store.relocate(stored.path.clone(), "France".into()).await;
        assert_eq!(moved, dir.path().join("FR").join(&name));
        assert!(moved.exists());
        assert!(!stored.path.exists());

        // Already in place.
        assert_eq!(store.relocate_blocking(&moved, "FR"), moved);
    }

    #[test]
    fn relocating_missing_file_keeps_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nowhere.png");
        assert_eq!(store(dir.path()).relocate_blocking(&missing, "DE"), missing);
    }

    #[test]
    fn files_outside_the_store_are_never_moved() {
        let dir = tempdir().unwrap();
        let store = store(&dir.path().join("images"));
        store.save_blocking(&png_bytes(4, 4, 2), Some("r1"), None).unwrap();

        let outside = dir.path().join("notes.txt");
        fs::write(&outside, b"keep me").unwrap();
        assert_eq!(store.relocate_blocking(&outside, "FR"), outside);

        let sneaky = store.root().join("..").join("notes.txt");
        assert_eq!(store.relocate_blocking(&sneaky, "FR"), sneaky);

        assert_eq!(fs::read(&outside).unwrap(), b"keep me");
        assert!(!store.root().join("FR").exists());
    }

    #[test]
    fn move_back_restores_original_location() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let stored = store.save_blocking(&png_bytes(4, 4, 3), Some("r1"), None).unwrap();

        let moved = store.relocate_blocking(&stored.path, "JP");
        assert_ne!(moved, stored.path);
        // The unknown bucket is now empty; restoring must recreate it.
        fs::remove_dir(dir.path().join("unknown")).unwrap();

        store.move_back_blocking(&moved, &stored.path).unwrap();
        assert!(stored.path.exists());
        assert!(!moved.exists());
        assert!(store.move_back_blocking(&stored.path, &stored.path).is_ok());
    }

    #[test]
    fn decodes_standard_base64() {
        let bytes = png_bytes(4, 4, 1);
        let encoded = STANDARD.encode(&bytes);
        assert_eq!(decode_base64(&format!("  {encoded}\n")).unwrap(), bytes);
    }
}
