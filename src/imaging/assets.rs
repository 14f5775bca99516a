use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use image::DynamicImage;

use crate::error::ImageError;

/// Where phase images come from. Injected into the registry so tests can
/// run without touching the filesystem.
pub trait ImageAssetSource: Send + Sync {
    /// Candidate reference drawings under `dir`, in a stable order
    fn list_candidate_images(&self, dir: &Path) -> Result<Vec<PathBuf>, ImageError>;

    fn load_image(&self, path: &Path) -> Result<DynamicImage, ImageError>;

    fn load_background_image(&self, path: &Path) -> Result<DynamicImage, ImageError> {
        self.load_image(path)
    }
}

/// Reads PNG assets from disk
#[derive(Debug, Default, Clone)]
pub struct DirAssetSource;

impl ImageAssetSource for DirAssetSource {
    fn list_candidate_images(&self, dir: &Path) -> Result<Vec<PathBuf>, ImageError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| ImageError::Asset(format!("{}: {}", dir.display(), e)))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| ext.eq_ignore_ascii_case("png"))
                        .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn load_image(&self, path: &Path) -> Result<DynamicImage, ImageError> {
        image::open(path).map_err(|e| ImageError::Asset(format!("{}: {}", path.display(), e)))
    }
}

/// In-memory asset store keyed by path
#[derive(Default)]
pub struct MemoryAssetSource {
    images: RwLock<HashMap<PathBuf, DynamicImage>>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the drawing pool under `drawings_dir` and the background image
    /// out of `source`. Lookups on the result never go back to `source`.
    pub fn preload(
        source: &dyn ImageAssetSource,
        drawings_dir: &Path,
        background: &Path,
    ) -> Result<Self, ImageError> {
        let preloaded = Self::new();
        for path in source.list_candidate_images(drawings_dir)? {
            let image = source.load_image(&path)?;
            preloaded.insert(path, image);
        }
        preloaded.insert(background, source.load_background_image(background)?);
        Ok(preloaded)
    }

    pub fn insert(&self, path: impl Into<PathBuf>, image: DynamicImage) {
        if let Ok(mut images) = self.images.write() {
            images.insert(path.into(), image);
        }
    }
}

impl ImageAssetSource for MemoryAssetSource {
    fn list_candidate_images(&self, dir: &Path) -> Result<Vec<PathBuf>, ImageError> {
        let images = self
            .images
            .read()
            .map_err(|_| ImageError::Asset("asset store poisoned".to_string()))?;
        let mut paths: Vec<PathBuf> = images
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn load_image(&self, path: &Path) -> Result<DynamicImage, ImageError> {
        let images = self
            .images
            .read()
            .map_err(|_| ImageError::Asset("asset store poisoned".to_string()))?;
        images
            .get(path)
            .cloned()
            .ok_or_else(|| ImageError::Asset(format!("{}: not found", path.display())))
    }
}
