//! Captured image payloads.
//!
//! An [`ImageRef`] always carries the encoded bytes; it also carries a file
//! path once persisted, and decodes to an `image::DynamicImage` on demand.

use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
    #[error("image file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to a captured image: path, decodable image and raw bytes.
#[derive(Clone)]
pub struct ImageRef {
    path: Option<PathBuf>,
    bytes: Arc<[u8]>,
    width: u32,
    height: u32,
}

impl std::fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRef")
            .field("path", &self.path)
            .field("bytes", &self.bytes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl ImageRef {
    /// Encode an image as PNG, in memory.
    pub fn encode(image: &DynamicImage) -> Result<Self, ImageError> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png)?;
        Ok(Self {
            path: None,
            bytes: buf.into_inner().into(),
            width: image.width(),
            height: image.height(),
        })
    }

    /// Load an image written by the engine (or anyone else) from disk.
    pub fn from_file(path: &Path) -> Result<Self, ImageError> {
        let bytes = std::fs::read(path)?;
        let decoded = image::load_from_memory(&bytes)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            bytes: bytes.into(),
            width: decoded.width(),
            height: decoded.height(),
        })
    }

    /// Write the encoded bytes to `dir/file_name` and remember the path.
    pub fn persist(mut self, dir: &Path, file_name: &str) -> Result<Self, ImageError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        std::fs::write(&path, &self.bytes)?;
        tracing::debug!(path = %path.display(), bytes = self.bytes.len(), "image saved");
        self.path = Some(path);
        Ok(self)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Encoded (PNG) bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn decode(&self) -> Result<DynamicImage, ImageError> {
        Ok(image::load_from_memory(&self.bytes)?)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}
