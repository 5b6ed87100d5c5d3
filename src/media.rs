use std::{
    fs, io,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};

const EVENT_IMAGE_DIR: &str = "event_images";

/// Filesystem blob storage for event images. Stored names are relative to the root.
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.root.join(name))
    }

    /// Writes `content` under a name derived from `filename` and the content hash,
    /// returning the stored name.
    pub fn save_event_image(&self, filename: &str, content: &[u8]) -> io::Result<String> {
        let name = format!("{EVENT_IMAGE_DIR}/{}", hashed_name(filename, content));
        let path = self.root.join(&name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(name)
    }
}

fn hashed_name(filename: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = format!("{:x}", hasher.finalize());
    let short = &digest[..12];

    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let base = if base.is_empty() { "image" } else { base };
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!("{stem}_{short}.{ext}")
        }
        _ => format!("{base}_{short}"),
    }
}
