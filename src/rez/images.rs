//! Cache of decoded Cel image arrays, keyed by resource number.
//!
//! UI and weapon art is loaded through here so repeated draws of the
//! same resource do not re-decode. `release` is a statement of intent;
//! the cache may keep entries resident until [`CelImageCache::free_all`].

use std::collections::HashMap;
use thiserror::Error;

use crate::rez::archive::ResourceFile;
use crate::rez::cel::{self, CelError, CelImage, CelLoadFlags};

#[derive(Error, Debug)]
pub enum ImageCacheError {
    #[error("no such resource: {0}")]
    NoSuchResource(u32),

    #[error("resource {num}: {source}")]
    Decode { num: u32, source: CelError },
}

/// A decoded Cel image array plus the flags it was loaded with.
pub struct CelImageArray {
    pub images: Vec<CelImage>,
    pub load_flags: CelLoadFlags,
}

impl CelImageArray {
    pub fn image(&self, idx: u32) -> &CelImage {
        &self.images[idx as usize]
    }
}

#[derive(Default)]
pub struct CelImageCache {
    entries: HashMap<u32, CelImageArray>,
}

impl CelImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode (or fetch the already decoded) image array for a resource.
    pub fn load(
        &mut self,
        rez: &ResourceFile,
        num: u32,
        flags: CelLoadFlags,
    ) -> Result<&CelImageArray, ImageCacheError> {
        if !self.entries.contains_key(&num) {
            let data = rez.data(num).ok_or(ImageCacheError::NoSuchResource(num))?;
            let images = cel::load_cel_image_array(data, flags)
                .map_err(|source| ImageCacheError::Decode { num, source })?;
            self.entries.insert(
                num,
                CelImageArray {
                    images,
                    load_flags: flags,
                },
            );
        }
        Ok(&self.entries[&num])
    }

    /// Single-image convenience: decode a lone Cel resource (no leading
    /// offset table).
    pub fn load_single(
        &mut self,
        rez: &ResourceFile,
        num: u32,
        flags: CelLoadFlags,
    ) -> Result<&CelImage, ImageCacheError> {
        if !self.entries.contains_key(&num) {
            let data = rez.data(num).ok_or(ImageCacheError::NoSuchResource(num))?;
            let image = cel::load_cel_image(data, flags)
                .map_err(|source| ImageCacheError::Decode { num, source })?;
            self.entries.insert(
                num,
                CelImageArray {
                    images: vec![image],
                    load_flags: flags,
                },
            );
        }
        Ok(self.entries[&num].image(0))
    }

    pub fn get(&self, num: u32) -> Option<&CelImageArray> {
        self.entries.get(&num)
    }

    /// Intent to discard; the entry may stay cached.
    pub fn release(&mut self, _num: u32) {}

    /// Drop everything (level exit).
    pub fn free_all(&mut self) {
        self.entries.clear();
    }
}
