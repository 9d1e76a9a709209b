// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware images, in memory and on disk.
//!
//! On disk an image is a bare sequence of big-endian 32-bit words: no header,
//! no checksum. Its size is the file's length.

use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use drv_fadc_api::{PAGE_SIZE_BYTES, ROM_CAPACITY_BYTES, WORD_SIZE_BYTES};

use crate::error::ImageError;

/// Largest image we'll program. The last page of the ROM is kept free so the
/// flush word that closes a program sequence always lands inside the part.
pub const MAX_IMAGE_BYTES: usize = ROM_CAPACITY_BYTES - PAGE_SIZE_BYTES;

/// A firmware image: either read from a file or downloaded from a ROM.
///
/// An image that hasn't been filled yet is "not loaded", and nothing will
/// program from it or compare against it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FirmwareImage {
    words: Vec<u32>,
    loaded: bool,
    source: Option<String>,
}

impl FirmwareImage {
    /// An empty, unloaded image.
    pub fn new() -> Self {
        Self::default()
    }

    /// A loaded image holding `words`.
    pub fn from_words(words: Vec<u32>) -> Self {
        Self {
            words,
            loaded: true,
            source: None,
        }
    }

    /// Parses big-endian words out of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        check_size(bytes.len())?;
        let mut words = vec![0; bytes.len() / WORD_SIZE_BYTES];
        BigEndian::read_u32_into(bytes, &mut words);
        Ok(Self::from_words(words))
    }

    /// Reads an image file.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ImageError::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut image = Self::from_bytes(&bytes)?;
        image.source = Some(path.display().to_string());
        log::debug!(
            "read {} words from {}",
            image.word_count(),
            path.display()
        );
        Ok(image)
    }

    /// Writes the image out in the file format. Refuses unloaded images.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), ImageError> {
        let path: PathBuf = path.as_ref().to_owned();
        let bytes = self.to_bytes()?;
        std::fs::write(&path, bytes)
            .map_err(|source| ImageError::Io { path, source })
    }

    /// The image in the file format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        if !self.loaded {
            return Err(ImageError::NotLoaded);
        }
        let mut bytes = vec![0; self.size_bytes()];
        BigEndian::write_u32_into(&self.words, &mut bytes);
        Ok(bytes)
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.words.len() * WORD_SIZE_BYTES
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Where the image came from, if it came from a file.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Drops the image's contents and marks it unloaded.
    pub fn release(&mut self) {
        self.words = Vec::new();
        self.loaded = false;
    }

    /// Replaces the contents with `words` and marks the image loaded.
    pub(crate) fn fill(&mut self, words: Vec<u32>) {
        self.words = words;
        self.loaded = true;
    }
}

fn check_size(bytes: usize) -> Result<(), ImageError> {
    if bytes == 0 {
        return Err(ImageError::Empty);
    }
    if bytes % WORD_SIZE_BYTES != 0 {
        return Err(ImageError::Unaligned(bytes));
    }
    if bytes > MAX_IMAGE_BYTES {
        return Err(ImageError::TooLarge {
            bytes,
            max: MAX_IMAGE_BYTES,
        });
    }
    Ok(())
}
