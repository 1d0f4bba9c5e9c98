//! Analysis input types.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::{Error, Result};

/// Raw image uploaded for analysis.
///
/// Backed by [`Bytes`], so clones share the underlying buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct VariantInput {
    data: Bytes,
    media_type: Arc<str>,
}

impl VariantInput {
    /// Creates an input from raw bytes and a media type such as `image/png`.
    pub fn new(data: impl Into<Bytes>, media_type: impl Into<Arc<str>>) -> Self {
        Self {
            data: data.into(),
            media_type: media_type.into(),
        }
    }

    /// Creates a PNG input.
    pub fn png(data: impl Into<Bytes>) -> Self {
        Self::new(data, "image/png")
    }

    /// Creates a JPEG input.
    pub fn jpeg(data: impl Into<Bytes>) -> Self {
        Self::new(data, "image/jpeg")
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the media type.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Returns the size of the input in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the input holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encodes the input once so every slot of a job can share it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty payloads and non-image
    /// media types.
    pub fn prepare(&self) -> Result<PreparedInput> {
        if self.data.is_empty() {
            return Err(Error::invalid_input("image payload is empty"));
        }

        if !self.media_type.starts_with("image/") {
            return Err(Error::invalid_input(format!(
                "unsupported media type '{}'",
                self.media_type
            )));
        }

        Ok(PreparedInput {
            media_type: Arc::clone(&self.media_type),
            base64: STANDARD.encode(&self.data).into(),
            size: self.data.len(),
        })
    }
}

impl fmt::Debug for VariantInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantInput")
            .field("media_type", &self.media_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Base64-encoded input handed to the invoker.
#[derive(Clone)]
pub struct PreparedInput {
    media_type: Arc<str>,
    base64: Arc<str>,
    size: usize,
}

impl PreparedInput {
    /// Returns the media type of the encoded image.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Returns the standard base64 encoding of the image.
    pub fn base64(&self) -> &str {
        &self.base64
    }

    /// Returns the size of the original image in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for PreparedInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedInput")
            .field("media_type", &self.media_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
