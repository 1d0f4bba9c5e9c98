//! Session configuration.

use std::path::{Path, PathBuf};

use anyhow::{Result as AnyhowResult, anyhow};
use clap::Args;
use serde::{Deserialize, Serialize};
use swatch_variant::AnalysisMode;

use crate::TRACING_TARGET_CONFIG;

/// Input and output options of one interactive session.
///
/// # Environment Variables
///
/// - `SWATCH_IMAGE` - Path of the fabric image to analyse
/// - `SWATCH_MODE` - `short` (default) or `long`
/// - `SWATCH_MEDIA_TYPE` - Media type override, otherwise derived from the extension
/// - `SWATCH_LOG_JSON` - Emit logs as JSON lines
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[must_use = "config does nothing unless you use it"]
pub struct SessionConfig {
    /// Path of the fabric image to analyse.
    #[arg(short = 'i', long, env = "SWATCH_IMAGE")]
    pub image: PathBuf,

    /// Length of the generated descriptions.
    #[arg(short = 'm', long, env = "SWATCH_MODE", value_enum, default_value_t = AnalysisMode::Short)]
    #[serde(default)]
    pub mode: AnalysisMode,

    /// Media type of the image, such as `image/png`.
    #[arg(long, env = "SWATCH_MEDIA_TYPE")]
    pub media_type: Option<String>,

    /// Emit logs as JSON lines instead of text.
    #[arg(long, env = "SWATCH_LOG_JSON")]
    #[serde(default)]
    pub log_json: bool,
}

impl SessionConfig {
    /// Validates the session options.
    ///
    /// # Errors
    ///
    /// Returns an error if the image path is empty or the media type override
    /// is blank.
    pub fn validate(&self) -> AnyhowResult<()> {
        if self.image.as_os_str().is_empty() {
            return Err(anyhow!("Image path must not be empty."));
        }

        if self
            .media_type
            .as_deref()
            .is_some_and(|media_type| media_type.trim().is_empty())
        {
            return Err(anyhow!("Media type override must not be blank."));
        }

        Ok(())
    }

    /// Returns the media type of the image.
    ///
    /// Unknown extensions map to `application/octet-stream`, which the engine
    /// rejects as a non-image input.
    pub fn media_type(&self) -> String {
        self.media_type
            .clone()
            .unwrap_or_else(|| media_type_for(&self.image).to_owned())
    }

    /// Logs the session options.
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            image = %self.image.display(),
            mode = %self.mode,
            media_type = %self.media_type(),
            "Session configuration"
        );
    }
}

fn media_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(image: &str) -> SessionConfig {
        SessionConfig {
            image: PathBuf::from(image),
            mode: AnalysisMode::Short,
            media_type: None,
            log_json: false,
        }
    }

    #[test]
    fn test_media_type_from_extension() {
        assert_eq!(config("linen.JPG").media_type(), "image/jpeg");
        assert_eq!(config("denim.png").media_type(), "image/png");
        assert_eq!(config("notes.txt").media_type(), "application/octet-stream");
    }

    #[test]
    fn test_media_type_override_wins() {
        let config = SessionConfig {
            media_type: Some("image/avif".into()),
            ..config("swatch.bin")
        };
        assert_eq!(config.media_type(), "image/avif");
    }

    #[test]
    fn test_blank_override_is_rejected() {
        let config = SessionConfig {
            media_type: Some("  ".into()),
            ..config("swatch.png")
        };
        assert!(config.validate().is_err());
    }
}
