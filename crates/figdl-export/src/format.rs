//! Export image formats.

use std::fmt;
use std::str::FromStr;

use crate::error::ExportError;

/// PNG file signature.
const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// JPEG start-of-image marker followed by a segment marker.
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Image format requested from the render API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpg,
    Svg,
    Pdf,
}

impl ImageFormat {
    /// Value of the `format` query parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Svg => "svg",
            Self::Pdf => "pdf",
        }
    }

    /// File extension (without the dot).
    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    /// Check whether `data` starts with this format's signature.
    ///
    /// Only raster formats have a signature check; SVG and PDF never match.
    pub fn matches_magic(self, data: &[u8]) -> bool {
        match self {
            Self::Png => data.starts_with(PNG_SIGNATURE),
            Self::Jpg => data.starts_with(JPEG_SIGNATURE),
            Self::Svg | Self::Pdf => false,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "svg" => Ok(Self::Svg),
            "pdf" => Ok(Self::Pdf),
            other => Err(ExportError::Config(format!(
                "unsupported image format '{other}' (expected png, jpg, svg or pdf)"
            ))),
        }
    }
}
