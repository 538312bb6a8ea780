//! Serialization formats, wire tags and selector parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::text::TextStyle;
use crate::core::TaskError;

/// Tag byte: explicit sorted `u32` array follows.
pub const ARRAY_UINT32: u8 = 1;
/// Tag byte: portable container encoding follows.
pub const CONTAINER: u8 = 2;
/// The array form is only used below this cardinality.
pub const ARRAY_CARDINALITY_LIMIT: u64 = 0x0100_0000;
/// Alignment the native frozen form requires.
pub const FROZEN_ALIGNMENT: usize = 32;

/// Physical encodings of a bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    /// Self-describing: one tag byte, then either a `u32` array or the
    /// portable encoding, whichever is smaller.
    Croaring,
    /// The engine's portable encoding with no tag byte.
    Portable,
    /// The engine's frozen layout. Zero-copy, 32-byte aligned.
    #[serde(rename = "unsafe_frozen_croaring")]
    UnsafeFrozenNative,
    /// A zero-copy view over the portable encoding. No alignment needed.
    UnsafeFrozenPortable,
}

impl SerializationFormat {
    /// Every format, in selector order.
    pub const ALL: [Self; 4] = [
        Self::Croaring,
        Self::Portable,
        Self::UnsafeFrozenNative,
        Self::UnsafeFrozenPortable,
    ];

    /// Selector string accepted at the API boundary.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Croaring => "croaring",
            Self::Portable => "portable",
            Self::UnsafeFrozenNative => "unsafe_frozen_croaring",
            Self::UnsafeFrozenPortable => "unsafe_frozen_portable",
        }
    }

    /// Backward-compatible boolean selector: `true` is portable.
    #[must_use]
    pub const fn from_portable_flag(portable: bool) -> Self {
        if portable {
            Self::Portable
        } else {
            Self::Croaring
        }
    }

    /// Whether deserializing produces a frozen view rather than a copy.
    #[must_use]
    pub const fn is_frozen(self) -> bool {
        matches!(self, Self::UnsafeFrozenNative | Self::UnsafeFrozenPortable)
    }

    /// Start alignment the encoded bytes need.
    #[must_use]
    pub const fn alignment(self) -> usize {
        match self {
            Self::UnsafeFrozenNative => FROZEN_ALIGNMENT,
            _ => 1,
        }
    }
}

impl fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerializationFormat {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| TaskError::argument(format!("invalid serialization format: {s:?}")))
    }
}

/// A format argument as the host passed it, resolved during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSelector {
    /// A selector string such as `"croaring"`.
    Name(String),
    /// Legacy boolean: `true` = portable, `false` = croaring.
    Flag(bool),
    /// Already resolved.
    Format(SerializationFormat),
}

impl FormatSelector {
    /// Resolve to a concrete format.
    ///
    /// # Errors
    ///
    /// `TaskError::Argument` for unknown names.
    pub fn resolve(&self) -> Result<SerializationFormat, TaskError> {
        match self {
            Self::Name(name) => name.parse(),
            Self::Flag(portable) => Ok(SerializationFormat::from_portable_flag(*portable)),
            Self::Format(format) => Ok(*format),
        }
    }
}

impl From<&str> for FormatSelector {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for FormatSelector {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<bool> for FormatSelector {
    fn from(portable: bool) -> Self {
        Self::Flag(portable)
    }
}

impl From<SerializationFormat> for FormatSelector {
    fn from(format: SerializationFormat) -> Self {
        Self::Format(format)
    }
}

/// Formats accepted by the file entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    /// One of the bitmap encodings.
    Binary(SerializationFormat),
    /// Raw little-endian `u32` values, no header.
    Uint32Array,
    /// Human-readable values.
    Text(TextStyle),
}

impl FileFormat {
    /// Selector string for this format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binary(format) => format.as_str(),
            Self::Uint32Array => "uint32_array",
            Self::Text(style) => style.as_str(),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileFormat {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(format) = s.parse::<SerializationFormat>() {
            return Ok(Self::Binary(format));
        }
        if s == "uint32_array" {
            return Ok(Self::Uint32Array);
        }
        s.parse::<TextStyle>()
            .map(Self::Text)
            .map_err(|_| TaskError::argument(format!("invalid file format: {s:?}")))
    }
}

impl From<SerializationFormat> for FileFormat {
    fn from(format: SerializationFormat) -> Self {
        Self::Binary(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_round_trip() {
        for format in SerializationFormat::ALL {
            assert_eq!(format.as_str().parse::<SerializationFormat>(), Ok(format));
        }
    }

    #[test]
    fn boolean_shorthand() {
        assert_eq!(
            FormatSelector::from(true).resolve(),
            Ok(SerializationFormat::Portable)
        );
        assert_eq!(
            FormatSelector::from(false).resolve(),
            Ok(SerializationFormat::Croaring)
        );
    }

    #[test]
    fn unknown_selector_is_argument_error() {
        assert!(matches!(
            FormatSelector::from("frozen").resolve(),
            Err(TaskError::Argument(_))
        ));
    }

    #[test]
    fn file_formats_cover_text_styles() {
        assert_eq!(
            "json_array".parse::<FileFormat>(),
            Ok(FileFormat::Text(TextStyle::JsonArray))
        );
        assert_eq!("uint32_array".parse::<FileFormat>(), Ok(FileFormat::Uint32Array));
        assert_eq!(
            "portable".parse::<FileFormat>(),
            Ok(FileFormat::Binary(SerializationFormat::Portable))
        );
        assert!("xml".parse::<FileFormat>().is_err());
    }
}
