//! Human-readable value lists.
//!
//! Output streams through a fixed-size buffer that is flushed whenever the
//! next value might not fit. Input parsing is best-effort: any non-digit ends
//! the current number, numbers preceded by `-` or above `u32::MAX` are
//! dropped, and nothing aborts the scan except an I/O error.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use croaring::Bitmap;
use serde::{Deserialize, Serialize};

use crate::core::TaskError;

/// Size of the staging buffer used by both directions.
const CHUNK: usize = 64 * 1024;
/// Longest rendered value plus separator.
const MAX_ENTRY: usize = 11;
/// Values collected before a bulk insert.
const BATCH: usize = 4096;

/// Separator style of a text rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    /// One value per line.
    #[serde(rename = "newline_separated_values")]
    NewlineSeparated,
    /// `1,2,3`
    #[serde(rename = "comma_separated_values")]
    CommaSeparated,
    /// Tab between values.
    #[serde(rename = "tab_separated_values")]
    TabSeparated,
    /// `[1,2,3]`
    JsonArray,
}

impl TextStyle {
    /// Every style.
    pub const ALL: [Self; 4] = [
        Self::NewlineSeparated,
        Self::CommaSeparated,
        Self::TabSeparated,
        Self::JsonArray,
    ];

    /// Selector string for this style.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewlineSeparated => "newline_separated_values",
            Self::CommaSeparated => "comma_separated_values",
            Self::TabSeparated => "tab_separated_values",
            Self::JsonArray => "json_array",
        }
    }

    const fn separator(self) -> u8 {
        match self {
            Self::NewlineSeparated => b'\n',
            Self::TabSeparated => b'\t',
            Self::CommaSeparated | Self::JsonArray => b',',
        }
    }
}

impl fmt::Display for TextStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextStyle {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| TaskError::argument(format!("invalid text format: {s:?}")))
    }
}

/// Write every value of `bitmap` to `dest` in ascending order.
///
/// # Errors
///
/// Propagates write errors from `dest`.
pub fn iterate_to_text<W: Write>(bitmap: &Bitmap, style: TextStyle, mut dest: W) -> io::Result<()> {
    let mut buffer = Vec::with_capacity(CHUNK);
    if style == TextStyle::JsonArray {
        buffer.push(b'[');
    }

    let separator = style.separator();
    for (index, value) in bitmap.iter().enumerate() {
        if buffer.len() + MAX_ENTRY > CHUNK {
            dest.write_all(&buffer)?;
            buffer.clear();
        }
        if index > 0 {
            buffer.push(separator);
        }
        push_decimal(&mut buffer, value);
    }

    if style == TextStyle::JsonArray {
        buffer.push(b']');
    }
    dest.write_all(&buffer)?;
    dest.flush()
}

/// Render `bitmap` into a new byte vector.
#[must_use]
pub fn to_text_bytes(bitmap: &Bitmap, style: TextStyle) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = iterate_to_text(bitmap, style, &mut out);
    out
}

fn push_decimal(buffer: &mut Vec<u8>, mut value: u32) {
    let mut digits = [0u8; 10];
    let mut at = digits.len();
    loop {
        at -= 1;
        digits[at] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    buffer.extend_from_slice(&digits[at..]);
}

/// Incremental decimal scanner.
#[derive(Debug, Default)]
struct Scanner {
    current: u64,
    digits: bool,
    negative: bool,
    batch: Vec<u32>,
}

impl Scanner {
    fn feed(&mut self, bytes: &[u8], bitmap: &mut Bitmap) {
        for &byte in bytes {
            if byte.is_ascii_digit() {
                // Saturate above u32::MAX so the value is dropped at the end.
                self.current = (self.current * 10 + u64::from(byte - b'0')).min(u64::from(u32::MAX) + 1);
                self.digits = true;
            } else {
                self.terminate(bitmap);
                self.negative = byte == b'-';
            }
        }
    }

    fn terminate(&mut self, bitmap: &mut Bitmap) {
        if self.digits && !self.negative {
            if let Ok(value) = u32::try_from(self.current) {
                self.batch.push(value);
                if self.batch.len() == BATCH {
                    bitmap.add_many(&self.batch);
                    self.batch.clear();
                }
            }
        }
        self.current = 0;
        self.digits = false;
        self.negative = false;
    }

    fn finish(mut self, bitmap: &mut Bitmap) {
        self.terminate(bitmap);
        bitmap.add_many(&self.batch);
    }
}

/// Parse every unsigned 32-bit decimal number found in `source`.
///
/// # Errors
///
/// Propagates read errors from `source`. Malformed numbers are skipped.
pub fn parse_text_to_bitmap<R: Read>(mut source: R) -> io::Result<Bitmap> {
    let mut bitmap = Bitmap::new();
    let mut scanner = Scanner::default();
    let mut chunk = vec![0u8; CHUNK];
    loop {
        let read = match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        scanner.feed(&chunk[..read], &mut bitmap);
    }
    scanner.finish(&mut bitmap);
    Ok(bitmap)
}

/// Parse an in-memory byte slice.
#[must_use]
pub fn parse_text_bytes(bytes: &[u8]) -> Bitmap {
    let mut bitmap = Bitmap::new();
    let mut scanner = Scanner::default();
    scanner.feed(bytes, &mut bitmap);
    scanner.finish(&mut bitmap);
    bitmap
}
