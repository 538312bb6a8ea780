//! File entry points.
//!
//! Reads memory-map the file read-only and run the in-memory decoders over
//! the mapping. Every decoder copies what it keeps, so the mapping is
//! released before the handle is returned.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use croaring::Bitmap;
use memmap2::Mmap;
use tracing::debug;

use super::deserializer::{deserialize, deserialize_uint32_array};
use super::format::FileFormat;
use super::serializer::{serialize, serialize_uint32_array};
use super::text::{iterate_to_text, parse_text_bytes};
use crate::bitmap::SharedBitmap;
use crate::core::TaskError;

/// Load a bitmap stored at `path` in `format`.
///
/// # Errors
///
/// `TaskError::System` carrying errno, the failing call and the path for
/// I/O failures; decoder errors otherwise.
pub fn deserialize_file(path: &Path, format: FileFormat) -> Result<SharedBitmap, TaskError> {
    let file = File::open(path).map_err(|err| TaskError::system(&err, "open", path))?;
    let len = file
        .metadata()
        .map_err(|err| TaskError::system(&err, "fstat", path))?
        .len();
    if len == 0 {
        return Ok(SharedBitmap::new());
    }

    // SAFETY: the mapping is read-only and dropped before returning. Another
    // process truncating the file meanwhile is outside what we can guard.
    #[allow(unsafe_code)]
    let mmap = unsafe { Mmap::map(&file) }.map_err(|err| TaskError::system(&err, "mmap", path))?;

    let result = decode_mapped(&mmap, format);
    drop(mmap);
    debug!(path = %path.display(), format = %format, bytes = len, ok = result.is_ok(), "bitmap file loaded");
    result
}

fn decode_mapped(bytes: &[u8], format: FileFormat) -> Result<SharedBitmap, TaskError> {
    match format {
        FileFormat::Binary(format) => deserialize(bytes, format),
        FileFormat::Uint32Array => deserialize_uint32_array(bytes).map(SharedBitmap::from),
        FileFormat::Text(_) => Ok(SharedBitmap::from(parse_text_bytes(bytes))),
    }
}

/// Write `bitmap` to `path` in `format`, creating or truncating the file.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// `TaskError::System` for I/O failures, `Allocation` from the encoder.
pub fn serialize_file(bitmap: &Bitmap, path: &Path, format: FileFormat) -> Result<u64, TaskError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|err| TaskError::system(&err, "open", path))?;

    let written = match format {
        FileFormat::Binary(format) => {
            let bytes = serialize(bitmap, format)?;
            write_all(&mut file, &bytes, path)?
        }
        FileFormat::Uint32Array => write_all(&mut file, &serialize_uint32_array(bitmap), path)?,
        FileFormat::Text(style) => {
            iterate_to_text(bitmap, style, &mut file).map_err(|err| TaskError::system(&err, "write", path))?;
            file.metadata()
                .map_err(|err| TaskError::system(&err, "fstat", path))?
                .len()
        }
    };
    debug!(path = %path.display(), format = %format, bytes = written, "bitmap file written");
    Ok(written)
}

fn write_all(file: &mut File, bytes: &[u8], path: &Path) -> Result<u64, TaskError> {
    file.write_all(bytes)
        .and_then(|()| file.flush())
        .map_err(|err| TaskError::system(&err, "write", path))?;
    Ok(bytes.len() as u64)
}
