//! Asynchronous serialization.

use std::path::PathBuf;

use tracing::debug;

use crate::bitmap::{FreezeGuard, SharedBitmap};
use crate::codec::{serialize, serialize_file, serialize_into, AlignedBuffer, FileFormat, FormatSelector, SerializationFormat};
use crate::core::{AsyncTask, TaskContext, TaskError, TaskResult};

/// Serialize a bitmap on the pool.
///
/// The bitmap is frozen from `before` until `finally`, so it cannot change
/// while a worker is reading it.
#[derive(Debug)]
pub struct SerializeTask {
    bitmap: SharedBitmap,
    selector: FormatSelector,
    format: Option<SerializationFormat>,
    target: Option<AlignedBuffer>,
    guard: Option<FreezeGuard>,
    encoded: Option<AlignedBuffer>,
}

impl SerializeTask {
    /// Serialize `bitmap` into a freshly allocated buffer.
    pub fn new(bitmap: SharedBitmap, format: impl Into<FormatSelector>) -> Self {
        Self {
            bitmap,
            selector: format.into(),
            format: None,
            target: None,
            guard: None,
            encoded: None,
        }
    }

    /// Write into `buffer` instead of allocating. The result is `buffer`
    /// truncated to the encoded length.
    #[must_use]
    pub fn with_output(mut self, buffer: AlignedBuffer) -> Self {
        self.target = Some(buffer);
        self
    }
}

impl AsyncTask for SerializeTask {
    type Output = AlignedBuffer;

    fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.format = Some(self.selector.resolve()?);
        self.guard = Some(self.bitmap.freeze());
        Ok(())
    }

    fn work(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        let format = self.format.ok_or_else(|| TaskError::Internal("format not resolved".into()))?;
        let bitmap = self.bitmap.read();
        let encoded = match self.target.take() {
            Some(mut target) => {
                let written = serialize_into(&bitmap, format, &mut target)?;
                target.truncate(written);
                target
            }
            None => {
                let encoded = serialize(&bitmap, format)?;
                let charge = ctx.charge(encoded.allocated_bytes());
                encoded.with_charge(charge)
            }
        };
        self.encoded = Some(encoded);
        Ok(())
    }

    fn finally(&mut self) {
        self.guard = None;
    }

    fn output(self) -> TaskResult<AlignedBuffer> {
        self.encoded
            .ok_or_else(|| TaskError::Internal("serialization produced no output".into()))
    }
}

/// Serialize a bitmap straight to a file on the pool.
#[derive(Debug)]
pub struct SerializeFileTask {
    bitmap: SharedBitmap,
    path: PathBuf,
    selector: String,
    format: Option<FileFormat>,
    guard: Option<FreezeGuard>,
    written: Option<u64>,
}

impl SerializeFileTask {
    /// Write `bitmap` to `path`. `format` is a file format or its selector
    /// string, resolved during validation.
    pub fn new(bitmap: SharedBitmap, path: impl Into<PathBuf>, format: impl ToString) -> Self {
        Self {
            bitmap,
            path: path.into(),
            selector: format.to_string(),
            format: None,
            guard: None,
            written: None,
        }
    }
}

impl AsyncTask for SerializeFileTask {
    type Output = u64;

    fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        if self.path.as_os_str().is_empty() {
            return Err(TaskError::argument("file path must not be empty"));
        }
        self.format = Some(self.selector.parse()?);
        self.guard = Some(self.bitmap.freeze());
        Ok(())
    }

    fn work(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        let format = self.format.ok_or_else(|| TaskError::Internal("format not resolved".into()))?;
        let written = serialize_file(&self.bitmap.read(), &self.path, format)?;
        debug!(path = %self.path.display(), bytes = written, "serialize file task finished");
        self.written = Some(written);
        Ok(())
    }

    fn finally(&mut self) {
        self.guard = None;
    }

    fn output(self) -> TaskResult<u64> {
        self.written
            .ok_or_else(|| TaskError::Internal("file was not written".into()))
    }
}
