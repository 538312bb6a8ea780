//! Asynchronous deserialization, single and fan-out.

use std::path::PathBuf;

use parking_lot::Mutex;

use super::charge_bitmap;
use crate::bitmap::SharedBitmap;
use crate::codec::{deserialize, deserialize_file, FileFormat, FormatSelector, SerializationFormat};
use crate::core::{AsyncTask, ParallelTask, TaskContext, TaskError, TaskResult};

/// Decode one buffer on the pool.
#[derive(Debug)]
pub struct DeserializeTask {
    bytes: Vec<u8>,
    selector: FormatSelector,
    format: Option<SerializationFormat>,
    decoded: Option<SharedBitmap>,
}

impl DeserializeTask {
    /// Decode `bytes` in `format`.
    pub fn new(bytes: impl Into<Vec<u8>>, format: impl Into<FormatSelector>) -> Self {
        Self {
            bytes: bytes.into(),
            selector: format.into(),
            format: None,
            decoded: None,
        }
    }
}

impl AsyncTask for DeserializeTask {
    type Output = SharedBitmap;

    fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.format = Some(self.selector.resolve()?);
        Ok(())
    }

    fn work(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        let format = self.format.ok_or_else(|| TaskError::Internal("format not resolved".into()))?;
        let decoded = deserialize(&self.bytes, format)?;
        charge_bitmap(&decoded, ctx);
        self.decoded = Some(decoded);
        Ok(())
    }

    fn output(self) -> TaskResult<SharedBitmap> {
        self.decoded
            .ok_or_else(|| TaskError::Internal("deserialization produced no bitmap".into()))
    }
}

/// Memory-map and decode a file on the pool.
#[derive(Debug)]
pub struct DeserializeFileTask {
    path: PathBuf,
    selector: String,
    format: Option<FileFormat>,
    decoded: Option<SharedBitmap>,
}

impl DeserializeFileTask {
    /// Load `path`. `format` is a file format or its selector string.
    pub fn new(path: impl Into<PathBuf>, format: impl ToString) -> Self {
        Self {
            path: path.into(),
            selector: format.to_string(),
            format: None,
            decoded: None,
        }
    }
}

impl AsyncTask for DeserializeFileTask {
    type Output = SharedBitmap;

    fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        if self.path.as_os_str().is_empty() {
            return Err(TaskError::argument("file path must not be empty"));
        }
        self.format = Some(self.selector.parse()?);
        Ok(())
    }

    fn work(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        let format = self.format.ok_or_else(|| TaskError::Internal("format not resolved".into()))?;
        let decoded = deserialize_file(&self.path, format)?;
        charge_bitmap(&decoded, ctx);
        self.decoded = Some(decoded);
        Ok(())
    }

    fn output(self) -> TaskResult<SharedBitmap> {
        self.decoded
            .ok_or_else(|| TaskError::Internal("deserialization produced no bitmap".into()))
    }
}

/// Decode many independent buffers across pool threads.
///
/// Results come back in input order regardless of which partition decoded
/// which item.
#[derive(Debug)]
pub struct DeserializeParallelTask {
    inputs: Vec<(Vec<u8>, FormatSelector)>,
    formats: Vec<SerializationFormat>,
    slots: Vec<Mutex<Option<SharedBitmap>>>,
    concurrency: Option<usize>,
}

impl DeserializeParallelTask {
    /// One item per `(bytes, format)` pair.
    pub fn new<B, F>(inputs: impl IntoIterator<Item = (B, F)>) -> Self
    where
        B: Into<Vec<u8>>,
        F: Into<FormatSelector>,
    {
        Self {
            inputs: inputs
                .into_iter()
                .map(|(bytes, format)| (bytes.into(), format.into()))
                .collect(),
            formats: Vec::new(),
            slots: Vec::new(),
            concurrency: None,
        }
    }

    /// Cap the number of partitions.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

impl ParallelTask for DeserializeParallelTask {
    type Output = Vec<SharedBitmap>;

    fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        if self.concurrency == Some(0) {
            return Err(TaskError::argument("concurrency must be at least 1"));
        }
        self.formats = self
            .inputs
            .iter()
            .map(|(_, selector)| selector.resolve())
            .collect::<Result<_, _>>()?;
        self.slots = self.inputs.iter().map(|_| Mutex::new(None)).collect();
        Ok(())
    }

    fn len(&self) -> usize {
        self.inputs.len()
    }

    fn concurrency(&self) -> Option<usize> {
        self.concurrency
    }

    fn parallel_work(&self, index: usize, ctx: &TaskContext) -> Result<(), TaskError> {
        let (bytes, _) = &self.inputs[index];
        let decoded = deserialize(bytes, self.formats[index])?;
        charge_bitmap(&decoded, ctx);
        *self.slots[index].lock() = Some(decoded);
        Ok(())
    }

    fn output(self) -> TaskResult<Vec<SharedBitmap>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.into_inner()
                    .ok_or_else(|| TaskError::Internal(format!("item {index} was not decoded")))
            })
            .collect()
    }
}
