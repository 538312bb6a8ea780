//! Building bitmaps from values and rendering them as text.

use croaring::Bitmap;

use super::charge_bitmap;
use crate::bitmap::{FreezeGuard, SharedBitmap};
use crate::codec::{to_text_bytes, AlignedBuffer, TextStyle};
use crate::core::{AsyncTask, TaskContext, TaskError, TaskResult};

/// Build a bitmap from a value array on the pool.
#[derive(Debug)]
pub struct FromArrayTask {
    values: Vec<u32>,
    built: Option<SharedBitmap>,
}

impl FromArrayTask {
    /// Values may be unsorted and contain duplicates.
    pub fn new(values: impl Into<Vec<u32>>) -> Self {
        Self {
            values: values.into(),
            built: None,
        }
    }
}

impl AsyncTask for FromArrayTask {
    type Output = SharedBitmap;

    fn work(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        let mut bitmap = Bitmap::new();
        bitmap.add_many(&self.values);
        bitmap.run_optimize();
        self.values = Vec::new();

        let built = SharedBitmap::from(bitmap);
        charge_bitmap(&built, ctx);
        self.built = Some(built);
        Ok(())
    }

    fn output(self) -> TaskResult<SharedBitmap> {
        self.built
            .ok_or_else(|| TaskError::Internal("bitmap was not built".into()))
    }
}

/// Render a bitmap as text on the pool.
#[derive(Debug)]
pub struct ToTextTask {
    bitmap: SharedBitmap,
    selector: String,
    style: Option<TextStyle>,
    guard: Option<FreezeGuard>,
    text: Option<AlignedBuffer>,
}

impl ToTextTask {
    /// `style` is a [`TextStyle`] or its selector string.
    pub fn new(bitmap: SharedBitmap, style: impl ToString) -> Self {
        Self {
            bitmap,
            selector: style.to_string(),
            style: None,
            guard: None,
            text: None,
        }
    }
}

impl AsyncTask for ToTextTask {
    type Output = AlignedBuffer;

    fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.style = Some(self.selector.parse()?);
        self.guard = Some(self.bitmap.freeze());
        Ok(())
    }

    fn work(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        let style = self.style.ok_or_else(|| TaskError::Internal("style not resolved".into()))?;
        let text = AlignedBuffer::from_vec(to_text_bytes(&self.bitmap.read(), style));
        let charge = ctx.charge(text.allocated_bytes());
        self.text = Some(text.with_charge(charge));
        Ok(())
    }

    fn finally(&mut self) {
        self.guard = None;
    }

    fn output(self) -> TaskResult<AlignedBuffer> {
        self.text
            .ok_or_else(|| TaskError::Internal("text was not rendered".into()))
    }
}
