//! Bitmap encodings: binary formats, frozen views, files and text.

pub mod buffer;
pub mod deserializer;
pub mod file;
pub mod format;
pub mod frozen;
pub mod serializer;
pub mod text;

pub use buffer::{is_aligned, AlignedBuffer};
pub use deserializer::{deserialize, deserialize_owned, deserialize_uint32_array};
pub use file::{deserialize_file, serialize_file};
pub use format::{FileFormat, FormatSelector, SerializationFormat};
pub use frozen::{deserialize_unsafe_aliased, FrozenBitmap, UnsafeAliasedView};
pub use serializer::{plan_croaring, serialize, serialize_into, serialize_uint32_array, serialized_size, CroaringPlan};
pub use text::{iterate_to_text, parse_text_bytes, parse_text_to_bitmap, to_text_bytes, TextStyle};
