mod error;
mod serializer;

pub use error::{HookError, TaskError};
pub use serializer::{Serializer, SerializerError};
