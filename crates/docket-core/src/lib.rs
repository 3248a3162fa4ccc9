#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod error;
pub mod extract;
pub mod fields;
pub mod path;

pub use error::{BoxedError, Error, ErrorKind, Result};
pub use extract::{Extractor, OperationId, PollOutcome};
pub use fields::{FieldValue, normalize_date, normalize_fields};
pub use path::SessionPrefix;
