//! Shared types and error hierarchy for Quill.

pub mod error;
pub mod message;
pub mod provider;
pub mod sampling;
pub mod tool;
pub mod util;

pub use error::{ApiError, ConfigError, QuillError, SamplingError, ToolError};
pub use message::*;
pub use sampling::*;
pub use tool::*;
pub use util::{truncate_str, truncate_string};

use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future. Used at every dyn-compatible async seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
