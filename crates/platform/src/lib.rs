//! # Conduit Platform
//!
//! Core platform types shared by the Conduit SSH engine.
//!
//! This crate provides:
//! - Unified error types (`ConduitError`, `ConduitResult`)
//! - Byte-stream provider traits (`ByteStream`, `Connector`, `TcpConnector`)
//!
//! # Examples
//!
//! ```
//! use conduit_platform::{ConduitError, ConduitResult};
//!
//! fn example_function() -> ConduitResult<String> {
//!     Ok("Hello, Conduit!".to_string())
//! }
//!
//! # fn main() -> ConduitResult<()> {
//! let result = example_function()?;
//! assert_eq!(result, "Hello, Conduit!");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod traits;

pub use error::{ConduitError, ConduitResult};
pub use traits::{BoxedStream, ByteStream, Connector, TcpConnector};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
