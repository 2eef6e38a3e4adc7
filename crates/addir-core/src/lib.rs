//! # addir-core
//!
//! Configuration and error types shared by the directory resolution engine.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy and codes
//! - [`config`] - Search mode, connection and schema configuration
//! - [`credentials`] - Search bind credentials

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credentials;
pub mod error;

// Re-export commonly used types
pub use config::{
    AttributeNames, DirectoryConfig, NetbiosMap, SearchMode, TlsMode, TransportPreference,
    DEFAULT_CONNECTION_TIMEOUT_SECS,
};
pub use credentials::BindCredentials;
pub use error::{Error, Result};
