//! Common utilities and abstractions for the spillmr project.
//!
//! This module provides the error taxonomy, configuration and temporary
//! file handling shared by the intermediate store.

pub mod config;
pub mod error;
pub mod fs;
pub mod temp;

pub use config::{JobConfig, StoreConfig};
pub use error::{CommonError, ErrorCategory, Result};
pub use fs::{move_file, remove_file_logged};
pub use temp::{ScratchDir, SystemTempFiles, TempFileProvider};
