//! Ladle core — service settings and the shared error taxonomy.

pub mod config;
pub mod error;

pub use config::{RerankMode, Settings};
pub use error::{Error, Result};
