//! Configuration loader and schema types.
//!
//! This module exposes the configuration schema used to drive the engine,
//! the catalog scanner and storage, and helpers to load it from disk.

mod load;
mod schema;

pub use load::{default_config_path, default_data_dir, resolve_config_path};
pub use schema::*;
