//! tapedeck: a folder-scoped audio player that remembers, per folder, which
//! file was playing and where.
//!
//! A folder played through the player becomes a *tape*. [`session::Session`]
//! is the entry point: it owns the audio engine, the tape store and the
//! snapshot stream that front ends subscribe to.

pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod mpris;
pub mod persist;
pub mod reconcile;
pub mod resume;
pub mod runtime;
pub mod session;
pub mod tape;

pub use error::{Error, Result};
