//! Stash Core
//!
//! Shared vocabulary for the stash workspace: the error type, the cache
//! action input, the logging handle and the object store port.

pub mod action;
pub mod error;
pub mod log;
pub mod ports;

pub use action::{Action, ActionKind, ArchiveFormat};
pub use error::{Error, Result, Stage};
pub use log::Logger;
pub use ports::{ObjectReader, ObjectStore};
