#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # sealant-core
//!
//! Error type and result combinators shared by the Sealant crates.
//!
//! Nothing here knows about heaps or browsers; it covers the file and JSON
//! plumbing every crate needs when loading artifacts and writing reports.

pub mod error;
pub mod fs;
pub mod result;

pub use error::Error;
pub use result::{Result, ResultExt};
