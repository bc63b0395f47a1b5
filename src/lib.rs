//! # cloudcp
//!
//! Copy files and directory trees between the local disk, platform storage
//! and object buckets.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cloudcp::fs::Backends;
//! use cloudcp::progress::LogProgress;
//! use cloudcp::transfer::{Transfer, TransferOptions};
//! use url::Url;
//!
//! let transfer = Transfer::new(
//!     Backends::local(),
//!     TransferOptions::default(),
//!     Arc::new(LogProgress),
//! )?;
//! let src = Url::parse("file:///data/models")?;
//! let dst = Url::parse("file:///backup/models")?;
//! let summary = transfer.copy(&src, &dst, true)?;
//! println!("{} files", summary.files);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod filter;
pub mod fs;
pub mod glob;
pub mod progress;
pub mod transfer;
pub mod uri;

pub use error::{FsError, FsResult};
