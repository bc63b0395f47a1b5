//! # File-System Backends for cloudcp
//!
//! The transfer engine never talks to a concrete storage service. It works
//! against the [`FileSystem`] trait, which every backend implements:
//!
//! - [`LocalFs`] for the local disk,
//! - [`StorageFs`] for platform storage,
//! - [`BlobFs`] for object buckets.
//!
//! [`Backends`] maps each URI scheme to the backend serving it.

mod blob;
mod local;
mod storage;

pub use blob::BlobFs;
pub use local::LocalFs;
pub use storage::StorageFs;

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::api::ApiClient;
use crate::config::Config;
use crate::error::{FsError, FsResult};
use crate::uri::{self, Scheme};

/// Kind of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    /// Symlinks to nowhere, sockets, devices and the like.
    Unknown,
}

/// Metadata of a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// Last path segment.
    pub name: String,
    pub file_type: FileType,
    /// Size in bytes; zero for directories.
    pub size: u64,
    /// Modification time in unix seconds.
    pub modified: i64,
}

impl FileStatus {
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// Reader handed from one backend to another during a copy.
pub type Source = Box<dyn Read + Send>;

/// Operations the transfer engine needs from a storage backend.
pub trait FileSystem: Send + Sync {
    /// Metadata for `uri`.
    fn stat(&self, uri: &Url) -> FsResult<FileStatus>;

    /// Direct children of the directory at `uri`.
    fn list(&self, uri: &Url) -> FsResult<Vec<FileStatus>>;

    /// Create a directory.
    ///
    /// With `parents`, missing ancestors are created too. With `exist_ok`,
    /// an existing directory is not an error.
    fn mkdir(&self, uri: &Url, parents: bool, exist_ok: bool) -> FsResult<()>;

    /// Stream the file contents starting at byte `offset`.
    fn open(&self, uri: &Url, offset: u64) -> FsResult<Source>;

    /// Write `len` bytes from `source` to `uri`.
    ///
    /// `offset == 0` creates or truncates the file. A positive offset keeps
    /// the first `offset` bytes and writes after them; backends that cannot
    /// do that return [`FsError::Unsupported`]. Returns the bytes written.
    fn write(&self, uri: &Url, source: Source, len: u64, offset: u64) -> FsResult<u64>;

    /// Whether [`FileSystem::write`] accepts a positive offset.
    fn supports_append(&self) -> bool;
}

/// Scheme to backend lookup.
#[derive(Clone, Default)]
pub struct Backends {
    by_scheme: HashMap<Scheme, Arc<dyn FileSystem>>,
}

impl Backends {
    /// A registry serving only the local disk.
    pub fn local() -> Self {
        Backends::default().with(Scheme::File, Arc::new(LocalFs))
    }

    /// Build every backend the configuration allows.
    ///
    /// Remote backends are only registered when the API URL and token are
    /// both configured; local transfers work without them.
    ///
    /// # Errors
    /// Returns an error if the endpoints are malformed or the HTTP client
    /// cannot be created.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut backends = Backends::local();

        let Some(token) = config.api.token.as_deref().filter(|_| config.is_remote_configured())
        else {
            tracing::debug!("platform API not configured, only local paths are available");
            return Ok(backends);
        };

        let timeout = config.transfer.timeout_secs.map(Duration::from_secs);
        let api = Arc::new(ApiClient::new(token, timeout).context("Failed to build HTTP client")?);

        backends = backends
            .with(
                Scheme::Storage,
                Arc::new(StorageFs::new(
                    Arc::clone(&api),
                    config.storage_url()?,
                    &config.api.cluster,
                )),
            )
            .with(
                Scheme::Blob,
                Arc::new(BlobFs::new(api, config.blob_url()?, &config.api.cluster)),
            );
        Ok(backends)
    }

    /// Register (or replace) the backend for `scheme`.
    pub fn with(mut self, scheme: Scheme, fs: Arc<dyn FileSystem>) -> Self {
        self.by_scheme.insert(scheme, fs);
        self
    }

    /// The backend serving `uri`.
    ///
    /// # Errors
    /// Returns [`FsError::Unsupported`] when no backend is registered for
    /// the scheme (typically a remote URI without API settings).
    pub fn get(&self, uri: &Url) -> FsResult<Arc<dyn FileSystem>> {
        let scheme = uri::scheme(uri)?;
        self.by_scheme.get(&scheme).cloned().ok_or_else(|| {
            FsError::Unsupported(format!(
                "{}: URIs need api.url and api.token in the config",
                scheme.as_str()
            ))
        })
    }
}
