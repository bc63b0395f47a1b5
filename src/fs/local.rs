use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use url::Url;

use super::{FileStatus, FileSystem, FileType, Source};
use crate::error::{FsError, FsResult};

/// The local disk. Symlinks are followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    fn path(uri: &Url) -> FsResult<PathBuf> {
        uri.to_file_path()
            .map_err(|_| FsError::InvalidUri(format!("{uri} is not a local path")))
    }
}

impl FileSystem for LocalFs {
    fn stat(&self, uri: &Url) -> FsResult<FileStatus> {
        let path = Self::path(uri)?;
        let metadata = fs::metadata(&path).map_err(|e| io_error(e, &path))?;
        Ok(status_from_metadata(file_name(&path), &metadata))
    }

    fn list(&self, uri: &Url) -> FsResult<Vec<FileStatus>> {
        let path = Self::path(uri)?;
        if !path.is_dir() {
            return Err(if path.exists() {
                FsError::NotADirectory(path.display().to_string())
            } else {
                FsError::NotFound(path.display().to_string())
            });
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&path).map_err(|e| io_error(e, &path))? {
            let entry = entry.map_err(|e| io_error(e, &path))?;
            let name = entry.file_name().to_string_lossy().into_owned();

            // Follow symlinks; a dangling one is reported as unknown
            let status = match fs::metadata(entry.path()) {
                Ok(metadata) => status_from_metadata(name, &metadata),
                Err(_) => FileStatus {
                    name,
                    file_type: FileType::Unknown,
                    size: 0,
                    modified: entry.metadata().map(|m| modified_secs(&m)).unwrap_or(0),
                },
            };
            entries.push(status);
        }
        Ok(entries)
    }

    fn mkdir(&self, uri: &Url, parents: bool, exist_ok: bool) -> FsResult<()> {
        let path = Self::path(uri)?;
        if path.is_dir() {
            return if exist_ok {
                Ok(())
            } else {
                Err(FsError::AlreadyExists(path.display().to_string()))
            };
        }

        let created = if parents {
            fs::create_dir_all(&path)
        } else {
            fs::create_dir(&path)
        };
        created.map_err(|e| io_error(e, &path))
    }

    fn open(&self, uri: &Url, offset: u64) -> FsResult<Source> {
        let path = Self::path(uri)?;
        if path.is_dir() {
            return Err(FsError::IsADirectory(path.display().to_string()));
        }
        let mut file = File::open(&path).map_err(|e| io_error(e, &path))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Box::new(file))
    }

    fn write(&self, uri: &Url, source: Source, len: u64, offset: u64) -> FsResult<u64> {
        let path = Self::path(uri)?;
        if path.is_dir() {
            return Err(FsError::IsADirectory(path.display().to_string()));
        }

        let mut file = if offset == 0 {
            File::create(&path).map_err(|e| io_error(e, &path))?
        } else {
            // Keep the first `offset` bytes and drop anything after them
            let mut file = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|e| io_error(e, &path))?;
            file.set_len(offset)?;
            file.seek(SeekFrom::Start(offset))?;
            file
        };

        let written = io::copy(&mut source.take(len), &mut file)?;
        file.sync_all()?;
        Ok(written)
    }

    fn supports_append(&self) -> bool {
        true
    }
}

fn io_error(err: io::Error, path: &Path) -> FsError {
    FsError::from_io(err, &path.display().to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

fn status_from_metadata(name: String, metadata: &Metadata) -> FileStatus {
    let file_type = if metadata.is_file() {
        FileType::File
    } else if metadata.is_dir() {
        FileType::Directory
    } else {
        FileType::Unknown
    };
    FileStatus {
        name,
        file_type,
        size: if metadata.is_file() { metadata.len() } else { 0 },
        modified: modified_secs(metadata),
    }
}

fn modified_secs(metadata: &Metadata) -> i64 {
    match metadata.modified() {
        Ok(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        },
        Err(_) => 0,
    }
}
