//! # Transfer Engine for cloudcp
//!
//! Copies files and directory trees between any two registered
//! [`FileSystem`] backends. Every combination works the same way: the
//! source is streamed through [`FileSystem::open`] into
//! [`FileSystem::write`] on the destination, so local→storage,
//! blob→local and storage→blob share one code path.
//!
//! Directory entries are processed on a `rayon` pool. An entry that fails
//! (unreadable file, special file, server error) is reported through
//! [`TransferProgress::fail`] and counted; the rest of the tree is still
//! copied.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use rayon::prelude::*;
use url::Url;

use crate::error::{FsError, FsResult};
use crate::filter::FileFilter;
use crate::fs::{Backends, FileStatus, FileSystem, FileType};
use crate::progress::{
    CompleteEvent, EnterDirEvent, FailEvent, LeaveDirEvent, ProgressReader, SkipEvent, StartEvent,
    TransferProgress,
};
use crate::uri;

/// How a transfer treats existing destinations and which entries it skips.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Skip files whose destination is at least as new as the source.
    pub update: bool,
    /// Resume destinations that are a shorter, newer copy of the source.
    pub continue_partial: bool,
    /// Command-line exclude/include rules; they win over ignore files.
    pub filter: FileFilter,
    /// Ignore files read from every source directory.
    pub ignore_file_names: Vec<String>,
    /// Worker threads.
    pub concurrency: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            update: false,
            continue_partial: false,
            filter: FileFilter::default(),
            ignore_file_names: Vec::new(),
            concurrency: 8,
        }
    }
}

/// What a transfer did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Files written (fully or resumed).
    pub files: u64,
    /// Bytes written.
    pub bytes: u64,
    /// Files left alone because the destination was current.
    pub skipped: u64,
    /// Entries excluded by filters.
    pub filtered: u64,
    /// Entries that failed.
    pub failed: u64,
    /// Directories visited.
    pub dirs: u64,
}

impl TransferSummary {
    /// Sum of two summaries.
    pub fn merge(self, other: TransferSummary) -> TransferSummary {
        TransferSummary {
            files: self.files + other.files,
            bytes: self.bytes + other.bytes,
            skipped: self.skipped + other.skipped,
            filtered: self.filtered + other.filtered,
            failed: self.failed + other.failed,
            dirs: self.dirs + other.dirs,
        }
    }

    fn failed() -> Self {
        TransferSummary {
            failed: 1,
            ..Default::default()
        }
    }
}

/// What to do with a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Skip(&'static str),
    Copy { offset: u64 },
}

/// Decide between skipping, resuming and rewriting a destination file.
fn plan(src: &FileStatus, dst: Option<&FileStatus>, update: bool, continue_partial: bool) -> Plan {
    if !update && !continue_partial {
        return Plan::Copy { offset: 0 };
    }
    let Some(dst) = dst.filter(|dst| dst.is_file()) else {
        return Plan::Copy { offset: 0 };
    };
    if dst.modified < src.modified {
        return Plan::Copy { offset: 0 };
    }
    if dst.size == src.size {
        return Plan::Skip("destination is up to date");
    }
    if continue_partial && dst.size < src.size {
        return Plan::Copy { offset: dst.size };
    }
    if update {
        return Plan::Skip("destination is newer");
    }
    Plan::Copy { offset: 0 }
}

/// A configured copy job.
pub struct Transfer {
    backends: Backends,
    options: TransferOptions,
    progress: Arc<dyn TransferProgress>,
    pool: rayon::ThreadPool,
}

impl Transfer {
    /// Create a transfer with its own worker pool.
    ///
    /// # Errors
    /// Returns an error if the worker threads cannot be spawned.
    pub fn new(
        backends: Backends,
        options: TransferOptions,
        progress: Arc<dyn TransferProgress>,
    ) -> FsResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.concurrency.max(1))
            .thread_name(|i| format!("cloudcp-worker-{i}"))
            .build()
            .map_err(|err| FsError::Io(std::io::Error::other(err.to_string())))?;

        Ok(Transfer {
            backends,
            options,
            progress,
            pool,
        })
    }

    /// Copy `src` to `dst`, choosing file or directory mode from the source.
    ///
    /// # Errors
    /// Returns [`FsError::IsADirectory`] for a directory source without
    /// `recursive`, [`FsError::Unsupported`] for special files, and any
    /// error that prevents the transfer from starting.
    pub fn copy(&self, src: &Url, dst: &Url, recursive: bool) -> FsResult<TransferSummary> {
        let src_fs = self.backends.get(src)?;
        let status = src_fs.stat(src)?;
        match status.file_type {
            FileType::Directory if recursive => self.copy_dir(src, dst),
            FileType::Directory => Err(FsError::IsADirectory(uri::display(src))),
            FileType::File => self.copy_file(src, dst),
            FileType::Unknown => Err(not_regular(src)),
        }
    }

    /// Copy a single file.
    ///
    /// # Errors
    /// Returns an error if the source is not a file, the destination is a
    /// directory, or reading/writing fails.
    pub fn copy_file(&self, src: &Url, dst: &Url) -> FsResult<TransferSummary> {
        let src_fs = self.backends.get(src)?;
        let dst_fs = self.backends.get(dst)?;

        let src_status = src_fs.stat(src)?;
        match src_status.file_type {
            FileType::File => {}
            FileType::Directory => return Err(FsError::IsADirectory(uri::display(src))),
            FileType::Unknown => return Err(not_regular(src)),
        }

        let dst_status = match dst_fs.stat(dst) {
            Ok(status) if status.is_dir() => return Err(FsError::IsADirectory(uri::display(dst))),
            Ok(status) => Some(status),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        self.pool.install(|| {
            self.file_inner(
                src_fs.as_ref(),
                src,
                &src_status,
                dst_fs.as_ref(),
                dst,
                dst_status.as_ref(),
            )
        })
    }

    /// Copy a directory tree.
    ///
    /// Failures below the top directory are reported as progress events and
    /// counted in [`TransferSummary::failed`].
    ///
    /// # Errors
    /// Returns an error if the source is not a directory, the destination
    /// exists and is not one, or the top directory cannot be listed.
    pub fn copy_dir(&self, src: &Url, dst: &Url) -> FsResult<TransferSummary> {
        let src_fs = self.backends.get(src)?;
        let dst_fs = self.backends.get(dst)?;

        if !src_fs.stat(src)?.is_dir() {
            return Err(FsError::NotADirectory(uri::display(src)));
        }

        let no_ignore = FileFilter::default();
        self.pool.install(|| {
            self.dir_inner(src_fs.as_ref(), src, dst_fs.as_ref(), dst, "", &no_ignore)
        })
    }

    fn file_inner(
        &self,
        src_fs: &dyn FileSystem,
        src: &Url,
        src_status: &FileStatus,
        dst_fs: &dyn FileSystem,
        dst: &Url,
        dst_status: Option<&FileStatus>,
    ) -> FsResult<TransferSummary> {
        let plan = plan(
            src_status,
            dst_status,
            self.options.update,
            self.options.continue_partial,
        );

        let mut offset = match plan {
            Plan::Skip(reason) => {
                tracing::debug!("skip {}: {reason}", uri::display(src));
                self.progress.skip(&SkipEvent {
                    src: src.clone(),
                    dst: dst.clone(),
                    reason: reason.to_string(),
                });
                return Ok(TransferSummary {
                    skipped: 1,
                    ..Default::default()
                });
            }
            Plan::Copy { offset } => offset,
        };

        if offset > 0 && !dst_fs.supports_append() {
            tracing::warn!(
                "{} cannot be resumed, copying from the start",
                uri::display(dst)
            );
            offset = 0;
        }

        let size = src_status.size;
        self.progress.start(&StartEvent {
            src: src.clone(),
            dst: dst.clone(),
            size,
        });

        let reader = src_fs.open(src, offset)?;
        let reader = ProgressReader::new(
            reader,
            Arc::clone(&self.progress),
            src.clone(),
            dst.clone(),
            offset,
            size,
        );
        let written = dst_fs.write(dst, Box::new(reader), size - offset, offset)?;

        if offset + written < size {
            return Err(FsError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "{} ended after {} of {size} bytes",
                    uri::display(src),
                    offset + written
                ),
            )));
        }

        self.progress.complete(&CompleteEvent {
            src: src.clone(),
            dst: dst.clone(),
            size,
        });
        Ok(TransferSummary {
            files: 1,
            bytes: written,
            ..Default::default()
        })
    }

    fn dir_inner(
        &self,
        src_fs: &dyn FileSystem,
        src: &Url,
        dst_fs: &dyn FileSystem,
        dst: &Url,
        rel: &str,
        ignore: &FileFilter,
    ) -> FsResult<TransferSummary> {
        match dst_fs.stat(dst) {
            Ok(status) if !status.is_dir() => {
                return Err(FsError::NotADirectory(uri::display(dst)));
            }
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        dst_fs.mkdir(dst, true, true)?;

        self.progress.enter(&EnterDirEvent {
            src: src.clone(),
            dst: dst.clone(),
        });

        let entries = src_fs.list(src)?;

        let loaded = self.load_ignore_files(src_fs, src, rel, &entries, ignore)?;
        let ignore = loaded.as_ref().unwrap_or(ignore);

        // One listing of the destination serves every update decision
        let existing: HashMap<String, FileStatus> =
            if self.options.update || self.options.continue_partial {
                match dst_fs.list(dst) {
                    Ok(statuses) => statuses
                        .into_iter()
                        .map(|status| (status.name.clone(), status))
                        .collect(),
                    Err(err) if err.is_not_found() => HashMap::new(),
                    Err(err) => return Err(err),
                }
            } else {
                HashMap::new()
            };

        let summary = entries
            .par_iter()
            .map(|entry| self.entry_inner(src_fs, src, dst_fs, dst, rel, ignore, &existing, entry))
            .reduce(TransferSummary::default, TransferSummary::merge);

        self.progress.leave(&LeaveDirEvent {
            src: src.clone(),
            dst: dst.clone(),
        });

        Ok(summary.merge(TransferSummary {
            dirs: 1,
            ..Default::default()
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn entry_inner(
        &self,
        src_fs: &dyn FileSystem,
        src: &Url,
        dst_fs: &dyn FileSystem,
        dst: &Url,
        rel: &str,
        ignore: &FileFilter,
        existing: &HashMap<String, FileStatus>,
        entry: &FileStatus,
    ) -> TransferSummary {
        let child_rel = if entry.is_dir() {
            format!("{rel}{}/", entry.name)
        } else {
            format!("{rel}{}", entry.name)
        };
        if !self.accepts(&child_rel, ignore) {
            tracing::debug!("filtered out {child_rel}");
            return TransferSummary {
                filtered: 1,
                ..Default::default()
            };
        }

        let child_src = uri::join(src, &entry.name);
        let child_dst = uri::join(dst, &entry.name);

        let result = match entry.file_type {
            FileType::Directory => {
                self.dir_inner(src_fs, &child_src, dst_fs, &child_dst, &child_rel, ignore)
            }
            FileType::File => match existing.get(&entry.name) {
                Some(status) if status.is_dir() => {
                    Err(FsError::IsADirectory(uri::display(&child_dst)))
                }
                status => self.file_inner(src_fs, &child_src, entry, dst_fs, &child_dst, status),
            },
            FileType::Unknown => Err(not_regular(&child_src)),
        };

        result.unwrap_or_else(|err| {
            self.progress.fail(&FailEvent {
                src: child_src,
                dst: child_dst,
                message: err.to_string(),
            });
            TransferSummary::failed()
        })
    }

    /// Command-line rules first, then ignore files, then include.
    fn accepts(&self, path: &str, ignore: &FileFilter) -> bool {
        self.options
            .filter
            .decide(path)
            .or_else(|| ignore.decide(path))
            .unwrap_or(true)
    }

    /// Extend `parent` with the ignore files present in this directory.
    ///
    /// Returns `None` when the directory has none.
    fn load_ignore_files(
        &self,
        src_fs: &dyn FileSystem,
        src: &Url,
        rel: &str,
        entries: &[FileStatus],
        parent: &FileFilter,
    ) -> FsResult<Option<FileFilter>> {
        let mut filter: Option<FileFilter> = None;
        for name in &self.options.ignore_file_names {
            if !entries.iter().any(|entry| entry.is_file() && &entry.name == name) {
                continue;
            }

            let ignore_uri = uri::join(src, name);
            let mut text = String::new();
            src_fs.open(&ignore_uri, 0)?.read_to_string(&mut text)?;
            tracing::debug!("applying {}", uri::display(&ignore_uri));

            filter
                .get_or_insert_with(|| parent.clone())
                .read_from_buffer(&text, rel)?;
        }
        Ok(filter)
    }
}

fn not_regular(uri: &Url) -> FsError {
    FsError::Unsupported(format!(
        "{} is not a regular file or directory",
        uri::display(uri)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{LocalFs, Source};
    use crate::progress::{NoProgress, StartEvent};
    use crate::uri::Scheme;
    use std::fs::{self, File};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    fn url(path: &Path) -> Url {
        Url::from_file_path(path).unwrap()
    }

    fn transfer(options: TransferOptions) -> Transfer {
        Transfer::new(Backends::local(), options, Arc::new(NoProgress)).unwrap()
    }

    fn status(size: u64, modified: i64) -> FileStatus {
        FileStatus {
            name: "f".into(),
            file_type: FileType::File,
            size,
            modified,
        }
    }

    fn age(path: &Path, secs: u64) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    /// Local disk that refuses to append, like an object store.
    struct NoAppend;

    impl FileSystem for NoAppend {
        fn stat(&self, uri: &Url) -> FsResult<FileStatus> {
            LocalFs.stat(uri)
        }
        fn list(&self, uri: &Url) -> FsResult<Vec<FileStatus>> {
            LocalFs.list(uri)
        }
        fn mkdir(&self, uri: &Url, parents: bool, exist_ok: bool) -> FsResult<()> {
            LocalFs.mkdir(uri, parents, exist_ok)
        }
        fn open(&self, uri: &Url, offset: u64) -> FsResult<Source> {
            LocalFs.open(uri, offset)
        }
        fn write(&self, uri: &Url, source: Source, len: u64, offset: u64) -> FsResult<u64> {
            if offset > 0 {
                return Err(FsError::Unsupported("append".into()));
            }
            LocalFs.write(uri, source, len, offset)
        }
        fn supports_append(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Recorder {
        starts: Mutex<Vec<u64>>,
        first_steps: Mutex<Vec<u64>>,
        fails: Mutex<Vec<String>>,
    }

    impl TransferProgress for Recorder {
        fn start(&self, event: &StartEvent) {
            self.starts.lock().unwrap().push(event.size);
        }
        fn step(&self, event: &crate::progress::StepEvent) {
            let mut steps = self.first_steps.lock().unwrap();
            if steps.is_empty() {
                steps.push(event.current);
            }
        }
        fn fail(&self, event: &FailEvent) {
            self.fails.lock().unwrap().push(event.message.clone());
        }
    }

    #[test]
    fn plan_decision_table() {
        let src = status(10, 100);
        assert_eq!(plan(&src, Some(&status(10, 200)), false, false), Plan::Copy { offset: 0 });
        assert_eq!(plan(&src, None, true, true), Plan::Copy { offset: 0 });
        assert_eq!(plan(&src, Some(&status(4, 50)), true, true), Plan::Copy { offset: 0 });
        assert!(matches!(plan(&src, Some(&status(10, 100)), true, false), Plan::Skip(_)));
        assert!(matches!(plan(&src, Some(&status(10, 100)), false, true), Plan::Skip(_)));
        assert_eq!(plan(&src, Some(&status(4, 100)), false, true), Plan::Copy { offset: 4 });
        assert_eq!(plan(&src, Some(&status(4, 100)), true, true), Plan::Copy { offset: 4 });
        assert!(matches!(plan(&src, Some(&status(4, 100)), true, false), Plan::Skip(_)));
        assert_eq!(plan(&src, Some(&status(20, 100)), false, true), Plan::Copy { offset: 0 });
    }

    #[test]
    fn copies_a_tree_recursively() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::create_dir_all(src.path().join("empty")).unwrap();
        fs::write(src.path().join("top.txt"), b"top").unwrap();
        fs::write(src.path().join("a/b/deep.txt"), b"deep file").unwrap();

        let target = dst.path().join("copy");
        let summary = transfer(TransferOptions::default())
            .copy(&url(src.path()), &url(&target), true)
            .unwrap();

        assert_eq!(fs::read(target.join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(target.join("a/b/deep.txt")).unwrap(), b"deep file");
        assert!(target.join("empty").is_dir());
        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 12);
        assert_eq!(summary.dirs, 4);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn directories_need_recursive() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let result = transfer(TransferOptions::default()).copy(
            &url(src.path()),
            &url(&dst.path().join("x")),
            false,
        );
        assert!(matches!(result, Err(FsError::IsADirectory(_))));
    }

    #[test]
    fn mismatched_destination_types_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file"), b"x").unwrap();
        fs::create_dir(dir.path().join("dir")).unwrap();
        fs::create_dir(dir.path().join("srcdir")).unwrap();
        let t = transfer(TransferOptions::default());

        assert!(matches!(
            t.copy_file(&url(&dir.path().join("file")), &url(&dir.path().join("dir"))),
            Err(FsError::IsADirectory(_))
        ));
        assert!(matches!(
            t.copy_dir(&url(&dir.path().join("srcdir")), &url(&dir.path().join("file"))),
            Err(FsError::NotADirectory(_))
        ));
    }

    #[test]
    fn update_skips_current_files_and_rewrites_stale_ones() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("same.txt"), b"same").unwrap();
        fs::write(src.path().join("stale.txt"), b"fresh").unwrap();
        fs::write(dst.path().join("same.txt"), b"same").unwrap();
        fs::write(dst.path().join("stale.txt"), b"old").unwrap();
        age(&dst.path().join("stale.txt"), 3600);

        let summary = transfer(TransferOptions {
            update: true,
            ..Default::default()
        })
        .copy_dir(&url(src.path()), &url(dst.path()))
        .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.files, 1);
        assert_eq!(fs::read(dst.path().join("stale.txt")).unwrap(), b"fresh");
    }

    #[test]
    fn continue_resumes_from_destination_size() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        fs::write(&src, b"0123456789").unwrap();
        age(&src, 60);
        fs::write(&dst, b"01234").unwrap();

        let recorder = Arc::new(Recorder::default());
        let t = Transfer::new(
            Backends::local(),
            TransferOptions {
                continue_partial: true,
                ..Default::default()
            },
            recorder.clone(),
        )
        .unwrap();

        let summary = t.copy_file(&url(&src), &url(&dst)).unwrap();
        assert_eq!(summary.bytes, 5);
        assert_eq!(fs::read(&dst).unwrap(), b"0123456789");
        assert_eq!(*recorder.starts.lock().unwrap(), vec![10]);
        assert_eq!(*recorder.first_steps.lock().unwrap(), vec![10]);
    }

    #[test]
    fn continue_restarts_when_destination_cannot_append() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        fs::write(&src, b"0123456789").unwrap();
        age(&src, 60);
        fs::write(&dst, b"01234").unwrap();

        let backends = Backends::default().with(Scheme::File, Arc::new(NoAppend));
        let t = Transfer::new(
            backends,
            TransferOptions {
                continue_partial: true,
                ..Default::default()
            },
            Arc::new(NoProgress),
        )
        .unwrap();

        let summary = t.copy_file(&url(&src), &url(&dst)).unwrap();
        assert_eq!(summary.bytes, 10);
        assert_eq!(fs::read(&dst).unwrap(), b"0123456789");
    }

    #[test]
    fn filters_and_ignore_files_select_entries() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let root = src.path();
        fs::create_dir_all(root.join("sub/secret")).unwrap();
        fs::create_dir_all(root.join("secret")).unwrap();
        fs::write(root.join("keep.txt"), b"k").unwrap();
        fs::write(root.join("debug.log"), b"l").unwrap();
        fs::write(root.join("important.log"), b"i").unwrap();
        fs::write(root.join("secret/top.txt"), b"s").unwrap();
        fs::write(root.join("sub/.cloudcpignore"), b"secret/\n*.tmp\n").unwrap();
        fs::write(root.join("sub/a.tmp"), b"t").unwrap();
        fs::write(root.join("sub/b.txt"), b"b").unwrap();
        fs::write(root.join("sub/secret/x.txt"), b"x").unwrap();

        let mut filter = FileFilter::new();
        filter.exclude("*.log", "").unwrap();
        filter.include("important.log", "").unwrap();
        filter.include("a.tmp", "").unwrap();

        let summary = transfer(TransferOptions {
            filter,
            ignore_file_names: vec![".cloudcpignore".into()],
            ..Default::default()
        })
        .copy_dir(&url(root), &url(dst.path()))
        .unwrap();

        let out = dst.path();
        assert!(out.join("keep.txt").exists());
        assert!(out.join("important.log").exists());
        assert!(!out.join("debug.log").exists());
        // The ignore file only applies below `sub/`
        assert!(out.join("secret/top.txt").exists());
        assert!(!out.join("sub/secret").exists());
        assert!(out.join("sub/b.txt").exists());
        assert!(out.join("sub/.cloudcpignore").exists());
        // Command-line includes win over ignore files
        assert!(out.join("sub/a.tmp").exists());
        assert_eq!(summary.filtered, 2);
    }

    #[cfg(unix)]
    #[test]
    fn special_entries_fail_without_stopping_the_walk() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("ok.txt"), b"ok").unwrap();
        std::os::unix::fs::symlink(src.path().join("missing"), src.path().join("dangling"))
            .unwrap();

        let recorder = Arc::new(Recorder::default());
        let t = Transfer::new(Backends::local(), TransferOptions::default(), recorder.clone())
            .unwrap();
        let summary = t.copy_dir(&url(src.path()), &url(dst.path())).unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.failed, 1);
        assert!(dst.path().join("ok.txt").exists());
        let fails = recorder.fails.lock().unwrap();
        assert!(fails[0].contains("not a regular file"));
    }
}
