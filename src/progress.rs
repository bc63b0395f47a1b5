//! # Transfer Progress Reporting for cloudcp
//!
//! The transfer engine announces what it does through the
//! [`TransferProgress`] trait: files starting, advancing and completing,
//! directories being entered and left, entries skipped or failed. Sinks
//! decide what to do with those events:
//!
//! - [`NoProgress`] ignores them,
//! - [`LogProgress`] turns them into `tracing` records,
//! - [`BarProgress`] draws `indicatif` progress bars.
//!
//! Events arrive from several worker threads at once, so every sink is
//! `Send + Sync`.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use url::Url;

use crate::uri;

/// A file transfer is about to begin.
#[derive(Debug, Clone)]
pub struct StartEvent {
    pub src: Url,
    pub dst: Url,
    pub size: u64,
}

/// Bytes were transferred; `current` is the absolute position in the file.
#[derive(Debug, Clone)]
pub struct StepEvent {
    pub src: Url,
    pub dst: Url,
    pub current: u64,
    pub size: u64,
}

/// A file transfer finished.
#[derive(Debug, Clone)]
pub struct CompleteEvent {
    pub src: Url,
    pub dst: Url,
    pub size: u64,
}

/// Recursion entered a directory.
#[derive(Debug, Clone)]
pub struct EnterDirEvent {
    pub src: Url,
    pub dst: Url,
}

/// Recursion finished a directory.
#[derive(Debug, Clone)]
pub struct LeaveDirEvent {
    pub src: Url,
    pub dst: Url,
}

/// A file was not copied because the destination is already current.
#[derive(Debug, Clone)]
pub struct SkipEvent {
    pub src: Url,
    pub dst: Url,
    pub reason: String,
}

/// An entry could not be transferred; the traversal goes on.
#[derive(Debug, Clone)]
pub struct FailEvent {
    pub src: Url,
    pub dst: Url,
    pub message: String,
}

/// Receiver of transfer events. Every method defaults to doing nothing.
pub trait TransferProgress: Send + Sync {
    fn start(&self, _event: &StartEvent) {}
    fn step(&self, _event: &StepEvent) {}
    fn complete(&self, _event: &CompleteEvent) {}
    fn enter(&self, _event: &EnterDirEvent) {}
    fn leave(&self, _event: &LeaveDirEvent) {}
    fn skip(&self, _event: &SkipEvent) {}
    fn fail(&self, _event: &FailEvent) {}
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NoProgress;

impl TransferProgress for NoProgress {}

/// Reports events through `tracing`.
#[derive(Debug, Default)]
pub struct LogProgress;

impl TransferProgress for LogProgress {
    fn start(&self, event: &StartEvent) {
        tracing::debug!(src = %uri::display(&event.src), size = event.size, "start");
    }

    fn step(&self, event: &StepEvent) {
        tracing::trace!(src = %uri::display(&event.src), current = event.current, size = event.size, "step");
    }

    fn complete(&self, event: &CompleteEvent) {
        tracing::info!(
            "'{}' -> '{}' ({})",
            uri::display(&event.src),
            uri::display(&event.dst),
            format_size(event.size)
        );
    }

    fn enter(&self, event: &EnterDirEvent) {
        tracing::debug!("entering '{}'", uri::display(&event.src));
    }

    fn leave(&self, event: &LeaveDirEvent) {
        tracing::debug!("leaving '{}'", uri::display(&event.src));
    }

    fn skip(&self, event: &SkipEvent) {
        tracing::info!("skipped '{}': {}", uri::display(&event.src), event.reason);
    }

    fn fail(&self, event: &FailEvent) {
        tracing::error!("'{}' -> '{}': {}", uri::display(&event.src), uri::display(&event.dst), event.message);
    }
}

/// Terminal progress bars: one overall counter plus a bar per file in
/// flight.
pub struct BarProgress {
    progress: MultiProgress,
    overall: ProgressBar,
    files: Mutex<HashMap<String, ProgressBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        let progress = MultiProgress::new();

        let overall = progress.add(ProgressBar::new_spinner());
        overall.set_style(
            ProgressStyle::with_template("{spinner:.bold.cyan} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
        );
        overall.enable_steady_tick(Duration::from_millis(100));
        overall.set_message("Copying...");

        BarProgress {
            progress,
            overall,
            files: Mutex::new(HashMap::new()),
        }
    }

    fn file_bar(&self, src: &Url, size: u64) -> ProgressBar {
        let bar = self.progress.add(ProgressBar::new(size));
        bar.set_style(
            ProgressStyle::with_template(
                "\t{msg:40!} [{wide_bar:.bold.cyan}] {bytes}/{total_bytes} ({eta} remaining)",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        bar.set_message(uri::display(src));
        bar
    }

    fn take_bar(&self, src: &Url) -> Option<ProgressBar> {
        self.files
            .lock()
            .ok()
            .and_then(|mut files| files.remove(src.as_str()))
    }

    /// Print a line above the bars.
    fn println(&self, line: String) {
        if self.progress.println(&line).is_err() {
            eprintln!("{line}");
        }
    }

    /// Close the overall counter with a summary message.
    pub fn finish(&self, message: String) {
        self.overall.finish_with_message(message);
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        BarProgress::new()
    }
}

impl TransferProgress for BarProgress {
    fn start(&self, event: &StartEvent) {
        let bar = self.file_bar(&event.src, event.size);
        if let Ok(mut files) = self.files.lock() {
            files.insert(event.src.to_string(), bar);
        }
    }

    fn step(&self, event: &StepEvent) {
        if let Ok(files) = self.files.lock() {
            if let Some(bar) = files.get(event.src.as_str()) {
                bar.set_position(event.current);
            }
        }
    }

    fn complete(&self, event: &CompleteEvent) {
        if let Some(bar) = self.take_bar(&event.src) {
            bar.finish_and_clear();
            self.progress.remove(&bar);
        }
        self.overall.inc(1);
        self.overall.set_message(format!(
            "{} {}",
            "Copied".cyan().bold(),
            uri::display(&event.dst).bold()
        ));
    }

    fn enter(&self, event: &EnterDirEvent) {
        self.overall.set_message(format!(
            "{} {}",
            "Scanning".cyan().bold(),
            uri::display(&event.src).bold()
        ));
    }

    fn fail(&self, event: &FailEvent) {
        if let Some(bar) = self.take_bar(&event.src) {
            bar.finish_and_clear();
            self.progress.remove(&bar);
        }
        self.println(format!(
            "{} {}: {}",
            "✗".red().bold(),
            format!("Failed to copy {}", uri::display(&event.src)).red(),
            event.message.dimmed()
        ));
    }
}

/// Reader adapter emitting [`StepEvent`]s as bytes flow through it.
pub struct ProgressReader<R> {
    inner: R,
    progress: Arc<dyn TransferProgress>,
    src: Url,
    dst: Url,
    current: u64,
    size: u64,
}

impl<R: Read> ProgressReader<R> {
    /// Wrap `inner`, which starts at byte `offset` of a `size` byte file.
    pub fn new(
        inner: R,
        progress: Arc<dyn TransferProgress>,
        src: Url,
        dst: Url,
        offset: u64,
        size: u64,
    ) -> Self {
        ProgressReader {
            inner,
            progress,
            src,
            dst,
            current: offset,
            size,
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.current += n as u64;
            self.progress.step(&StepEvent {
                src: self.src.clone(),
                dst: self.dst.clone(),
                current: self.current,
                size: self.size,
            });
        }
        Ok(n)
    }
}

/// Format a byte count with decimal units.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1000;
    const MB: u64 = KB * 1000;
    const GB: u64 = MB * 1000;

    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        _ => format!("{} B", bytes),
    }
}
