use crate::config::Config;
use crate::error::FsError;
use crate::filter::FileFilter;
use crate::fs::{Backends, FileStatus};
use crate::glob;
use crate::progress::{BarProgress, FailEvent, LogProgress, TransferProgress, format_size};
use crate::transfer::{Transfer, TransferOptions, TransferSummary};
use crate::uri::{self, UriContext};

use anyhow::{Context, Result, bail};
use clap::{ArgMatches, Args};
use colored::Colorize;
use url::Url;

use std::io::IsTerminal;
use std::sync::Arc;

/// Arguments for the `cloudcp cp` subcommand.
///
/// Copies files and directory trees between the local disk (`file:` or
/// plain paths), platform storage (`storage:`) and object buckets
/// (`blob:`). The last path is the destination unless `-t` names it.
#[derive(Args, Debug)]
#[command(override_usage = "cloudcp cp [OPTIONS] SOURCES... DESTINATION\n       \
                            cloudcp cp [OPTIONS] -t DIRECTORY SOURCES...")]
pub struct CpArgs {
    /// Sources followed by the destination
    #[arg(required = true, value_name = "PATHS")]
    paths: Vec<String>,

    /// Copy directories recursively
    #[arg(short, long)]
    recursive: bool,

    /// Copy only when the source is newer than the destination or the
    /// destination is missing
    #[arg(short, long)]
    update: bool,

    /// Resume partially copied files
    #[arg(short = 'c', long = "continue")]
    continue_partial: bool,

    /// Exclude files matching PATTERN (may be repeated)
    #[arg(long, value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Re-include files matching PATTERN excluded earlier (may be repeated)
    #[arg(long, value_name = "PATTERN")]
    include: Vec<String>,

    /// Space separated names of ignore files read in every source
    /// directory; "" disables them
    #[arg(long, value_name = "NAMES")]
    exclude_from_files: Option<String>,

    /// Expand wildcards in sources (default)
    #[arg(long, overrides_with = "no_glob")]
    glob: bool,

    /// Treat sources literally
    #[arg(long)]
    no_glob: bool,

    /// Copy all sources into DIRECTORY
    #[arg(short = 't', long, value_name = "DIRECTORY", conflicts_with = "no_target_directory")]
    target_directory: Option<String>,

    /// Treat the destination as a normal file
    #[arg(short = 'T', long)]
    no_target_directory: bool,

    /// Show progress bars
    #[arg(short = 'p', long, overrides_with = "no_progress")]
    progress: bool,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,

    /// Number of files copied in parallel
    #[arg(short = 'j', long, value_name = "N")]
    concurrency: Option<usize>,
}

/// Where each source ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// The destination is a directory receiving `dst/<source name>`.
    Into,
    /// The destination is the exact target path.
    Exact,
}

/// Decide how sources map onto the destination.
///
/// `dst_status` describes the destination if it exists.
fn placement(
    sources: usize,
    dst: &str,
    dst_status: Option<&FileStatus>,
    target_directory: bool,
    no_target_directory: bool,
) -> Result<Placement> {
    let dst_is_dir = dst_status.is_some_and(FileStatus::is_dir);

    if target_directory || sources > 1 {
        if no_target_directory {
            bail!("extra operand: -T allows a single source, got {sources}");
        }
        return match dst_status {
            Some(_) if dst_is_dir => Ok(Placement::Into),
            Some(_) => bail!("target '{dst}' is not a directory"),
            None => bail!("target directory '{dst}' does not exist"),
        };
    }

    if no_target_directory || !dst_is_dir {
        Ok(Placement::Exact)
    } else {
        Ok(Placement::Into)
    }
}

/// `--exclude`/`--include` in the order they appeared on the command line.
///
/// Returns `(exclude, pattern)` pairs.
fn filter_rules(matches: &ArgMatches) -> Vec<(bool, String)> {
    let mut rules: Vec<(usize, bool, String)> = Vec::new();
    for (id, exclude) in [("exclude", true), ("include", false)] {
        if let (Some(indices), Some(values)) =
            (matches.indices_of(id), matches.get_many::<String>(id))
        {
            rules.extend(indices.zip(values).map(|(i, v)| (i, exclude, v.clone())));
        }
    }
    rules.sort_by_key(|(index, _, _)| *index);
    rules
        .into_iter()
        .map(|(_, exclude, pattern)| (exclude, pattern))
        .collect()
}

/// Runs the `cp` command.
///
/// # Arguments
/// * `args` - Parsed options.
/// * `matches` - The raw matches of the subcommand, used to keep the order
///   of `--exclude` and `--include`.
/// * `config` - Effective configuration.
/// * `quiet` - Suppress the summary line and progress bars.
pub fn run(args: CpArgs, matches: &ArgMatches, config: &Config, quiet: bool) -> Result<()> {
    let mut paths = args.paths.clone();
    let dst_arg = match &args.target_directory {
        Some(dir) => dir.clone(),
        None => {
            if paths.len() < 2 {
                bail!("missing destination operand after '{}'", paths.join(" "));
            }
            paths.pop().context("missing destination operand")?
        }
    };

    let ctx = config.uri_context()?;
    let backends = Backends::from_config(config)?;
    let dst = uri::parse(&dst_arg, &ctx).with_context(|| format!("Invalid destination '{dst_arg}'"))?;

    let use_glob = args.glob || !args.no_glob;
    let sources = resolve_sources(&paths, &ctx, &backends, use_glob)?;

    let dst_fs = backends.get(&dst)?;
    if args.target_directory.is_some() {
        dst_fs
            .mkdir(&dst, true, true)
            .with_context(|| format!("Failed to create directory '{}'", uri::display(&dst)))?;
    }
    let dst_status = match dst_fs.stat(&dst) {
        Ok(status) => Some(status),
        Err(err) if err.is_not_found() => None,
        Err(err) => return Err(err).context(format!("Failed to check '{}'", uri::display(&dst))),
    };
    let mode = placement(
        sources.len(),
        &uri::display(&dst),
        dst_status.as_ref(),
        args.target_directory.is_some(),
        args.no_target_directory,
    )?;

    let mut filter = FileFilter::new();
    for (exclude, pattern) in filter_rules(matches) {
        if exclude {
            filter.exclude(&pattern, "")?;
        } else {
            filter.include(&pattern, "")?;
        }
    }

    let ignore_file_names = match &args.exclude_from_files {
        Some(names) => names.split_whitespace().map(str::to_string).collect(),
        None => config.transfer.ignore_files.clone(),
    };

    let concurrency = args.concurrency.unwrap_or(config.transfer.concurrency);
    if concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }

    let show_bars = if args.no_progress {
        false
    } else {
        args.progress || (!quiet && std::io::stderr().is_terminal())
    };
    let bars = show_bars.then(|| Arc::new(BarProgress::new()));
    let progress: Arc<dyn TransferProgress> = match &bars {
        Some(bars) => Arc::clone(bars) as Arc<dyn TransferProgress>,
        None => Arc::new(LogProgress),
    };

    let transfer = Transfer::new(
        backends,
        TransferOptions {
            update: args.update,
            continue_partial: args.continue_partial,
            filter,
            ignore_file_names,
            concurrency,
        },
        Arc::clone(&progress),
    )?;

    let mut total = TransferSummary::default();
    for src in &sources {
        let target = match mode {
            Placement::Exact => dst.clone(),
            Placement::Into => {
                let name = uri::file_name(src).with_context(|| {
                    format!("Cannot copy '{}' into a directory: it has no name", uri::display(src))
                })?;
                uri::join(&dst, &name)
            }
        };

        tracing::debug!("copy {} -> {}", uri::display(src), uri::display(&target));
        match transfer.copy(src, &target, args.recursive) {
            Ok(summary) => total = total.merge(summary),
            Err(err) => {
                let message = match err {
                    FsError::IsADirectory(path) if !args.recursive && path == uri::display(src) => {
                        format!("{path} is a directory (use -r to copy it)")
                    }
                    other => other.to_string(),
                };
                progress.fail(&FailEvent {
                    src: src.clone(),
                    dst: target,
                    message,
                });
                total.failed += 1;
            }
        }
    }

    let line = summary_line(&total);
    match &bars {
        Some(bars) => bars.finish(line),
        None if !quiet => println!("{line}"),
        None => {}
    }

    if total.failed > 0 {
        bail!("{} item(s) could not be copied", total.failed);
    }
    Ok(())
}

/// Parse every source, expanding wildcards when enabled.
fn resolve_sources(
    paths: &[String],
    ctx: &UriContext,
    backends: &Backends,
    use_glob: bool,
) -> Result<Vec<Url>> {
    let mut sources = Vec::new();
    for path in paths {
        let src = uri::parse(path, ctx).with_context(|| format!("Invalid source '{path}'"))?;
        if !use_glob || !uri::segments(&src).iter().any(|s| glob::has_magic(s)) {
            sources.push(src);
            continue;
        }

        let fs = backends.get(&src)?;
        let matched = glob::expand(fs.as_ref(), &src)
            .with_context(|| format!("Failed to expand '{path}'"))?;
        if matched.is_empty() {
            bail!("No matches found for '{path}'");
        }
        sources.extend(matched);
    }
    Ok(sources)
}

fn summary_line(summary: &TransferSummary) -> String {
    let mut line = format!(
        "{} {}",
        "✓".green().bold(),
        format!(
            "Copied {} file(s), {}",
            summary.files,
            format_size(summary.bytes)
        )
        .green()
    );
    if summary.skipped > 0 {
        line.push_str(&format!(", {} up to date", summary.skipped));
    }
    if summary.filtered > 0 {
        line.push_str(&format!(", {} filtered", summary.filtered));
    }
    if summary.failed > 0 {
        line.push_str(&format!(", {}", format!("{} failed", summary.failed).red()));
    }
    line
}
