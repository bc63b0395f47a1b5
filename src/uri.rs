//! # Resource URI Handling for cloudcp
//!
//! Every location the transfer engine touches is a [`Url`] with one of three
//! schemes:
//!
//! - `file:///abs/path` for the local disk,
//! - `storage://{cluster}/{path}` for platform storage,
//! - `blob://{cluster}/{bucket}/{key}` for object buckets.
//!
//! Users rarely type the full form. [`parse`] expands the short forms
//! (`storage:data`, `blob:bucket/key`, `./local`, `~/x`) against a
//! [`UriContext`] and normalises `.`/`..` segments. Path characters that
//! carry meaning inside a URL (`?`, `#`, `%`, spaces) always end up as
//! percent-encoded path data.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::error::{FsError, FsResult};

/// The storage backend a URI points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Local disk.
    File,
    /// Platform storage (remote POSIX-like file system).
    Storage,
    /// Object buckets.
    Blob,
}

impl Scheme {
    /// The URI scheme string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::File => "file",
            Scheme::Storage => "storage",
            Scheme::Blob => "blob",
        }
    }
}

/// Values needed to expand short URI forms.
#[derive(Debug, Clone)]
pub struct UriContext {
    /// Cluster used when a remote URI names none.
    pub cluster: String,
    /// User whose home directory `storage:` paths are relative to; short
    /// forms needing it are rejected when unknown.
    pub user: Option<String>,
    /// Base for relative local paths.
    pub cwd: PathBuf,
    /// Expansion of `~` in local paths.
    pub home: PathBuf,
}

impl UriContext {
    /// Build a context from the process working directory and home.
    ///
    /// # Errors
    /// Returns an error if the current directory cannot be determined.
    pub fn from_env(cluster: &str, user: Option<&str>) -> FsResult<Self> {
        let cwd = std::env::current_dir()?;
        let home = dirs::home_dir().unwrap_or_else(|| cwd.clone());
        Ok(UriContext {
            cluster: cluster.to_string(),
            user: user.map(str::to_string),
            cwd,
            home,
        })
    }
}

/// Parse user input into a normalised resource URI.
///
/// # Arguments
/// * `input` - A path or URI as typed on the command line.
/// * `ctx` - Cluster, user and directories used to expand short forms.
///
/// # Errors
/// Returns [`FsError::InvalidUri`] if the scheme is not supported, a `..`
/// segment climbs above the root, or `~` cannot be expanded.
pub fn parse(input: &str, ctx: &UriContext) -> FsResult<Url> {
    match split_scheme(input) {
        Some(("file", rest)) => parse_file(input, rest, ctx),
        Some(("storage", rest)) => parse_remote(Scheme::Storage, input, rest, ctx),
        Some(("blob", rest)) => parse_remote(Scheme::Blob, input, rest, ctx),
        Some((other, _)) => Err(FsError::InvalidUri(format!(
            "unsupported scheme '{other}:' in {input}"
        ))),
        None => local_url(input, &expand_home(input, ctx)?, ctx),
    }
}

/// The backend a normalised URI belongs to.
///
/// # Errors
/// Returns [`FsError::InvalidUri`] for schemes other than `file`, `storage`
/// and `blob`.
pub fn scheme(uri: &Url) -> FsResult<Scheme> {
    match uri.scheme() {
        "file" => Ok(Scheme::File),
        "storage" => Ok(Scheme::Storage),
        "blob" => Ok(Scheme::Blob),
        other => Err(FsError::InvalidUri(format!(
            "unsupported scheme '{other}:' in {uri}"
        ))),
    }
}

/// Append a single path segment (a file or directory name).
pub fn join(uri: &Url, name: &str) -> Url {
    let mut child = uri.clone();
    if let Ok(mut segments) = child.path_segments_mut() {
        segments.pop_if_empty().push(name);
    }
    child
}

/// The URI one level up, or `None` at the root.
pub fn parent(uri: &Url) -> Option<Url> {
    if segments(uri).is_empty() {
        return None;
    }
    let mut up = uri.clone();
    if let Ok(mut segments) = up.path_segments_mut() {
        segments.pop_if_empty().pop();
    }
    Some(up)
}

/// Last path segment, percent-decoded.
pub fn file_name(uri: &Url) -> Option<String> {
    segments(uri).pop()
}

/// All non-empty path segments, percent-decoded.
pub fn segments(uri: &Url) -> Vec<String> {
    uri.path_segments()
        .map(|parts| {
            parts
                .filter(|part| !part.is_empty())
                .map(|part| {
                    urlencoding::decode(part)
                        .map(|decoded| decoded.into_owned())
                        .unwrap_or_else(|_| part.to_string())
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Human readable form: local paths as plain paths, remote URIs decoded.
pub fn display(uri: &Url) -> String {
    if uri.scheme() == "file" {
        if let Ok(path) = uri.to_file_path() {
            return path.display().to_string();
        }
    }
    format!(
        "{}://{}/{}",
        uri.scheme(),
        uri.host_str().unwrap_or_default(),
        segments(uri).join("/")
    )
}

/// Split `scheme:rest`, treating single letters (`C:`) and anything with
/// path characters before the colon as a plain path.
fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = input.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if scheme.len() < 2
        || !first.is_ascii_alphabetic()
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }
    Some((scheme, rest))
}

fn parse_file(input: &str, rest: &str, ctx: &UriContext) -> FsResult<Url> {
    let path = match rest.strip_prefix("//") {
        Some(authority_and_path) => {
            // Only an empty or `localhost` authority makes sense for local files
            let (host, path) = match authority_and_path.find('/') {
                Some(idx) => authority_and_path.split_at(idx),
                None => (authority_and_path, "/"),
            };
            if !host.is_empty() && host != "localhost" {
                return Err(FsError::InvalidUri(format!(
                    "host '{host}' is not allowed in {input}"
                )));
            }
            let decoded = urlencoding::decode(path)
                .map_err(|_| FsError::InvalidUri(format!("invalid encoding in {input}")))?;
            PathBuf::from(decoded.into_owned())
        }
        None => expand_home(rest, ctx)?,
    };
    local_url(input, &path, ctx)
}

fn expand_home(raw: &str, ctx: &UriContext) -> FsResult<PathBuf> {
    if raw == "~" {
        return Ok(ctx.home.clone());
    }
    if let Some(tail) = raw.strip_prefix("~/") {
        return Ok(ctx.home.join(tail));
    }
    if raw.starts_with('~') {
        return Err(FsError::InvalidUri(format!(
            "cannot expand user in {raw}"
        )));
    }
    Ok(PathBuf::from(raw))
}

fn local_url(input: &str, path: &Path, ctx: &UriContext) -> FsResult<Url> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        ctx.cwd.join(path)
    };

    // Resolve `.` and `..` lexically; symlinks are not consulted
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(FsError::InvalidUri(format!("{input} escapes the root")));
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    Url::from_file_path(&normalized)
        .map_err(|_| FsError::InvalidUri(format!("{input} is not a valid local path")))
}

fn parse_remote(scheme: Scheme, input: &str, rest: &str, ctx: &UriContext) -> FsResult<Url> {
    // Work out the cluster and the raw path relative to the cluster root
    let (cluster, raw_path): (&str, String) = if let Some(tail) = rest.strip_prefix("//") {
        let (host, path) = match tail.find('/') {
            Some(idx) => tail.split_at(idx),
            None => (tail, ""),
        };
        if host == "~" {
            return Err(FsError::InvalidUri(format!(
                "cannot expand user in {input}, use {}:~/path",
                scheme.as_str()
            )));
        }
        let host = if host.is_empty() { ctx.cluster.as_str() } else { host };
        (host, path.to_string())
    } else if rest.starts_with('/') {
        (ctx.cluster.as_str(), rest.to_string())
    } else if rest == "~" || rest.starts_with("~/") {
        (ctx.cluster.as_str(), format!("{}{}", home_user(input, ctx)?, &rest[1..]))
    } else if rest.starts_with('~') {
        return Err(FsError::InvalidUri(format!("cannot expand user in {input}")));
    } else {
        match scheme {
            Scheme::Storage if rest.is_empty() => {
                (ctx.cluster.as_str(), home_user(input, ctx)?.to_string())
            }
            Scheme::Storage => (ctx.cluster.as_str(), format!("{}/{rest}", home_user(input, ctx)?)),
            _ => (ctx.cluster.as_str(), rest.to_string()),
        }
    };

    if cluster.is_empty() {
        return Err(FsError::InvalidUri(format!("no cluster given for {input}")));
    }

    let segments = normalize_segments(input, &raw_path)?;

    let mut url = Url::parse(&format!("{}://{cluster}/", scheme.as_str()))
        .map_err(|err| FsError::InvalidUri(format!("{input}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| FsError::InvalidUri(input.to_string()))?
        .clear()
        .extend(segments.iter());
    Ok(url)
}

/// The user that relative remote paths start from.
fn home_user<'a>(input: &str, ctx: &'a UriContext) -> FsResult<&'a str> {
    ctx.user
        .as_deref()
        .filter(|user| !user.is_empty())
        .ok_or_else(|| {
            FsError::InvalidUri(format!(
                "cannot expand user in {input}: set api.user or use an absolute path"
            ))
        })
}

fn normalize_segments(input: &str, raw_path: &str) -> FsResult<Vec<String>> {
    let mut segments: Vec<String> = Vec::new();
    for part in raw_path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(FsError::InvalidUri(format!("{input} escapes the root")));
                }
            }
            name => segments.push(name.to_string()),
        }
    }
    Ok(segments)
}
