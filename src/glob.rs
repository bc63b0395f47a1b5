//! Shell-style expansion of source URIs (`storage:logs/*.txt`,
//! `blob:bucket/**/model.bin`) against any [`FileSystem`].

use regex::Regex;
use url::Url;

use crate::error::{FsError, FsResult};
use crate::filter::{compile, translate};
use crate::fs::FileSystem;
use crate::uri;

/// Whether `s` contains glob metacharacters.
pub fn has_magic(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Expand the glob in `pattern` into the URIs of matching entries.
///
/// A URI without metacharacters is returned unchanged (whether it exists or
/// not). Names starting with `.` only match patterns that start with `.`.
/// Results are sorted.
///
/// # Errors
/// Returns an error if a pattern segment is invalid or listing a directory
/// fails for a reason other than it not existing.
pub fn expand(fs: &dyn FileSystem, pattern: &Url) -> FsResult<Vec<Url>> {
    let segments = uri::segments(pattern);
    let Some(first_magic) = segments.iter().position(|segment| has_magic(segment)) else {
        return Ok(vec![pattern.clone()]);
    };

    // Start walking at the longest literal prefix
    let mut base = pattern.clone();
    base.path_segments_mut()
        .map_err(|_| FsError::InvalidUri(pattern.to_string()))?
        .clear()
        .extend(&segments[..first_magic]);

    let mut matches = Vec::new();
    walk(fs, &base, &segments[first_magic..], &mut matches)?;

    matches.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    matches.dedup();
    Ok(matches)
}

fn walk(fs: &dyn FileSystem, base: &Url, rest: &[String], out: &mut Vec<Url>) -> FsResult<()> {
    let Some((segment, tail)) = rest.split_first() else {
        out.push(base.clone());
        return Ok(());
    };

    if segment == "**" {
        // Zero directories...
        walk(fs, base, tail, out)?;
        // ...or any number of them
        for entry in list_or_empty(fs, base)? {
            if entry.name.starts_with('.') {
                continue;
            }
            let child = uri::join(base, &entry.name);
            if entry.is_dir() {
                walk(fs, &child, rest, out)?;
            } else if tail.is_empty() {
                out.push(child);
            }
        }
        return Ok(());
    }

    if !has_magic(segment) {
        let child = uri::join(base, segment);
        if tail.is_empty() {
            match fs.stat(&child) {
                Ok(_) => out.push(child),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
            return Ok(());
        }
        return walk(fs, &child, tail, out);
    }

    let regex = segment_regex(segment)?;
    let show_hidden = segment.starts_with('.');
    for entry in list_or_empty(fs, base)? {
        if entry.name.starts_with('.') && !show_hidden {
            continue;
        }
        if !regex.is_match(&entry.name) {
            continue;
        }
        let child = uri::join(base, &entry.name);
        if tail.is_empty() {
            out.push(child);
        } else if entry.is_dir() {
            walk(fs, &child, tail, out)?;
        }
    }
    Ok(())
}

fn segment_regex(segment: &str) -> FsResult<Regex> {
    compile(segment, &translate(segment))
}

/// Directory listing where a missing directory (or a file) yields nothing.
fn list_or_empty(fs: &dyn FileSystem, dir: &Url) -> FsResult<Vec<crate::fs::FileStatus>> {
    match fs.list(dir) {
        Ok(entries) => Ok(entries),
        Err(FsError::NotFound(_)) | Err(FsError::NotADirectory(_)) => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFs;
    use std::fs;
    use std::path::Path;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("logs/2024")).unwrap();
        fs::create_dir_all(root.join("data")).unwrap();
        fs::write(root.join("logs/a.txt"), b"a").unwrap();
        fs::write(root.join("logs/b.txt"), b"b").unwrap();
        fs::write(root.join("logs/.hidden.txt"), b"h").unwrap();
        fs::write(root.join("logs/c.bin"), b"c").unwrap();
        fs::write(root.join("logs/2024/d.txt"), b"d").unwrap();
        fs::write(root.join("data/e.txt"), b"e").unwrap();
        dir
    }

    fn names(root: &Path, urls: &[Url]) -> Vec<String> {
        urls.iter()
            .map(|url| {
                url.to_file_path()
                    .unwrap()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    fn glob(root: &Path, pattern: &str) -> Vec<String> {
        let url = Url::from_file_path(root.join(pattern)).unwrap();
        names(root, &expand(&LocalFs, &url).unwrap())
    }

    #[test]
    fn literal_uris_pass_through() {
        let dir = tree();
        assert_eq!(glob(dir.path(), "logs/missing.txt"), vec!["logs/missing.txt"]);
    }

    #[test]
    fn star_matches_within_a_directory() {
        let dir = tree();
        assert_eq!(glob(dir.path(), "logs/*.txt"), vec!["logs/a.txt", "logs/b.txt"]);
        assert_eq!(glob(dir.path(), "logs/.*.txt"), vec!["logs/.hidden.txt"]);
        assert_eq!(glob(dir.path(), "*/e.txt"), vec!["data/e.txt"]);
        assert!(glob(dir.path(), "nothing/*.txt").is_empty());
    }

    #[test]
    fn double_star_recurses() {
        let dir = tree();
        assert_eq!(
            glob(dir.path(), "**/*.txt"),
            vec!["data/e.txt", "logs/2024/d.txt", "logs/a.txt", "logs/b.txt"]
        );
    }

    #[test]
    fn magic_detection() {
        assert!(has_magic("a*"));
        assert!(has_magic("a[bc]"));
        assert!(!has_magic("plain/name.txt"));
    }
}
