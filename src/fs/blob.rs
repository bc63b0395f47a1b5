use std::sync::Arc;

use reqwest::Method;
use reqwest::blocking::{Body, Response};
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED, RANGE};
use serde::Deserialize;
use url::Url;

use super::{FileStatus, FileSystem, FileType, Source};
use crate::api::{ApiClient, ranged_body};
use crate::error::{FsError, FsResult};
use crate::uri;

const PAGE_SIZE: u32 = 1000;

/// Object buckets behind the platform's blob API.
///
/// `blob://{cluster}/{bucket}/{key}` maps to `{base}/{bucket}/{key}`.
/// Directories do not exist as such: a "directory" is any key prefix
/// ending with `/`, optionally materialised by an empty `prefix/` marker
/// object.
#[derive(Debug, Clone)]
pub struct BlobFs {
    api: Arc<ApiClient>,
    base: Url,
    cluster: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListPage {
    #[serde(default)]
    contents: Vec<BlobObject>,
    #[serde(default)]
    common_prefixes: Vec<CommonPrefix>,
    #[serde(default)]
    is_truncated: bool,
    continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlobObject {
    key: String,
    size: u64,
    #[serde(default)]
    last_modified: i64,
}

#[derive(Debug, Deserialize)]
struct CommonPrefix {
    prefix: String,
}

/// A URI split into bucket and key.
struct Location {
    bucket: String,
    key: String,
}

impl BlobFs {
    /// Serve `blob://{cluster}/...` URIs from the API at `base`.
    pub fn new(api: Arc<ApiClient>, base: Url, cluster: &str) -> Self {
        BlobFs {
            api,
            base,
            cluster: cluster.to_string(),
        }
    }

    fn locate(&self, uri: &Url) -> FsResult<Location> {
        if uri.host_str() != Some(self.cluster.as_str()) {
            return Err(FsError::InvalidUri(format!(
                "{} is not on the configured cluster '{}'",
                uri::display(uri),
                self.cluster
            )));
        }
        let mut segments = uri::segments(uri).into_iter();
        let bucket = segments.next().ok_or_else(|| {
            FsError::InvalidUri(format!("{} does not name a bucket", uri::display(uri)))
        })?;
        Ok(Location {
            bucket,
            key: segments.collect::<Vec<_>>().join("/"),
        })
    }

    fn bucket_url(&self, bucket: &str) -> FsResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FsError::InvalidUri(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .push(bucket);
        Ok(url)
    }

    fn object_url(&self, bucket: &str, key: &str) -> FsResult<Url> {
        let mut url = self.bucket_url(bucket)?;
        if let Ok(mut segments) = url.path_segments_mut() {
            // A trailing `/` (directory marker) becomes an empty last segment
            segments.extend(key.split('/'));
        }
        Ok(url)
    }

    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> FsResult<ListPage> {
        let mut url = self.bucket_url(bucket)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("prefix", prefix)
                .append_pair("delimiter", "/")
                .append_pair("max_keys", &max_keys.to_string());
            if let Some(token) = continuation_token {
                query.append_pair("continuation_token", token);
            }
        }

        let target = format!("blob://{}/{bucket}/{prefix}", self.cluster);
        let response = self.api.send(self.api.request(Method::GET, url), &target)?;
        response.json().map_err(|err| FsError::InvalidResponse {
            url: target,
            message: err.to_string(),
        })
    }

    /// HEAD an object; `Ok(None)` when it does not exist.
    fn head(&self, location: &Location) -> FsResult<Option<FileStatus>> {
        let url = self.object_url(&location.bucket, &location.key)?;
        let target = format!("blob://{}/{}/{}", self.cluster, location.bucket, location.key);
        match self.api.send(self.api.request(Method::HEAD, url), &target) {
            Ok(response) => Ok(Some(status_from_head(&response, &location.key))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Whether anything lives below `key/`.
    fn has_children(&self, location: &Location) -> FsResult<bool> {
        let prefix = dir_prefix(&location.key);
        let page = self.list_page(&location.bucket, &prefix, 1, None)?;
        Ok(!page.contents.is_empty() || !page.common_prefixes.is_empty())
    }
}

impl FileSystem for BlobFs {
    fn stat(&self, uri: &Url) -> FsResult<FileStatus> {
        let location = self.locate(uri)?;

        if location.key.is_empty() {
            // Listing fails with NotFound for a missing bucket
            self.list_page(&location.bucket, "", 1, None)?;
            return Ok(directory(&location.bucket));
        }

        if let Some(status) = self.head(&location)? {
            return Ok(status);
        }
        if self.has_children(&location)? {
            return Ok(directory(&last_segment(&location.key)));
        }
        Err(FsError::NotFound(uri::display(uri)))
    }

    fn list(&self, uri: &Url) -> FsResult<Vec<FileStatus>> {
        let location = self.locate(uri)?;
        let prefix = dir_prefix(&location.key);

        let mut entries = Vec::new();
        let mut seen_any = false;
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(&location.bucket, &prefix, PAGE_SIZE, token.as_deref())?;
            seen_any |= !page.contents.is_empty() || !page.common_prefixes.is_empty();

            for object in page.contents {
                let name = object.key.strip_prefix(prefix.as_str()).unwrap_or(&object.key);
                // The directory's own marker object
                if name.is_empty() {
                    continue;
                }
                entries.push(FileStatus {
                    name: name.to_string(),
                    file_type: FileType::File,
                    size: object.size,
                    modified: object.last_modified,
                });
            }
            for common in page.common_prefixes {
                let name = common
                    .prefix
                    .strip_prefix(prefix.as_str())
                    .unwrap_or(&common.prefix)
                    .trim_end_matches('/');
                if !name.is_empty() {
                    entries.push(directory(name));
                }
            }

            match (page.is_truncated, page.continuation_token) {
                (true, Some(next)) => token = Some(next),
                _ => break,
            }
        }

        if !seen_any && !location.key.is_empty() {
            return Err(match self.head(&location)? {
                Some(_) => FsError::NotADirectory(uri::display(uri)),
                None => FsError::NotFound(uri::display(uri)),
            });
        }
        Ok(entries)
    }

    fn mkdir(&self, uri: &Url, parents: bool, exist_ok: bool) -> FsResult<()> {
        let location = self.locate(uri)?;
        let target = uri::display(uri);

        match self.stat(uri) {
            Ok(status) if status.is_dir() && exist_ok => return Ok(()),
            Ok(_) => return Err(FsError::AlreadyExists(target)),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        if location.key.is_empty() {
            return Err(FsError::Unsupported(format!("creating bucket {target}")));
        }
        if !parents {
            if let Some(parent) = uri::parent(uri) {
                if !self.stat(&parent)?.is_dir() {
                    return Err(FsError::NotADirectory(uri::display(&parent)));
                }
            }
        }

        let url = self.object_url(&location.bucket, &dir_prefix(&location.key))?;
        let request = self.api.request(Method::PUT, url).body(Vec::new());
        self.api.send(request, &target)?;
        Ok(())
    }

    fn open(&self, uri: &Url, offset: u64) -> FsResult<Source> {
        let location = self.locate(uri)?;
        let target = uri::display(uri);
        if location.key.is_empty() {
            return Err(FsError::IsADirectory(target));
        }

        let url = self.object_url(&location.bucket, &location.key)?;
        let mut request = self.api.request(Method::GET, url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = self.api.send(request, &target)?;
        ranged_body(response, offset, &target)
    }

    fn write(&self, uri: &Url, source: Source, len: u64, offset: u64) -> FsResult<u64> {
        let location = self.locate(uri)?;
        let target = uri::display(uri);
        if offset > 0 {
            return Err(FsError::Unsupported(format!(
                "appending to object {target}"
            )));
        }
        if location.key.is_empty() {
            return Err(FsError::IsADirectory(target));
        }

        let url = self.object_url(&location.bucket, &location.key)?;
        let request = self
            .api
            .request(Method::PUT, url)
            .body(Body::sized(source, len));
        self.api.send(request, &target)?;
        Ok(len)
    }

    fn supports_append(&self) -> bool {
        false
    }
}

fn dir_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}/")
    }
}

fn last_segment(key: &str) -> String {
    key.rsplit('/').next().unwrap_or(key).to_string()
}

fn directory(name: &str) -> FileStatus {
    FileStatus {
        name: name.to_string(),
        file_type: FileType::Directory,
        size: 0,
        modified: 0,
    }
}

fn status_from_head(response: &Response, key: &str) -> FileStatus {
    let headers = response.headers();

    // `content_length()` reflects the (empty) HEAD body, not the object
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);
    let modified = headers
        .get(LAST_MODIFIED)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| chrono::DateTime::parse_from_rfc2822(value).ok())
        .map(|time| time.timestamp())
        .unwrap_or(0);

    FileStatus {
        name: last_segment(key),
        file_type: FileType::File,
        size,
        modified,
    }
}
