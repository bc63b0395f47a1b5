use std::sync::Arc;

use reqwest::Method;
use reqwest::blocking::{Body, Response};
use reqwest::header::{CONTENT_RANGE, RANGE};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::{FileStatus, FileSystem, FileType, Source};
use crate::api::{ApiClient, ranged_body};
use crate::error::{FsError, FsResult};
use crate::uri;

/// Platform storage: a remote POSIX-like tree behind a REST API.
///
/// `storage://{cluster}/{path}` maps to `{base}/{path}`; the operation is
/// selected with the `op` query parameter.
#[derive(Debug, Clone)]
pub struct StorageFs {
    api: Arc<ApiClient>,
    base: Url,
    cluster: String,
}

#[derive(Debug, Deserialize)]
struct StatResponse {
    #[serde(rename = "FileStatus")]
    file_status: RawStatus,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(rename = "FileStatuses")]
    file_statuses: RawStatuses,
}

#[derive(Debug, Deserialize)]
struct RawStatuses {
    #[serde(rename = "FileStatus", default)]
    file_status: Vec<RawStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    length: u64,
    #[serde(default)]
    modification_time: i64,
}

impl From<RawStatus> for FileStatus {
    fn from(raw: RawStatus) -> Self {
        let file_type = match raw.kind.as_str() {
            "FILE" => FileType::File,
            "DIRECTORY" => FileType::Directory,
            _ => FileType::Unknown,
        };
        let name = raw
            .path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        FileStatus {
            name,
            file_type,
            size: if file_type == FileType::File { raw.length } else { 0 },
            modified: raw.modification_time,
        }
    }
}

impl StorageFs {
    /// Serve `storage://{cluster}/...` URIs from the API at `base`.
    pub fn new(api: Arc<ApiClient>, base: Url, cluster: &str) -> Self {
        StorageFs {
            api,
            base,
            cluster: cluster.to_string(),
        }
    }

    fn endpoint(&self, uri: &Url, op: &str) -> FsResult<Url> {
        if uri.host_str() != Some(self.cluster.as_str()) {
            return Err(FsError::InvalidUri(format!(
                "{} is not on the configured cluster '{}'",
                uri::display(uri),
                self.cluster
            )));
        }

        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FsError::InvalidUri(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(uri::segments(uri));
        url.query_pairs_mut().append_pair("op", op);
        Ok(url)
    }

    fn get_json<T: DeserializeOwned>(&self, uri: &Url, op: &str) -> FsResult<T> {
        let url = self.endpoint(uri, op)?;
        let target = uri::display(uri);
        let response = self.api.send(self.api.request(Method::GET, url), &target)?;
        decode_json(response, &target)
    }
}

impl FileSystem for StorageFs {
    fn stat(&self, uri: &Url) -> FsResult<FileStatus> {
        let response: StatResponse = self.get_json(uri, "GETFILESTATUS")?;
        Ok(response.file_status.into())
    }

    fn list(&self, uri: &Url) -> FsResult<Vec<FileStatus>> {
        let response: ListResponse = self.get_json(uri, "LISTSTATUS")?;
        Ok(response
            .file_statuses
            .file_status
            .into_iter()
            .map(FileStatus::from)
            .collect())
    }

    fn mkdir(&self, uri: &Url, parents: bool, exist_ok: bool) -> FsResult<()> {
        let target = uri::display(uri);

        // The server always creates parents and never complains about an
        // existing directory, so both flags are checked here
        match self.stat(uri) {
            Ok(status) if status.is_dir() && exist_ok => return Ok(()),
            Ok(_) => return Err(FsError::AlreadyExists(target)),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        if !parents {
            if let Some(parent) = uri::parent(uri) {
                let status = self.stat(&parent)?;
                if !status.is_dir() {
                    return Err(FsError::NotADirectory(uri::display(&parent)));
                }
            }
        }

        let url = self.endpoint(uri, "MKDIRS")?;
        self.api.send(self.api.request(Method::PUT, url), &target)?;
        Ok(())
    }

    fn open(&self, uri: &Url, offset: u64) -> FsResult<Source> {
        let url = self.endpoint(uri, "OPEN")?;
        let target = uri::display(uri);

        let mut request = self.api.request(Method::GET, url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = self.api.send(request, &target)?;
        ranged_body(response, offset, &target)
    }

    fn write(&self, uri: &Url, source: Source, len: u64, offset: u64) -> FsResult<u64> {
        let target = uri::display(uri);

        let request = if offset == 0 {
            let url = self.endpoint(uri, "CREATE")?;
            self.api
                .request(Method::PUT, url)
                .body(Body::sized(source, len))
        } else {
            if len == 0 {
                return Ok(0);
            }
            let url = self.endpoint(uri, "WRITE")?;
            let end = offset + len - 1;
            self.api
                .request(Method::PATCH, url)
                .header(CONTENT_RANGE, format!("bytes {offset}-{end}/*"))
                .body(Body::sized(source, len))
        };

        self.api.send(request, &target)?;
        Ok(len)
    }

    fn supports_append(&self) -> bool {
        true
    }
}

fn decode_json<T: DeserializeOwned>(response: Response, target: &str) -> FsResult<T> {
    response.json().map_err(|err| FsError::InvalidResponse {
        url: target.to_string(),
        message: err.to_string(),
    })
}
