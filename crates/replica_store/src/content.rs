//! An object store backed by a remote content server.
//!
//! The server exposes every object as a resource `<base>/<group>/<id>`:
//!
//! * `HEAD` reports the attributes of an object in the `Content-MD5`, `X-Object-Size` and
//!   `Last-Modified` headers.
//! * `GET` downloads it, `DELETE` removes it. A download is checked against the `Content-MD5` of
//!   the response when the server sends one.
//! * `PUT` uploads it. The request carries the MD5 of the body in `Content-MD5`; the server may
//!   echo the checksum of what it stored in the same response header.
//! * `PUT` with an `X-Copy-Source: <group>/<id>` header and no body copies an object server side.

use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::DateTime;
use fs_err as fs;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use reqwest::{Method, StatusCode};
use replica_digest::{parse_digest_from_hex, HashingReader, Md5, Md5Hash};
use reqwest_retry::{policies::ExponentialBackoff, RetryDecision, RetryPolicy};
use tracing::{debug, warn};
use url::Url;

use crate::{
    object_id, ObjectStore, StoreError, CHECKSUM_ATTRIBUTE, MODIFIED_ATTRIBUTE, SIZE_ATTRIBUTE,
};

const CONTENT_MD5: &str = "content-md5";
const OBJECT_SIZE: &str = "x-object-size";
const COPY_SOURCE: &str = "x-copy-source";

const USER_AGENT: &str = concat!("replica-store/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
struct Credentials {
    username: String,
    password: Option<String>,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish()
    }
}

/// An [`ObjectStore`] that talks to a content server over HTTP.
#[derive(Debug, Clone)]
pub struct ContentStore {
    base_url: Url,
    credentials: Option<Credentials>,
    client: Client,
    retry_policy: ExponentialBackoff,
}

fn misconfigured(reason: String) -> StoreError {
    StoreError::Misconfigured {
        store: "content".to_string(),
        reason,
    }
}

fn unexpected(method: Method, url: Url, status: StatusCode) -> StoreError {
    StoreError::UnexpectedStatus {
        method,
        url,
        status,
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

fn remote_checksum(headers: &HeaderMap) -> Option<String> {
    header_value(headers, CONTENT_MD5)
        .or_else(|| header_value(headers, ETAG.as_str()))
        .map(|checksum| checksum.to_lowercase())
}

fn remote_size(headers: &HeaderMap) -> Option<u64> {
    header_value(headers, OBJECT_SIZE)
        .or_else(|| header_value(headers, CONTENT_LENGTH.as_str()))
        .and_then(|size| size.parse().ok())
}

fn verify_download(id: &str, expected: Option<Md5Hash>, actual: Md5Hash) -> Result<(), StoreError> {
    match expected {
        Some(expected) if expected != actual => Err(StoreError::ChecksumMismatch {
            id: id.to_string(),
            expected: format!("{expected:x}"),
            actual: format!("{actual:x}"),
        }),
        _ => Ok(()),
    }
}

/// Returns true if repeating the request that failed with `err` may succeed.
fn is_transient(err: &StoreError) -> bool {
    match err {
        StoreError::HttpError(err) => {
            err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
        }
        StoreError::UnexpectedStatus { status, .. } => !matches!(
            *status,
            StatusCode::BAD_REQUEST
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::NOT_FOUND
                | StatusCode::CONFLICT
                | StatusCode::PAYLOAD_TOO_LARGE
                | StatusCode::UNPROCESSABLE_ENTITY
        ),
        StoreError::ChecksumMismatch { .. } => true,
        _ => false,
    }
}

impl ContentStore {
    /// Constructs a store for the server at `base_url`. Uploads are retried up to three times.
    pub fn new(base_url: Url) -> Result<Self, StoreError> {
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(misconfigured(format!(
                "'{base_url}' is not a valid content server url"
            )));
        }
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            base_url,
            credentials: None,
            client,
            retry_policy: ExponentialBackoff::builder().build_with_max_retries(3),
        })
    }

    /// Authenticates every request with HTTP basic authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password,
        });
        self
    }

    /// Sets the policy that decides whether and when a failed upload is retried.
    pub fn with_retry_policy(mut self, retry_policy: ExponentialBackoff) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Retries failed uploads at most `max_retries` times.
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        self.with_retry_policy(ExponentialBackoff::builder().build_with_max_retries(max_retries))
    }

    /// The url of the server.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn object_url(&self, group: &str, id: &str) -> Result<Url, StoreError> {
        if group.is_empty() || id.is_empty() {
            return Err(StoreError::InvalidName(format!("{group}/{id}")));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| misconfigured(format!("'{}' cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .push(group)
            .push(id);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.credentials {
            Some(credentials) => {
                request.basic_auth(&credentials.username, credentials.password.as_ref())
            }
            None => request,
        }
    }

    /// Returns the headers describing an object, or `None` if the server does not know it.
    fn head(&self, group: &str, id: &str) -> Result<Option<HeaderMap>, StoreError> {
        let url = self.object_url(group, id)?;
        let response = self.request(Method::HEAD, url.clone()).send()?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.headers().clone())),
            status => Err(unexpected(Method::HEAD, url, status)),
        }
    }

    fn delete(&self, url: Url) -> Result<bool, StoreError> {
        let response = self.request(Method::DELETE, url.clone()).send()?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(unexpected(Method::DELETE, url, status)),
        }
    }

    /// Uploads `source` once and verifies the checksum the server reports back, if any.
    fn put(&self, url: &Url, id: &str, source: &Path, checksum: &str) -> Result<(), StoreError> {
        let (file, _) = fs::File::open(source)?.into_parts();
        let response = self
            .request(Method::PUT, url.clone())
            .header(CONTENT_MD5, checksum)
            .body(file)
            .send()?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(StoreError::AuthenticationFailed(url.clone()));
        }
        if !status.is_success() {
            return Err(unexpected(Method::PUT, url.clone(), status));
        }
        match remote_checksum(response.headers()) {
            Some(actual) if actual != checksum => Err(StoreError::ChecksumMismatch {
                id: id.to_string(),
                expected: checksum.to_string(),
                actual,
            }),
            _ => Ok(()),
        }
    }
}

impl ObjectStore for ContentStore {
    fn init(&mut self) -> Result<(), StoreError> {
        let response = self.request(Method::GET, self.base_url.clone()).send()?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StoreError::AuthenticationFailed(self.base_url.clone()))
            }
            status if status.is_success() => {
                debug!("connected to content server at {}", self.base_url);
                Ok(())
            }
            status => Err(misconfigured(format!(
                "{} responded with {status}",
                self.base_url
            ))),
        }
    }

    fn object_exists(&self, group: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self.head(group, id)?.is_some())
    }

    fn object_attribute(
        &self,
        group: &str,
        id: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        let Some(headers) = self.head(group, id)? else {
            return Ok(None);
        };
        let value = match name {
            CHECKSUM_ATTRIBUTE => remote_checksum(&headers),
            SIZE_ATTRIBUTE => remote_size(&headers).map(|size| size.to_string()),
            MODIFIED_ATTRIBUTE => header_value(&headers, LAST_MODIFIED.as_str()).map(|value| {
                match DateTime::parse_from_rfc2822(&value) {
                    Ok(modified) => modified.timestamp_millis().to_string(),
                    Err(_) => value,
                }
            }),
            _ => None,
        };
        Ok(value)
    }

    fn fetch_object(&self, group: &str, id: &str, destination: &Path) -> Result<u64, StoreError> {
        let url = self.object_url(group, id)?;
        let mut response = self.request(Method::GET, url.clone()).send()?;
        match response.status() {
            StatusCode::NOT_FOUND => return Ok(0),
            status if !status.is_success() => return Err(unexpected(Method::GET, url, status)),
            _ => {}
        }

        // Only a `Content-MD5` that parses as a digest is checked; an `ETag` may be opaque.
        let expected = header_value(response.headers(), CONTENT_MD5)
            .and_then(|checksum| parse_digest_from_hex::<Md5>(&checksum.to_lowercase()));

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(destination)?;
        let mut reader = HashingReader::<_, Md5>::new(&mut response);
        let result = std::io::copy(&mut reader, &mut file)
            .map_err(StoreError::from)
            .and_then(|size| {
                let (_, actual) = reader.finalize();
                verify_download(id, expected, actual).map(|()| size)
            });
        if result.is_err() {
            drop(file);
            fs::remove_file(destination)?;
        }
        result
    }

    fn transfer_object(&self, group: &str, source: &Path) -> Result<u64, StoreError> {
        let id = object_id(source)?;
        let checksum = replica_digest::compute_file_md5_hex(source)?;
        if let Some(headers) = self.head(group, &id)? {
            if remote_checksum(&headers).as_deref() == Some(checksum.as_str()) {
                debug!("'{id}' is unchanged in group '{group}', skipping upload");
                return Ok(0);
            }
        }

        let url = self.object_url(group, &id)?;
        let size = fs::metadata(source)?.len();
        let request_start = SystemTime::now();
        let mut current_try = 0;

        loop {
            let err = match self.put(&url, &id, source, &checksum) {
                Ok(()) => return Ok(size),
                Err(err) if !is_transient(&err) => return Err(err),
                Err(err) => err,
            };

            match self.retry_policy.should_retry(request_start, current_try) {
                RetryDecision::DoNotRetry => {
                    return Err(StoreError::RetriesExhausted {
                        id,
                        attempts: current_try + 1,
                        source: Box::new(err),
                    });
                }
                RetryDecision::Retry { execute_after } => {
                    let sleep_for = execute_after
                        .duration_since(SystemTime::now())
                        .unwrap_or(Duration::ZERO);
                    warn!(
                        "failed to upload '{id}': {err}, retrying in {} ms",
                        sleep_for.as_millis()
                    );
                    std::thread::sleep(sleep_for);
                }
            }

            current_try += 1;
        }
    }

    fn remove_object(&self, group: &str, id: &str) -> Result<u64, StoreError> {
        let Some(headers) = self.head(group, id)? else {
            return Ok(0);
        };
        let size = remote_size(&headers).unwrap_or(0);
        let removed = self.delete(self.object_url(group, id)?)?;
        Ok(if removed { size } else { 0 })
    }

    fn move_object(
        &self,
        source_group: &str,
        destination_group: &str,
        id: &str,
    ) -> Result<u64, StoreError> {
        let Some(headers) = self.head(source_group, id)? else {
            return Ok(0);
        };
        let size = remote_size(&headers).unwrap_or(0);

        let destination = self.object_url(destination_group, id)?;
        let response = self
            .request(Method::PUT, destination.clone())
            .header(COPY_SOURCE, format!("{source_group}/{id}"))
            .send()?;
        if !response.status().is_success() {
            warn!(
                "copying '{id}' from '{source_group}' to '{destination_group}' failed with \
                 status {}",
                response.status()
            );
            return Ok(0);
        }

        self.delete(self.object_url(source_group, id)?)?;
        Ok(size)
    }
}

#[cfg(test)]
mod test {
    use super::{is_transient, remote_checksum, remote_size, ContentStore};
    use crate::StoreError;
    use assert_matches::assert_matches;
    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::{Method, StatusCode};
    use rstest::rstest;
    use url::Url;

    #[rstest]
    #[case("http://localhost/", "http://localhost/aip_store/item@1-2.zip")]
    #[case("http://localhost/replicas", "http://localhost/replicas/aip_store/item@1-2.zip")]
    #[case("http://localhost/replicas/", "http://localhost/replicas/aip_store/item@1-2.zip")]
    fn test_object_url(#[case] base: &str, #[case] expected: &str) {
        let store = ContentStore::new(Url::parse(base).unwrap()).unwrap();
        assert_eq!(
            store.object_url("aip_store", "item@1-2.zip").unwrap().as_str(),
            expected
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert_matches!(
            ContentStore::new(Url::parse("mailto:someone@example.org").unwrap()),
            Err(StoreError::Misconfigured { .. })
        );
        assert_matches!(
            ContentStore::new(Url::parse("file:///tmp").unwrap()),
            Err(StoreError::Misconfigured { .. })
        );
    }

    #[rstest]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, true)]
    #[case(StatusCode::SERVICE_UNAVAILABLE, true)]
    #[case(StatusCode::TOO_MANY_REQUESTS, true)]
    #[case(StatusCode::BAD_REQUEST, false)]
    #[case(StatusCode::FORBIDDEN, false)]
    #[case(StatusCode::CONFLICT, false)]
    #[case(StatusCode::PAYLOAD_TOO_LARGE, false)]
    fn test_transient_status(#[case] status: StatusCode, #[case] transient: bool) {
        let err = StoreError::UnexpectedStatus {
            method: Method::PUT,
            url: Url::parse("http://localhost/a/b").unwrap(),
            status,
        };
        assert_eq!(is_transient(&err), transient);
    }

    #[test]
    fn test_header_fallbacks() {
        let mut headers = HeaderMap::new();
        headers.insert("etag", HeaderValue::from_static("\"E807F1FCF82D132F9BB018CA6738A19F\""));
        headers.insert("content-length", HeaderValue::from_static("10"));
        assert_eq!(
            remote_checksum(&headers).as_deref(),
            Some("e807f1fcf82d132f9bb018ca6738a19f")
        );
        assert_eq!(remote_size(&headers), Some(10));

        headers.insert("x-object-size", HeaderValue::from_static("11"));
        assert_eq!(remote_size(&headers), Some(11));
    }
}
