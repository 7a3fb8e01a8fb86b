use std::io::Read;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use percent_encoding::percent_decode;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap, HeaderValue, USER_AGENT};

use crate::error::PackError;

const MAX_ERROR_BODY: u64 = 4 * 1024;

/// An open response body plus the header that names it.
pub struct RemoteFile {
    pub content_disposition: Option<String>,
    pub body: Box<dyn Read + Send>,
}

pub trait HttpClient: Send + Sync {
    fn open(&self, url: &str, timeout: Duration) -> Result<RemoteFile, PackError>;
}

#[derive(Clone)]
pub struct HttpSourceClient {
    client: Client,
}

impl HttpSourceClient {
    pub fn new() -> Result<Self, PackError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("things-dl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PackError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| PackError::Network {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }

    fn send_with_retries<F>(
        &self,
        url: &str,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, PackError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if err.is_timeout() {
                        return Err(PackError::Timeout(format!("GET {url}")));
                    }
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(PackError::Network {
                        url: url.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

impl HttpClient for HttpSourceClient {
    fn open(&self, url: &str, timeout: Duration) -> Result<RemoteFile, PackError> {
        let response = self.send_with_retries(url, || self.client.get(url).timeout(timeout))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = read_error_body(response);
            return Err(PackError::HttpStatus {
                url: url.to_string(),
                status,
                message,
            });
        }
        let content_disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Ok(RemoteFile {
            content_disposition,
            body: Box::new(response),
        })
    }
}

/// Filename from a `Content-Disposition` value, preferring `filename*`.
/// Only the final path component is kept.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    static EXTENDED: OnceLock<Regex> = OnceLock::new();
    static PLAIN: OnceLock<Regex> = OnceLock::new();
    let extended = EXTENDED.get_or_init(|| {
        Regex::new(r#"(?i)filename\*\s*=\s*(?:[\w-]+)?'[^']*'"?([^";]+)"?"#).expect("valid regex")
    });
    let plain = PLAIN
        .get_or_init(|| Regex::new(r#"(?i)filename\s*=\s*"?([^";]+)"?"#).expect("valid regex"));

    let raw = extended
        .captures(header)
        .or_else(|| plain.captures(header))
        .and_then(|caps| caps.get(1))
        .map(|m| {
            percent_decode(m.as_str().trim().as_bytes())
                .decode_utf8_lossy()
                .into_owned()
        })?;
    safe_file_name(&raw)
}

/// At most `MAX_ERROR_BODY` bytes of an error response, lossily decoded.
fn read_error_body<R: Read>(body: R) -> String {
    let mut bytes = Vec::new();
    if body.take(MAX_ERROR_BODY).read_to_end(&mut bytes).is_err() || bytes.is_empty() {
        return "request failed".to_string();
    }
    String::from_utf8_lossy(&bytes).trim().to_string()
}

pub fn safe_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_request()
}
