// src/repository/client.rs

//! Blocking HTTP client for artifact downloads, with retries

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 1000;
const STREAM_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Stream `url` into `out`, returning the byte count
    ///
    /// Connection failures and 5xx responses are retried; `out` is only
    /// written once a successful response has arrived, so a retry never
    /// appends to a partial body from an earlier attempt.
    pub fn download_to<W: Write>(&self, url: &str, out: &mut W) -> Result<u64> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) if response.status().is_success() => {
                    debug!("Downloading {} (attempt {})", url, attempt);
                    return stream_response(response, out);
                }
                Ok(response)
                    if response.status().is_server_error() && attempt < self.max_retries =>
                {
                    warn!("HTTP {} from {}, retrying", response.status(), url);
                }
                Ok(response) => {
                    return Err(Error::DownloadError(format!(
                        "HTTP {} from {}",
                        response.status(),
                        url
                    )));
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to download {url} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Download of {} failed (attempt {}): {}", url, attempt, e);
                }
            }
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
        }
    }
}

fn stream_response<W: Write>(
    mut response: reqwest::blocking::Response,
    out: &mut W,
) -> Result<u64> {
    let mut total: u64 = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];

    loop {
        let n = response
            .read(&mut buffer)
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {e}")))?;
        if n == 0 {
            break;
        }
        out.write_all(&buffer[..n])?;
        total += n as u64;
    }

    Ok(total)
}
