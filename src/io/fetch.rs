//! HTTP fetch with bounded retry and an on-disk cache.
//!
//! A stale cache is preferable to blocking the batch run on an unreachable
//! remote source, but falling back to it is always logged.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;

/// Fetch a text resource, refreshing the cache on success and falling back
/// to the cached copy when the remote is unreachable.
pub fn fetch_cached(url: &str, cache_dir: &Path, timeout: Duration, retries: u32) -> Result<String> {
    fs::create_dir_all(cache_dir)?;
    let cache_path = cache_path_for(url, cache_dir);
    match fetch_with_retries(url, timeout, retries) {
        Ok(body) => {
            fs::write(&cache_path, &body)?;
            debug!(url, cache = %cache_path.display(), "fetched and cached");
            Ok(body)
        }
        Err(e) if cache_path.exists() => {
            warn!(url, error = %e, cache = %cache_path.display(),
                "remote fetch failed; using stale cached copy");
            Ok(fs::read_to_string(&cache_path)?)
        }
        Err(e) => Err(e),
    }
}

fn cache_path_for(url: &str, cache_dir: &Path) -> PathBuf {
    let digest = Sha256::digest(url.as_bytes());
    cache_dir.join(format!("{}.cache", hex::encode(&digest[..16])))
}

fn fetch_with_retries(url: &str, timeout: Duration, retries: u32) -> Result<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?;
    let mut attempt = 0;
    loop {
        let outcome = client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.text());
        match outcome {
            Ok(body) => return Ok(body),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(url, attempt, error = %e, "fetch attempt failed, retrying");
                thread::sleep(Duration::from_millis(500 * u64::from(attempt)));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
