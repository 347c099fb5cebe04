//! Feed loader: retrieves the two CSV documents and parses them.

mod basic;
mod client;
mod loader;

pub use basic::{BasicClient, DEFAULT_TIMEOUT};
pub use client::HttpClient;
pub use loader::{FeedLoader, RawFeeds};

use bytes::Bytes;
use tracing::debug;

use crate::error::PipelineError;

/// GETs `url` and returns the body.
///
/// # Errors
///
/// Returns [`PipelineError::Fetch`] if the URL is invalid, the request fails
/// or times out, or the server answers with a non-success status.
#[tracing::instrument(skip(client))]
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, PipelineError> {
    let parsed = url.parse::<reqwest::Url>().map_err(|e| PipelineError::fetch(url, e))?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let resp = client
        .execute(req)
        .await
        .map_err(|e| PipelineError::fetch(url, describe(&e)))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(PipelineError::fetch(url, format!("HTTP status {status}")));
    }

    let body = resp
        .bytes()
        .await
        .map_err(|e| PipelineError::fetch(url, describe(&e)))?;
    debug!(bytes = body.len(), "Feed body received");
    Ok(body)
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out ({err})")
    } else {
        err.to_string()
    }
}
