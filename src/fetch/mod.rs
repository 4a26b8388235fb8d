//! HTTP transport for the vehicle-positions feed.
//!
//! [`HttpClient`] is the seam the feed reader talks to; [`BasicClient`] is the
//! plain reqwest implementation and the [`auth`] wrappers decorate it with
//! credentials.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use bytes::Bytes;

use crate::error::FetchError;

/// Issues a GET for `url` and returns the response body.
///
/// Non-2xx responses are reported as errors rather than decoded.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
) -> Result<Bytes, FetchError> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?)
}
