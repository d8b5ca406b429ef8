mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use std::time::Duration;

use crate::error::FetchError;

/// GETs `url` and returns the body of a successful response.
///
/// The whole exchange, body included, must finish within `timeout`.
pub async fn fetch_bytes<C: HttpClient>(
    client: &C,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let exchange = async {
        let resp = client.get_json(parsed).await?.error_for_status()?;
        Ok::<_, reqwest::Error>(resp.bytes().await?.to_vec())
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) if e.is_timeout() => Err(FetchError::Timeout(timeout)),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}
