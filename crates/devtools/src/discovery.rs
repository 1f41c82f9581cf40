//! Debugger URL discovery via the `/json` listing.

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedTarget {
    #[serde(default)]
    web_socket_debugger_url: Option<String>,
}

/// Fetch a `/json` listing and return the first entry's debugger URL.
///
/// Entries without a debugger URL (a page already attached to another
/// client) are skipped.
///
/// # Errors
///
/// Returns `Error::UrlParse` for an invalid listing URL,
/// `Error::DiscoveryFailed` if the listing cannot be fetched or decoded and
/// `Error::NoTargets` if no entry carries a debugger URL.
pub async fn websocket_debugger_url(client: &reqwest::Client, listing_url: &str) -> Result<String> {
    let url = Url::parse(listing_url)?;

    let targets: Vec<ListedTarget> = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| Error::discovery_failed(listing_url, e.to_string()))?
        .json()
        .await
        .map_err(|e| Error::discovery_failed(listing_url, e.to_string()))?;

    debug!(listing = listing_url, targets = targets.len(), "Fetched target listing");

    targets
        .into_iter()
        .find_map(|t| t.web_socket_debugger_url)
        .ok_or_else(|| Error::NoTargets {
            url: listing_url.to_string(),
        })
}
