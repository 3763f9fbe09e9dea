//! Stream Endpoint
//!
//! Builds `{base}/{stream_path}/{symbol}?market={market}` with the symbol
//! percent-encoded as a single path segment.

use url::Url;

use crate::application::ports::{StreamRequest, TransportError};

/// Build the WebSocket URL for one stream.
///
/// # Errors
///
/// Returns `TransportError::InvalidEndpoint` if the base URL cannot carry a
/// path or the symbol is blank.
pub fn stream_url(
    base: &Url,
    stream_path: &str,
    request: &StreamRequest,
) -> Result<Url, TransportError> {
    let symbol = request.symbol.trim();
    if symbol.is_empty() {
        return Err(TransportError::InvalidEndpoint("empty symbol".to_string()));
    }

    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| TransportError::InvalidEndpoint(format!("{base} cannot be a base")))?;
        segments.pop_if_empty();
        for part in stream_path.split('/').filter(|part| !part.is_empty()) {
            segments.push(part);
        }
        segments.push(symbol);
    }
    url.query_pairs_mut()
        .append_pair("market", request.market.trim());

    Ok(url)
}
