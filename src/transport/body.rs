use super::TransportReporter;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::trace;

/// Size of each body chunk handed to the HTTP client
const CHUNK_SIZE: usize = 64 * 1024;

/// Wrap file content in a streaming body that reports progress as each
/// chunk is pulled by the client.
pub(super) fn progress_body(
    content: Arc<[u8]>,
    reporter: Arc<dyn TransportReporter>,
) -> reqwest::Body {
    let total = content.len();
    let offsets = (0..total).step_by(CHUNK_SIZE);

    let chunks = stream::iter(offsets).map(move |start| {
        let end = (start + CHUNK_SIZE).min(total);
        let percent = calculate_percent(end as u64, total as u64);
        trace!("Upload body {}/{} bytes ({:.0}%)", end, total, percent);
        reporter.set_progress(percent);
        Ok::<Vec<u8>, std::io::Error>(content[start..end].to_vec())
    });

    reqwest::Body::wrap_stream(chunks)
}

/// Percentage of bytes sent. An unknown or zero total counts as complete.
pub fn calculate_percent(loaded: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        ((loaded as f64 / total as f64) * 100.0).min(100.0)
    }
}
