use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What a desktop browser would send; embed hosts tend to refuse anything else
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Truncates a string to a maximum length, adding `...` to the end if it was truncated.
///
/// This function will continuously try to reduce length if string is being
/// truncated in the middle of a UTF codepoint
///
/// # Arguments
/// * `string` - The string to truncate
/// * `max_length` - The maximum length of the string, at least 3
#[must_use]
pub fn truncate_string(string: &impl ToString, max_length: usize) -> String {
    let string = string.to_string();
    if string.len() <= max_length {
        return string;
    }

    let mut attempted_len = max_length.max(3);
    let mut truncated = string.get(..attempted_len - 3);
    while truncated.is_none() {
        attempted_len -= 1;
        truncated = string.get(..attempted_len - 3);
    }

    format!("{}...", truncated.unwrap_or_default())
}

/// # Panics
/// Panics when the TLS backend cannot be initialized
#[must_use]
pub fn init_http_client() -> reqwest::Client {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("Unable to build HTTP client")
}

/// Spawn a task that watches for CTRL + C signal and cancels a [`CancellationToken`] when caught
pub fn spawn_ct_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Caught CTRL+C signal! Finishing up with what was found so far");
        ct.cancel();
    });
}

/// Sleeps for a random duration between `min_secs` and `max_secs`, or until cancelled
pub async fn jittered_pause(min_secs: f64, max_secs: f64, ct: &CancellationToken) {
    let secs = rand::rng().random_range(min_secs..max_secs);
    debug!("Pausing for {secs:.2}s");
    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs_f64(secs)) => {}
        () = ct.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_are_untouched() {
        assert_eq!(truncate_string(&"Live Now", 20), "Live Now");
    }

    #[test]
    fn long_strings_get_an_ellipsis() {
        assert_eq!(truncate_string(&"Arsenal vs Chelsea", 10), "Arsenal...");
    }

    #[test]
    fn never_splits_a_codepoint() {
        let out = truncate_string(&"Atlético Madrid vs Real", 10);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 10);
    }

    #[tokio::test]
    async fn pause_ends_early_on_cancel() {
        let ct = CancellationToken::new();
        ct.cancel();
        let started = std::time::Instant::now();
        jittered_pause(5.0, 6.0, &ct).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
