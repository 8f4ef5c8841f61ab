use url::form_urlencoded;

/// File-extension marker every HLS manifest URL carries
pub const MANIFEST_MARKER: &str = ".m3u8";

/// Tracking pixel whose query string sometimes smuggles the real manifest URL
const BEACON_SEGMENT: &str = "ping.gif";
const BEACON_PARAM: &str = "mu";

/// Decides whether an observed network-response URL points at a stream manifest.
///
/// Returns the decoded manifest URL when `raw_url` is a beacon carrying one in its
/// `mu` parameter, `raw_url` itself when it directly mentions `.m3u8`, and `None`
/// otherwise. Never fails: malformed input simply yields `None`.
#[must_use]
pub fn classify(raw_url: &str) -> Option<String> {
    if let Some(smuggled) = beacon_payload(raw_url) {
        return Some(smuggled);
    }

    if raw_url.contains(MANIFEST_MARKER) {
        return Some(raw_url.to_string());
    }

    None
}

fn beacon_payload(raw_url: &str) -> Option<String> {
    if !raw_url.contains(BEACON_SEGMENT) {
        return None;
    }

    let (_, query) = raw_url.split_once('?')?;
    // Fragments never reach the server, drop them before decoding
    let query = query.split_once('#').map_or(query, |(q, _)| q);

    // Beacons encode the payload twice, so it gets one more pass after the query decode
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == BEACON_PARAM)
        .map(|(_, value)| {
            let twice = urlencoding::decode_binary(value.as_bytes());
            String::from_utf8_lossy(&twice).into_owned()
        })
        .filter(|value| value.contains(MANIFEST_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_manifest_passes_through_unchanged() {
        let url = "https://cdn.example/stream/index.m3u8?token=abc";
        assert_eq!(classify(url).as_deref(), Some(url));
    }

    #[test]
    fn beacon_parameter_is_decoded() {
        assert_eq!(
            classify("https://t.example/ping.gif?mu=https%3A%2F%2Fcdn.example%2Fa.m3u8").as_deref(),
            Some("https://cdn.example/a.m3u8")
        );
    }

    #[test]
    fn double_encoded_beacon_is_fully_decoded() {
        assert_eq!(
            classify("https://t.example/ping.gif?mu=https%253A%252F%252Fcdn.example%252Fa.m3u8").as_deref(),
            Some("https://cdn.example/a.m3u8")
        );
    }

    #[test]
    fn beacon_parameter_among_others() {
        assert_eq!(
            classify("https://t.example/v1/ping.gif?ts=1&mu=https%3A%2F%2Fcdn.example%2Fb.m3u8%3Fs%3D2&x=y")
                .as_deref(),
            Some("https://cdn.example/b.m3u8?s=2")
        );
    }

    #[test]
    fn beacon_without_manifest_is_ignored() {
        assert_eq!(
            classify("https://t.example/ping.gif?mu=https%3A%2F%2Fads.example%2Fclick"),
            None
        );
        assert_eq!(classify("https://t.example/ping.gif?other=1"), None);
        assert_eq!(classify("https://t.example/ping.gif"), None);
    }

    #[test]
    fn irrelevant_responses_are_ignored() {
        for url in [
            "https://ads.example/adTracker.gif",
            "https://site.example/player.js",
            "https://site.example/",
            "",
            "not a url at all %%%",
        ] {
            assert_eq!(classify(url), None, "{url}");
        }
    }

    #[test]
    fn malformed_percent_encoding_never_panics() {
        let out = classify("ping.gif?mu=%E0%A4%A.m3u8&&==");
        assert!(out.is_some_and(|u| u.contains(MANIFEST_MARKER)));
    }

    #[test]
    fn idempotent_on_own_output() {
        for url in [
            "https://cdn.example/stream/index.m3u8",
            "https://t.example/ping.gif?mu=https%3A%2F%2Fcdn.example%2Fa.m3u8",
        ] {
            let once = classify(url).unwrap();
            assert_eq!(classify(&once).as_deref(), Some(once.as_str()));
        }
    }

    #[test]
    fn marker_anywhere_in_query_is_accepted() {
        // A mention in the query string alone is enough
        let url = "https://site.example/page?next=/live/x.m3u8";
        assert_eq!(classify(url).as_deref(), Some(url));
    }
}
