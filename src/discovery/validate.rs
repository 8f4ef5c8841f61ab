use std::time::Duration;

use reqwest::{
    StatusCode,
    header::{ORIGIN, REFERER, USER_AGENT},
};
use tracing::{debug, instrument};
use url::Url;

use crate::util::DESKTOP_USER_AGENT;

/// Providers whose manifests refuse synthetic probes but are known to play fine
pub const ALLOWED_HOSTS: &[&str] = &["gg.poocloud.in"];

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Checks a candidate manifest with a single GET that pretends to come from the embedding page
#[derive(Debug, Clone)]
pub struct Validator {
    client: reqwest::Client,
    timeout: Duration,
    allowed_hosts: &'static [&'static str],
}

impl Validator {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: PROBE_TIMEOUT,
            allowed_hosts: ALLOWED_HOSTS,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns `true` when the manifest is allow-listed, or when the probe answers `200` or `403`.
    ///
    /// `403` counts as "exists but access-gated". Network errors, timeouts and any
    /// other status reject the candidate.
    #[instrument(skip(self))]
    pub async fn validate(&self, url: &str, referer: &str) -> bool {
        if self.is_allowed(url) {
            debug!("Host is allow-listed, skipping probe");
            return true;
        }

        let Some(origin) = origin_of(referer) else {
            debug!("Referer has no usable origin");
            return false;
        };

        let res = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header(USER_AGENT, DESKTOP_USER_AGENT)
            .header(REFERER, referer)
            .header(ORIGIN, origin)
            .send()
            .await;

        match res {
            Ok(res) => {
                let status = res.status();
                debug!("Probe answered {status}");
                matches!(status, StatusCode::OK | StatusCode::FORBIDDEN)
            }
            Err(e) => {
                debug!("Probe failed: {e}");
                false
            }
        }
    }

    fn is_allowed(&self, url: &str) -> bool {
        let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_owned)) else {
            return false;
        };

        self.allowed_hosts
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
    }
}

/// `scheme://host[:port]` of the page a manifest was found on
fn origin_of(page_url: &str) -> Option<String> {
    let origin = Url::parse(page_url).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}
