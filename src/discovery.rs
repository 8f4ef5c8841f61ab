use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::browser::{BrowserPage, PageOpener};

pub mod classify;
pub mod driver;
pub mod validate;
pub mod watch;

pub use classify::classify;
pub use validate::Validator;

/// Timing and interaction knobs for a single page resolution
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryPolicy {
    /// How long to wait for a manifest candidate, counted from subscription
    pub watch_budget: Duration,
    /// Pause between navigation and the synthetic click
    pub settle_delay: Duration,
    /// Viewport coordinate of the synthetic click
    pub click_point: (f64, f64),
    pub navigation_timeout: Duration,
}

impl DiscoveryPolicy {
    /// Player embeds listed by the PPV API (25 ms x 400 polls)
    pub const EMBED: Self = Self {
        watch_budget: Duration::from_millis(10_000),
        settle_delay: Duration::from_millis(300),
        click_point: (200.0, 200.0),
        navigation_timeout: Duration::from_secs(5),
    };

    /// Channel pages of the TVApp `/tv` list (25 ms x 150 polls)
    pub const CHANNEL: Self = Self {
        watch_budget: Duration::from_millis(3_750),
        settle_delay: Duration::from_millis(300),
        click_point: (200.0, 200.0),
        navigation_timeout: Duration::from_secs(15),
    };

    /// Event pages linked from TVApp sport sections (25 ms x 160 polls)
    pub const SECTION: Self = Self {
        watch_budget: Duration::from_millis(4_000),
        ..Self::CHANNEL
    };
}

/// A manifest that passed both classification and validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestUrl {
    pub url: String,
    pub source_page_url: String,
    pub validated: bool,
}

/// Why a page produced no manifest
#[derive(Debug)]
pub enum Miss {
    /// The page would not let us listen to its traffic
    Unobservable(anyhow::Error),
    NoCandidate,
    Rejected { candidate: String },
}

impl std::fmt::Display for Miss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unobservable(e) => write!(f, "unable to observe network responses: {e:#}"),
            Self::NoCandidate => write!(f, "no manifest seen before the deadline"),
            Self::Rejected { candidate } => write!(f, "validation rejected {candidate}"),
        }
    }
}

/// Resolves `target_url` into a validated manifest using an already open `page`.
///
/// The page can be reused for the next target: the response subscription is gone
/// by the time this returns. Every failure is logged and turns into `None`.
#[instrument(skip(page, policy, validator))]
pub async fn resolve<P>(
    page: &P,
    target_url: &str,
    policy: &DiscoveryPolicy,
    validator: &Validator,
) -> Option<ManifestUrl>
where
    P: BrowserPage + ?Sized,
{
    match try_resolve(page, target_url, policy, validator).await {
        Ok(manifest) => {
            info!("Found manifest {}", manifest.url);
            Some(manifest)
        }
        Err(miss) => {
            warn!("No manifest for {target_url}: {miss}");
            None
        }
    }
}

async fn try_resolve<P>(
    page: &P,
    target_url: &str,
    policy: &DiscoveryPolicy,
    validator: &Validator,
) -> Result<ManifestUrl, Miss>
where
    P: BrowserPage + ?Sized,
{
    let session = watch::attach(page, classify, policy.watch_budget)
        .await
        .map_err(Miss::Unobservable)?;

    driver::prepare(page, target_url, policy).await;

    let (_, candidate) = session.finish().await;
    let candidate = candidate.ok_or(Miss::NoCandidate)?;

    if !validator.validate(&candidate, target_url).await {
        return Err(Miss::Rejected { candidate });
    }

    Ok(ManifestUrl {
        url: candidate,
        source_page_url: target_url.to_string(),
        validated: true,
    })
}

/// Like [`resolve`], but in a page of its own that is closed afterwards
#[instrument(skip(opener, policy, validator))]
pub async fn resolve_in_fresh_page<O>(
    opener: &O,
    target_url: &str,
    policy: &DiscoveryPolicy,
    validator: &Validator,
) -> Option<ManifestUrl>
where
    O: PageOpener + ?Sized,
{
    let page = match opener.open_page().await {
        Ok(page) => page,
        Err(e) => {
            warn!("No manifest for {target_url}: {e:#}");
            return None;
        }
    };

    let manifest = resolve(&page, target_url, policy, validator).await;

    if let Err(e) = page.close_page().await {
        warn!("Unable to close page: {e:#}");
    }

    manifest
}
