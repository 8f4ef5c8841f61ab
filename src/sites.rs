use std::{collections::HashMap, time::Duration};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::browser::BrowserPage;
use crate::discovery::ManifestUrl;
use crate::util::truncate_string;

pub mod ppv;
pub mod tvapp;

const RE_READ_INTERVAL: Duration = Duration::from_millis(250);

/// A page expected to embed a live player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    pub page_url: String,
    pub name: String,
    /// Site category or section the target was listed under
    pub group: String,
    pub poster: Option<String>,
    /// Unix start time; `None` for round-the-clock channels, which sort last
    pub starts_at: Option<i64>,
    /// Human readable start time, `LIVE` for streams already running
    pub clock: String,
}

impl PageTarget {
    /// Key under which a resolved manifest is stored: `name::group::page_url`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}::{}::{}", self.name, self.group, self.page_url)
    }
}

/// Manifests found this run, keyed by [`PageTarget::key`]. Missing keys had no resolvable manifest.
pub type ResolvedMap = HashMap<String, ManifestUrl>;

/// Keeps re-reading the page until `extract` finds something or `wait` runs out
///
/// Navigation only waits for the commit, so script-rendered lists may still be empty
/// on the first read.
///
/// # Errors
/// Errors when the page content cannot be read
pub async fn read_until_found<P, T>(page: &P, wait: Duration, extract: impl Fn(&str) -> Vec<T>) -> Result<Vec<T>>
where
    P: BrowserPage + ?Sized,
{
    let deadline = Instant::now() + wait;
    loop {
        let found = extract(&page.html().await?);
        if !found.is_empty() || Instant::now() >= deadline {
            return Ok(found);
        }
        tokio::time::sleep(RE_READ_INTERVAL).await;
    }
}

/// Progress bar for a batch of targets
fn batch_progress(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

/// Runs `resolve_one` over every target in order, stopping early once `ct` is cancelled
///
/// Returns how many targets were attempted.
pub async fn resolve_batch<F, Fut>(
    targets: &[PageTarget],
    resolved: &mut ResolvedMap,
    ct: &CancellationToken,
    mut resolve_one: F,
) -> usize
where
    F: FnMut(usize, &PageTarget) -> Fut,
    Fut: Future<Output = Option<ManifestUrl>>,
{
    let pb = batch_progress(targets.len());
    let mut attempted = 0;

    for (idx, target) in targets.iter().enumerate() {
        if ct.is_cancelled() {
            break;
        }
        pb.set_message(truncate_string(&target.name, 40));

        if let Some(manifest) = resolve_one(idx, target).await {
            resolved.insert(target.key(), manifest);
        }
        attempted += 1;
        pb.inc(1);
    }

    pb.finish_and_clear();
    attempted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakePage, Script};

    fn words(html: &str) -> Vec<String> {
        html.split_whitespace().map(str::to_string).collect()
    }

    fn target(name: &str) -> PageTarget {
        PageTarget {
            page_url: format!("https://embed.example/{name}"),
            name: name.into(),
            group: "Football".into(),
            poster: None,
            starts_at: Some(1),
            clock: String::new(),
        }
    }

    #[test]
    fn key_joins_name_group_and_url() {
        assert_eq!(target("a").key(), "a::Football::https://embed.example/a");
    }

    #[tokio::test]
    async fn batch_records_hits_only() {
        let targets = [target("a"), target("b")];
        let mut resolved = ResolvedMap::new();

        let attempted = resolve_batch(&targets, &mut resolved, &CancellationToken::new(), |_, t| {
            let hit = (t.name == "a").then(|| ManifestUrl {
                url: "https://cdn.example/a.m3u8".into(),
                source_page_url: t.page_url.clone(),
                validated: true,
            });
            async move { hit }
        })
        .await;

        assert_eq!(attempted, 2);
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key(&targets[0].key()));
        assert!(!resolved.contains_key(&targets[1].key()));
    }

    #[tokio::test]
    async fn batch_stops_when_cancelled() {
        let targets = [target("a"), target("b"), target("c")];
        let ct = CancellationToken::new();
        let mut resolved = ResolvedMap::new();

        let attempted = resolve_batch(&targets, &mut resolved, &ct, |idx, _| {
            if idx == 0 {
                ct.cancel();
            }
            async { None }
        })
        .await;

        assert_eq!(attempted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_content_is_picked_up() {
        let page = FakePage::new(Script::default());
        let later = page.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            later.rescript(Script {
                html: "rendered".into(),
                ..Script::default()
            });
        });

        let found = read_until_found(&page, Duration::from_secs(5), words).await.unwrap();
        assert_eq!(found, ["rendered"]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_empty_after_the_wait() {
        let page = FakePage::new(Script::default());
        let started = Instant::now();

        let found = read_until_found(&page, Duration::from_secs(1), words).await.unwrap();
        assert!(found.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
