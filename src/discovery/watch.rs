use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};
use tracing::debug;

use crate::browser::BrowserPage;

/// Turns an observed response URL into a manifest candidate
pub type Classifier = fn(&str) -> Option<String>;

/// How a watch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Matched,
    TimedOut,
    /// The response stream closed before anything matched
    Ended,
}

/// A live subscription racing against a deadline for the first manifest candidate.
///
/// The subscription lives inside a listener task that stops reading after the first
/// match. [`WatchSession::finish`] always tears it down before returning, and
/// dropping an unfinished session aborts it too.
pub struct WatchSession {
    first_match: oneshot::Receiver<String>,
    listener: JoinHandle<()>,
    deadline: Instant,
}

/// Subscribes to `page` responses and starts classifying them in the background
///
/// # Errors
/// Errors when the page refuses the subscription
pub async fn attach<P>(page: &P, classifier: Classifier, budget: Duration) -> Result<WatchSession>
where
    P: BrowserPage + ?Sized,
{
    let mut responses = page.response_urls().await?;
    let deadline = Instant::now() + budget;
    let (tx, first_match) = oneshot::channel();

    let listener = tokio::spawn(async move {
        while let Some(url) = responses.next().await {
            if let Some(candidate) = classifier(&url) {
                debug!("Candidate {candidate} from response {url}");
                tx.send(candidate).ok();
                return;
            }
        }
    });

    Ok(WatchSession {
        first_match,
        listener,
        deadline,
    })
}

impl WatchSession {
    /// Waits until the first candidate arrives or the budget runs out, then detaches
    pub async fn finish(mut self) -> (WatchState, Option<String>) {
        let outcome = tokio::time::timeout_at(self.deadline, &mut self.first_match).await;
        self.detach().await;

        match outcome {
            Ok(Ok(candidate)) => (WatchState::Matched, Some(candidate)),
            Ok(Err(_)) => (WatchState::Ended, None),
            Err(_) => (WatchState::TimedOut, None),
        }
    }

    /// Stops the listener and waits until its subscription is gone
    async fn detach(&mut self) {
        self.listener.abort();
        (&mut self.listener).await.ok();
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Attaches, waits and detaches in one go
///
/// # Errors
/// Errors when the page refuses the subscription
pub async fn watch<P>(page: &P, classifier: Classifier, budget: Duration) -> Result<Option<String>>
where
    P: BrowserPage + ?Sized,
{
    let (_, candidate) = attach(page, classifier, budget).await?.finish().await;
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        browser::fake::{FakePage, Script},
        discovery::classify::classify,
    };

    #[tokio::test]
    async fn first_match_wins_and_subscription_is_released() {
        let page = FakePage::new(Script::responses([
            "https://ads.example/adTracker.gif",
            "https://cdn.example/first.m3u8",
            "https://cdn.example/second.m3u8",
        ]));

        let session = attach(&page, classify, Duration::from_secs(2)).await.unwrap();
        assert_eq!(page.active_subscriptions(), 1);
        page.navigate("https://embed.example/").await.unwrap();

        let (state, candidate) = session.finish().await;
        assert_eq!(state, WatchState::Matched);
        assert_eq!(candidate.as_deref(), Some("https://cdn.example/first.m3u8"));
        assert_eq!(page.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn times_out_within_budget() {
        let page = FakePage::new(Script::responses([
            "https://site.example/player.js",
            "https://ads.example/pixel.gif",
        ]));

        let started = std::time::Instant::now();
        let session = attach(&page, classify, Duration::from_millis(150)).await.unwrap();
        page.navigate("https://embed.example/").await.unwrap();
        let (state, candidate) = session.finish().await;

        assert_eq!(state, WatchState::TimedOut);
        assert_eq!(candidate, None);
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(page.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn late_match_after_deadline_is_ignored() {
        let page = FakePage::new(Script {
            on_navigate: vec![(Duration::from_millis(400), "https://cdn.example/late.m3u8".into())],
            ..Script::default()
        });

        let found = {
            let session = attach(&page, classify, Duration::from_millis(100)).await.unwrap();
            page.navigate("https://embed.example/").await.unwrap();
            session.finish().await.1
        };
        assert_eq!(found, None);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(page.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn dropping_an_unfinished_session_unsubscribes() {
        let page = FakePage::new(Script::default());
        let session = attach(&page, classify, Duration::from_secs(5)).await.unwrap();
        assert_eq!(page.active_subscriptions(), 1);

        drop(session);
        // Abort takes effect the next time the runtime polls the task
        for _ in 0..50 {
            if page.active_subscriptions() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(page.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn watch_decodes_beacon() {
        let page = FakePage::new(Script::responses([
            "https://t.example/ping.gif?mu=https%3A%2F%2Fcdn.example%2Fa.m3u8",
        ]));
        let nav = page.clone();
        tokio::spawn(async move { nav.navigate("https://embed.example/").await });

        let found = watch(&page, classify, Duration::from_secs(2)).await.unwrap();
        assert_eq!(found.as_deref(), Some("https://cdn.example/a.m3u8"));
        assert_eq!(page.active_subscriptions(), 0);
    }
}
