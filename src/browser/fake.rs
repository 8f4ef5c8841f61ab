//! Scripted stand-in for a browser page

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{BrowserPage, PageOpener, ResponseStream};

/// Responses a page emits once navigation starts, and once it is clicked
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub on_navigate: Vec<(Duration, String)>,
    pub on_click: Vec<(Duration, String)>,
    pub fail_navigation: bool,
    pub fail_click: bool,
    pub html: String,
}

impl Script {
    pub fn responses<'a>(urls: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            on_navigate: urls
                .into_iter()
                .enumerate()
                .map(|(i, u)| (Duration::from_millis(10 * (i as u64 + 1)), u.to_string()))
                .collect(),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Shared {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
    active: AtomicUsize,
    navigations: Mutex<Vec<String>>,
    clicks: AtomicUsize,
    closed: AtomicUsize,
}

impl Shared {
    fn emit_later(self: &Arc<Self>, timeline: Vec<(Duration, String)>) {
        let shared = self.clone();
        tokio::spawn(async move {
            for (delay, url) in timeline {
                tokio::time::sleep(delay).await;
                shared
                    .subscribers
                    .lock()
                    .unwrap()
                    .retain(|tx| tx.send(url.clone()).is_ok());
            }
        });
    }
}

/// Decrements the live subscription count when the stream is dropped
struct SubscriptionGuard(Arc<Shared>);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct FakePage {
    script: Arc<Mutex<Script>>,
    shared: Arc<Shared>,
}

impl FakePage {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            shared: Arc::default(),
        }
    }

    /// Swaps what the page does on its next navigation
    pub fn rescript(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn active_subscriptions(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.shared.navigations.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> usize {
        self.shared.clicks.load(Ordering::SeqCst)
    }

    pub fn times_closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn response_urls(&self) -> Result<ResponseStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.lock().unwrap().push(tx);
        self.shared.active.fetch_add(1, Ordering::SeqCst);
        let guard = SubscriptionGuard(self.shared.clone());

        Ok(UnboundedReceiverStream::new(rx)
            .map(move |url| {
                let _held = &guard;
                url
            })
            .boxed())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.shared.navigations.lock().unwrap().push(url.to_string());
        let script = self.script.lock().unwrap().clone();
        // Partial page execution still produces traffic when navigation "fails"
        self.shared.emit_later(script.on_navigate);
        if script.fail_navigation {
            bail!("net::ERR_NAME_NOT_RESOLVED");
        }
        Ok(())
    }

    async fn click_at(&self, _x: f64, _y: f64) -> Result<()> {
        self.shared.clicks.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        if script.fail_click {
            bail!("Node is detached from document");
        }
        self.shared.emit_later(script.on_click);
        Ok(())
    }

    async fn html(&self) -> Result<String> {
        Ok(self.script.lock().unwrap().html.clone())
    }

    async fn close_page(&self) -> Result<()> {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out fresh [`FakePage`]s following the same script, remembering each one
#[derive(Default)]
pub struct FakeOpener {
    pub script: Script,
    pub opened: Mutex<Vec<FakePage>>,
}

#[async_trait]
impl PageOpener for FakeOpener {
    type Page = FakePage;

    async fn open_page(&self) -> Result<FakePage> {
        let page = FakePage::new(self.script.clone());
        self.opened.lock().unwrap().push(page.clone());
        Ok(page)
    }
}
