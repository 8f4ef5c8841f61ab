use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::{
        network::EventResponseReceived,
        page::{EventFrameNavigated, NavigateParams},
    },
    layout::Point,
};
use futures_util::{StreamExt, stream::BoxStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

#[cfg(test)]
pub mod fake;

/// URLs of network responses, in arrival order. Dropping the stream unsubscribes.
pub type ResponseStream = BoxStream<'static, String>;

/// The handful of page primitives manifest discovery needs
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Subscribes to every network response the page receives from now on
    async fn response_urls(&self) -> Result<ResponseStream>;

    /// Starts navigating and returns once the main frame commits
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Dispatches a synthetic mouse click at a viewport coordinate
    async fn click_at(&self, x: f64, y: f64) -> Result<()>;

    /// Serialized DOM of the current document
    async fn html(&self) -> Result<String>;

    async fn close_page(&self) -> Result<()>;
}

/// Something that can hand out fresh pages, one per target
#[async_trait]
pub trait PageOpener: Send + Sync {
    type Page: BrowserPage;

    async fn open_page(&self) -> Result<Self::Page>;
}

#[async_trait]
impl BrowserPage for Page {
    async fn response_urls(&self) -> Result<ResponseStream> {
        let events = self
            .event_listener::<EventResponseReceived>()
            .await
            .context("Subscribing to network responses")?;

        Ok(events.map(|e| e.response.url.clone()).boxed())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let mut frames = self
            .event_listener::<EventFrameNavigated>()
            .await
            .context("Subscribing to frame navigations")?;
        let main_frame_committed = async move {
            while let Some(e) = frames.next().await {
                if e.frame.parent_id.is_none() {
                    return true;
                }
            }
            false
        };
        tokio::pin!(main_frame_committed);

        tokio::select! {
            res = self.execute(NavigateParams::new(url)) => {
                let res = res.context("Sending navigation")?;
                if let Some(err) = &res.result.error_text {
                    bail!("Navigation failed: {err}");
                }
            }
            committed = &mut main_frame_committed => {
                if !committed {
                    bail!("Page went away before navigation committed");
                }
            }
        }

        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        Page::click(self, Point::new(x, y))
            .await
            .context("Dispatching synthetic click")?;
        Ok(())
    }

    async fn html(&self) -> Result<String> {
        self.content().await.context("Reading page content")
    }

    async fn close_page(&self) -> Result<()> {
        self.clone().close().await.context("Closing page")
    }
}

/// A running Chromium plus the task pumping its CDP connection
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// Launches Chromium and spawns its event handler loop
///
/// # Errors
/// Errors when no Chromium executable can be found or it fails to start
#[instrument]
pub async fn launch(headless: bool) -> Result<BrowserSession> {
    let mut config = BrowserConfig::builder().window_size(1280, 720);
    if !headless {
        config = config.with_head();
    }
    let config = config
        .build()
        .map_err(|e| anyhow!("Unable to configure browser: {e}"))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("Launching Chromium. Is it installed?")?;
    let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });
    info!("Browser launched");

    Ok(BrowserSession { browser, handler })
}

impl BrowserSession {
    /// Closes the browser and waits for the CDP handler to wind down
    ///
    /// # Errors
    /// Errors when the browser refuses to close
    pub async fn shutdown(mut self) -> Result<()> {
        self.browser.close().await.context("Closing browser")?;
        self.browser.wait().await.context("Waiting for browser exit")?;
        self.handler.await.ok();
        debug!("Browser shut down");
        Ok(())
    }
}

#[async_trait]
impl PageOpener for BrowserSession {
    type Page = Page;

    async fn open_page(&self) -> Result<Page> {
        self.browser
            .new_page("about:blank")
            .await
            .context("Opening new page")
    }
}
