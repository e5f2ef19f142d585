//! Page fetching through a headless browser (Chrome DevTools Protocol).
//!
//! Every fetch launches its own Chromium with a private profile directory, so
//! concurrent runs never share a browser. The browser is torn down on every
//! path out of [`BrowserFetcher::fetch`].

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use thiserror::Error;

use crate::config::BrowserSettings;

/// Rendered page content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    /// Visible text of `<body>`
    pub text: String,
    /// Full rendered markup
    pub html: String,
}

impl PageSnapshot {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("browser config: {0}")]
    Config(String),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("could not read page content: {0}")]
    Capture(String),
}

/// Loads a URL and returns its rendered text and markup.
///
/// Implementations swallow failures and return an empty snapshot; the solve
/// loop reads an empty snapshot as "no question here".
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> PageSnapshot;
}

/// Chromium-backed fetcher.
pub struct BrowserFetcher {
    settings: BrowserSettings,
}

impl BrowserFetcher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    async fn launch(&self, profile: &std::path::Path) -> Result<(Browser, tokio::task::JoinHandle<()>), FetchError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .user_data_dir(profile)
            .request_timeout(self.settings.page_timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if let Some(exe) = &self.settings.chrome_executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder.build().map_err(FetchError::Config)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("Browser event error: {}", e);
                }
            }
        });

        Ok((browser, handler_task))
    }

    async fn capture(&self, browser: &Browser, url: &str) -> Result<PageSnapshot, FetchError> {
        let secs = self.settings.page_timeout.as_secs();
        let page = tokio::time::timeout(self.settings.page_timeout, async {
            let page = browser.new_page("about:blank").await?;
            page.goto(url).await?;
            Ok::<Page, chromiumoxide::error::CdpError>(page)
        })
        .await
        .map_err(|_| FetchError::Timeout {
            url: url.to_string(),
            secs,
        })?
        .map_err(|e| FetchError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        tokio::time::sleep(self.settings.settle).await;

        let text = page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .map_err(|e| FetchError::Capture(e.to_string()))?
            .into_value::<String>()
            .unwrap_or_default();
        let html = page
            .content()
            .await
            .map_err(|e| FetchError::Capture(e.to_string()))?;

        Ok(PageSnapshot { text, html })
    }

    async fn try_fetch(&self, url: &str) -> Result<PageSnapshot, FetchError> {
        let profile = tempfile::Builder::new()
            .prefix("quiz-browser-")
            .tempdir()
            .map_err(|e| FetchError::Launch(e.to_string()))?;
        let (mut browser, handler_task) = self.launch(profile.path()).await?;

        let result = self.capture(&browser, url).await;

        if let Err(e) = browser.close().await {
            tracing::debug!("Browser close failed: {}", e);
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), browser.wait()).await;
        handler_task.abort();

        result
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> PageSnapshot {
        tracing::debug!("Launching browser for {}", url);
        match self.try_fetch(url).await {
            Ok(snapshot) => {
                tracing::debug!(
                    "Fetched {} ({} text chars, {} markup chars)",
                    url,
                    snapshot.text.len(),
                    snapshot.html.len()
                );
                snapshot
            }
            Err(e) => {
                tracing::warn!("Page fetch failed: {}", e);
                PageSnapshot::default()
            }
        }
    }
}
