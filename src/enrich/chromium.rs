//! Chromium-backed browser sessions via `chromiumoxide`.
//!
//! Each [`ChromiumSession`] owns its own headless browser process, its CDP
//! event handler task, and a private temporary profile directory, so
//! concurrent page workers never share browser state.

use super::{BrowserSession, ContextId, SessionLauncher};
use crate::error::SessionError;
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration as StdDuration;
use tempfile::TempDir;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, instrument, warn};

impl From<CdpError> for SessionError {
    fn from(e: CdpError) -> Self {
        SessionError::Driver(e.to_string())
    }
}

/// Launch settings shared by every session of a run.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    /// Explicit browser executable; auto-detected when `None`.
    pub chrome_path: Option<PathBuf>,
    pub user_agent: String,
    /// Disable the Chromium sandbox (needed in some containers).
    pub no_sandbox: bool,
    pub request_timeout: StdDuration,
}

impl ChromiumLauncher {
    fn config(&self, profile_dir: &std::path::Path) -> Result<BrowserConfig, SessionError> {
        let mut builder = BrowserConfig::builder()
            .headless_mode(HeadlessMode::default())
            .request_timeout(self.request_timeout)
            .window_size(1920, 1080)
            .user_data_dir(profile_dir)
            .arg(format!("--user-agent={}", self.user_agent))
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");

        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }

        builder.build().map_err(SessionError::Launch)
    }
}

impl SessionLauncher for ChromiumLauncher {
    type Session = ChromiumSession;

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn launch(&self, url: &str) -> Result<ChromiumSession, SessionError> {
        let profile = tempfile::Builder::new()
            .prefix("jobscrape-chrome-")
            .tempdir()
            .map_err(|e| SessionError::Launch(format!("profile dir: {e}")))?;

        let config = self.config(profile.path())?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        // Tracked so shutdown can stop it; a detached handler would outlive the browser.
        let handler_task = task::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = ?e, "Browser handler error");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(p) => p,
            Err(e) => {
                let session = ChromiumSession::abandoned(browser, handler_task, profile);
                session.shutdown().await;
                return Err(SessionError::Launch(e.to_string()));
            }
        };

        let mut session = ChromiumSession::new(browser, handler_task, profile, page);
        if let Err(e) = session.navigate(url).await {
            session.shutdown().await;
            return Err(e);
        }
        info!("Browser session ready");
        Ok(session)
    }
}

/// One headless browser and the page focused by the enricher.
pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
    profile: TempDir,
    active: Option<Page>,
    active_id: ContextId,
}

impl ChromiumSession {
    fn new(browser: Browser, handler: JoinHandle<()>, profile: TempDir, page: Page) -> Self {
        let active_id = context_id(&page);
        Self {
            browser,
            handler,
            profile,
            active: Some(page),
            active_id,
        }
    }

    fn abandoned(browser: Browser, handler: JoinHandle<()>, profile: TempDir) -> Self {
        Self {
            browser,
            handler,
            profile,
            active: None,
            active_id: ContextId(String::new()),
        }
    }

    fn page(&self) -> Result<&Page, SessionError> {
        self.active
            .as_ref()
            .ok_or_else(|| SessionError::ContextNotFound(self.active_id.to_string()))
    }

    async fn find_page(&self, context: &ContextId) -> Result<Page, SessionError> {
        self.browser
            .pages()
            .await?
            .into_iter()
            .find(|p| &context_id(p) == context)
            .ok_or_else(|| SessionError::ContextNotFound(context.to_string()))
    }
}

fn context_id(page: &Page) -> ContextId {
    ContextId(page.target_id().inner().clone())
}

impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        let page = self.page()?;
        page.goto(url).await?;
        page.wait_for_navigation().await?;
        Ok(())
    }

    async fn contexts(&self) -> Result<Vec<ContextId>, SessionError> {
        Ok(self.browser.pages().await?.iter().map(context_id).collect())
    }

    fn active(&self) -> &ContextId {
        &self.active_id
    }

    async fn switch_to(&mut self, context: &ContextId) -> Result<(), SessionError> {
        let page = self.find_page(context).await?;
        page.bring_to_front().await?;
        self.active_id = context.clone();
        self.active = Some(page);
        Ok(())
    }

    async fn close_context(&mut self, context: &ContextId) -> Result<(), SessionError> {
        let page = self.find_page(context).await?;
        if &self.active_id == context {
            self.active = None;
        }
        page.close().await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), SessionError> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|_| SessionError::ElementNotFound(selector.to_string()))?;
        element.click().await?;
        Ok(())
    }

    async fn title(&mut self) -> Result<Option<String>, SessionError> {
        Ok(self.page()?.get_title().await?)
    }

    async fn meta_tags(&mut self) -> Result<Vec<(String, String)>, SessionError> {
        let elements = self.page()?.find_elements("meta[name]").await?;
        let mut tags = Vec::with_capacity(elements.len());
        for element in elements {
            if let Some(name) = element.attribute("name").await? {
                let content = element.attribute("content").await?.unwrap_or_default();
                tags.push((name, content));
            }
        }
        Ok(tags)
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>, SessionError> {
        let page = self.page()?;
        // An absent element is not an error here.
        match page.find_element(selector).await {
            Ok(element) => Ok(element.attribute(name).await?),
            Err(_) => Ok(None),
        }
    }

    async fn current_url(&mut self) -> Result<Option<String>, SessionError> {
        Ok(self.page()?.url().await?)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, SessionError> {
        let params = ScreenshotParams::builder().full_page(true).build();
        Ok(self.page()?.screenshot(params).await?)
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Failed to close browser cleanly");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "Failed waiting for browser exit");
        }
        self.handler.abort();
        let profile = self.profile.path().display().to_string();
        if let Err(e) = self.profile.close() {
            warn!(%profile, error = %e, "Failed to remove browser profile dir");
        }
        debug!("Browser session closed");
    }
}
