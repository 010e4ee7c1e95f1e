//! Detail view enrichment through a browser session.
//!
//! Clicking a listing row opens the advert in a new tab. From that tab we
//! read the page title and named `<meta>` tags, and find the advert image in
//! the `#remark` region for OCR.
//!
//! # Session contract
//!
//! A [`BrowserSession`] is owned by exactly one page worker and is never
//! shared; tab focus is global to the session. [`DetailEnricher::enrich`]
//! enters with one active browsing context and always leaves with the same
//! set of contexts and the original one focused, whether enrichment
//! succeeded or failed at any step.

pub mod chromium;

use crate::error::SessionError;
use crate::models::{ListingDraft, SENTINEL};
use crate::ocr::{OcrEngine, OcrExtractor};
use crate::scrapers::listings::ListingHandle;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration as StdDuration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

/// Selector for the advert image inside the remark region.
pub const REMARK_IMAGE: &str = "#remark img";

/// Opaque identifier of a tab/window within one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(pub String);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An explicitly owned browser session.
///
/// Element-level operations act on the currently focused context.
pub trait BrowserSession {
    /// Navigate the focused context to `url`.
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// All open browsing contexts.
    async fn contexts(&self) -> Result<Vec<ContextId>, SessionError>;

    /// The focused context.
    fn active(&self) -> &ContextId;

    /// Focus `context`.
    async fn switch_to(&mut self, context: &ContextId) -> Result<(), SessionError>;

    /// Close `context`. Closing the focused context leaves focus undefined
    /// until the next [`BrowserSession::switch_to`].
    async fn close_context(&mut self, context: &ContextId) -> Result<(), SessionError>;

    /// Click the first element matching `selector`.
    async fn click(&mut self, selector: &str) -> Result<(), SessionError>;

    /// Title of the focused document, if any.
    async fn title(&mut self) -> Result<Option<String>, SessionError>;

    /// `(name, content)` of every `<meta name=...>` element.
    async fn meta_tags(&mut self) -> Result<Vec<(String, String)>, SessionError>;

    /// Attribute of the first element matching `selector`; `None` if either is absent.
    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>, SessionError>;

    /// URL of the focused document.
    async fn current_url(&mut self) -> Result<Option<String>, SessionError>;

    /// PNG screenshot of the focused document.
    async fn screenshot(&mut self) -> Result<Vec<u8>, SessionError>;

    /// Close every context and the browser itself.
    async fn shutdown(self);
}

/// Starts one session per page worker.
pub trait SessionLauncher {
    type Session: BrowserSession;

    /// Launch a browser with a single context showing `url`.
    async fn launch(&self, url: &str) -> Result<Self::Session, SessionError>;
}

/// Where the advert text will come from.
enum AdvertImage {
    Url(String),
    Screenshot(Vec<u8>),
    None,
}

/// What was read from the detail tab, before OCR.
struct DetailView {
    seo_title: Option<String>,
    meta_tags: BTreeMap<String, String>,
    image: AdvertImage,
}

/// Timing and fallback knobs for [`DetailEnricher`].
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// How long to wait for the detail tab to appear.
    pub detail_timeout: StdDuration,
    /// Poll interval while waiting.
    pub poll_interval: StdDuration,
    /// OCR a screenshot of the detail tab when it has no remark image.
    pub screenshot_fallback: bool,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            detail_timeout: StdDuration::from_secs(10),
            poll_interval: StdDuration::from_millis(200),
            screenshot_fallback: false,
        }
    }
}

/// Opens a listing's detail view and augments its draft.
#[derive(Debug)]
pub struct DetailEnricher<E> {
    ocr: OcrExtractor<E>,
    options: EnrichOptions,
}

impl<E> DetailEnricher<E>
where
    E: OcrEngine,
{
    pub fn new(ocr: OcrExtractor<E>, options: EnrichOptions) -> Self {
        Self { ocr, options }
    }

    /// Enrich `base` from the listing's detail view.
    ///
    /// Never fails: on any session error `base` is returned unchanged. The
    /// session's contexts and focus are restored before returning.
    #[instrument(level = "info", skip_all, fields(row = %handle.row_id, reference = %base.reference))]
    pub async fn enrich<S>(&self, session: &mut S, handle: &ListingHandle, base: ListingDraft) -> ListingDraft
    where
        S: BrowserSession,
    {
        let origin = session.active().clone();
        let before = match session.contexts().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Could not list browsing contexts; skipping enrichment");
                return base;
            }
        };

        let outcome = self.read_detail(session, handle, &before).await;
        restore(session, &origin, &before).await;

        let detail = match outcome {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "Enrichment failed; keeping base record");
                return base;
            }
        };

        let extracted_text = match &detail.image {
            AdvertImage::Url(url) => self.ocr.extract_text(url).await,
            AdvertImage::Screenshot(png) => self.ocr.extract_from_bytes(png).await,
            AdvertImage::None => SENTINEL.to_string(),
        };

        info!(
            meta_tags = detail.meta_tags.len(),
            has_title = detail.seo_title.is_some(),
            ocr = extracted_text != SENTINEL,
            "Enriched listing"
        );

        ListingDraft {
            seo_title: detail.seo_title,
            meta_tags: detail.meta_tags,
            extracted_text,
            ..base
        }
    }

    /// Click through to the detail tab and read it. Leaves cleanup to the caller.
    async fn read_detail<S>(
        &self,
        session: &mut S,
        handle: &ListingHandle,
        before: &[ContextId],
    ) -> Result<DetailView, SessionError>
    where
        S: BrowserSession,
    {
        session.click(&handle.click_selector()).await?;

        let detail = self.wait_for_new_context(session, before).await?;
        session.switch_to(&detail).await?;
        debug!(context = %detail, "Switched to detail tab");

        let seo_title = session.title().await?;
        let meta_tags: BTreeMap<String, String> = session
            .meta_tags()
            .await?
            .into_iter()
            .filter(|(name, _)| !name.is_empty())
            .collect();

        let image = self.find_advert_image(session).await;

        Ok(DetailView {
            seo_title,
            meta_tags,
            image,
        })
    }

    /// The remark image, resolved to an absolute URL; errors here only mean "no image".
    async fn find_advert_image<S>(&self, session: &mut S) -> AdvertImage
    where
        S: BrowserSession,
    {
        match session.attribute(REMARK_IMAGE, "src").await {
            Ok(Some(src)) if !src.trim().is_empty() => {
                let base = session.current_url().await.ok().flatten();
                return AdvertImage::Url(absolutize(base.as_deref(), src.trim()));
            }
            Ok(_) => debug!("No advert image in remark region"),
            Err(e) => debug!(error = %e, "Advert image lookup failed"),
        }

        if !self.options.screenshot_fallback {
            return AdvertImage::None;
        }
        match session.screenshot().await {
            Ok(png) => AdvertImage::Screenshot(png),
            Err(e) => {
                debug!(error = %e, "Screenshot fallback failed");
                AdvertImage::None
            }
        }
    }

    async fn wait_for_new_context<S>(&self, session: &S, before: &[ContextId]) -> Result<ContextId, SessionError>
    where
        S: BrowserSession,
    {
        let deadline = Instant::now() + self.options.detail_timeout;
        loop {
            if let Some(new) = session
                .contexts()
                .await?
                .into_iter()
                .find(|c| !before.contains(c))
            {
                return Ok(new);
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout {
                    what: "detail tab",
                    after: self.options.detail_timeout,
                });
            }
            sleep(self.options.poll_interval).await;
        }
    }
}

/// Close every context opened since `before` and refocus `origin`.
async fn restore<S>(session: &mut S, origin: &ContextId, before: &[ContextId])
where
    S: BrowserSession,
{
    match session.contexts().await {
        Ok(now) => {
            for extra in now.iter().filter(|c| !before.contains(c)) {
                if let Err(e) = session.close_context(extra).await {
                    warn!(context = %extra, error = %e, "Failed to close detail tab");
                }
            }
        }
        Err(e) => warn!(error = %e, "Could not list contexts during cleanup"),
    }

    if let Err(e) = session.switch_to(origin).await {
        warn!(context = %origin, error = %e, "Failed to refocus listing tab");
    }
}

fn absolutize(base: Option<&str>, src: &str) -> String {
    base.and_then(|b| url::Url::parse(b).ok())
        .and_then(|b| b.join(src).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| src.to_string())
}
