//! Pagination driver and per-page state machine.
//!
//! Pages are processed by a bounded pool of concurrent workers (the same
//! `buffer_unordered` pattern the tool uses for all parallel I/O). Each page
//! moves through:
//!
//! ```text
//! Pending -> Fetching -> Parsed -> Enriching -> Done
//!                 \          \
//!                  Skipped    PartiallyDone (no browser session / interrupted)
//! ```
//!
//! Pages not yet started when the run is interrupted stay `Pending`.
//!
//! Within a page, listings are enriched strictly one after another through
//! the page's own browser session. Failures never cross page boundaries.

use crate::enrich::{BrowserSession, DetailEnricher, SessionLauncher};
use crate::fetch::{PageFetcher, Transport};
use crate::models::{PageReport, PageState, SENTINEL};
use crate::ocr::OcrEngine;
use crate::outputs::json::JsonStore;
use crate::scrapers::listings::parse_listings;
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// One page to process.
#[derive(Debug, Clone)]
pub struct PageJob {
    pub page: u32,
    pub url: String,
}

/// Build the page jobs `start..start+count` by appending the page number to `base_url`.
pub fn page_jobs(base_url: &str, start: u32, count: u32) -> Vec<PageJob> {
    (start..start.saturating_add(count))
        .map(|page| PageJob {
            page,
            url: format!("{base_url}{page}"),
        })
        .collect()
}

/// Totals over all page reports.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<PageReport>,
}

impl RunSummary {
    pub fn count(&self, state: PageState) -> usize {
        self.reports.iter().filter(|r| r.state == state).count()
    }

    pub fn persisted(&self) -> usize {
        self.reports.iter().map(|r| r.persisted).sum()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &PageReport> {
        self.reports.iter().filter(|r| r.state == PageState::Skipped)
    }
}

/// Drives every page through fetch, parse, enrichment and persistence.
pub struct Orchestrator<'a, T, L, E> {
    fetcher: &'a PageFetcher<T>,
    /// `None` when enrichment is disabled.
    launcher: Option<&'a L>,
    enricher: &'a DetailEnricher<E>,
    store: &'a JsonStore,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<'a, T, L, E> Orchestrator<'a, T, L, E>
where
    T: Transport,
    L: SessionLauncher,
    E: OcrEngine,
{
    pub fn new(
        fetcher: &'a PageFetcher<T>,
        launcher: Option<&'a L>,
        enricher: &'a DetailEnricher<E>,
        store: &'a JsonStore,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            launcher,
            enricher,
            store,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Process every job with at most `concurrency` pages in flight.
    #[instrument(level = "info", skip_all, fields(pages = jobs.len(), concurrency = self.concurrency))]
    pub async fn run(&self, jobs: Vec<PageJob>) -> RunSummary {
        let t0 = Instant::now();
        info!("Starting page workers");

        let mut reports: Vec<PageReport> = stream::iter(jobs)
            .map(|job| self.process_page(job))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        reports.sort_by_key(|r| r.page);

        let summary = RunSummary { reports };
        info!(
            done = summary.count(PageState::Done),
            partial = summary.count(PageState::PartiallyDone),
            skipped = summary.count(PageState::Skipped),
            not_started = summary.count(PageState::Pending),
            persisted = summary.persisted(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "All pages processed"
        );
        summary
    }

    #[instrument(level = "info", skip_all, fields(page = job.page, url = %job.url))]
    async fn process_page(&self, job: PageJob) -> PageReport {
        let mut report = PageReport::new(job.page, &job.url);

        if self.cancel.is_cancelled() {
            // Never started: stays pending.
            report.reason = Some("interrupted".to_string());
            return report;
        }

        report.state = PageState::Fetching;
        let markup = match self.fetcher.fetch(&job.url).await {
            Ok(m) => m,
            Err(e) => {
                for attempt in &e.attempts {
                    if let Err(reason) = &attempt.outcome {
                        debug!(
                            attempt = attempt.ordinal,
                            via = %attempt.identity,
                            url = %attempt.url,
                            %reason,
                            "Failed attempt"
                        );
                    }
                }
                warn!(error = %e, "Page skipped");
                report.state = PageState::Skipped;
                report.reason = Some(e.to_string());
                return report;
            }
        };

        let listings = parse_listings(&markup);
        report.state = PageState::Parsed;
        report.listings = listings.len();
        if listings.is_empty() {
            report.state = PageState::Done;
            return report;
        }

        let mut session = match self.launcher {
            Some(launcher) => match launcher.launch(&job.url).await {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(error = %e, "Browser session unavailable; persisting unenriched listings");
                    report.reason = Some(format!("enrichment unavailable: {e}"));
                    None
                }
            },
            None => None,
        };
        let enrichment_lost = self.launcher.is_some() && session.is_none();

        report.state = PageState::Enriching;
        let mut interrupted = false;
        for listing in listings {
            if self.cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let draft = match session.as_mut() {
                Some(s) => self.enricher.enrich(s, &listing.handle, listing.draft).await,
                None => listing.draft,
            };

            let record = draft.finalize();
            info!(
                reference = record.reference(),
                position = record.position(),
                employer = record.employer(),
                opening = record.opening_date(),
                closing = record.closing_date(),
                has_title = record.seo_title().is_some(),
                meta_tags = record.meta_tags().len(),
                has_text = record.extracted_text() != SENTINEL,
                "Listing ready"
            );
            match self.store.append(record).await {
                Ok(total) => {
                    report.persisted += 1;
                    debug!(total, "Listing persisted");
                }
                Err(e) => error!(row = %listing.handle.row_id, error = %e, "Failed to persist listing"),
            }
        }

        if let Some(s) = session {
            s.shutdown().await;
        }

        if interrupted {
            warn!(persisted = report.persisted, "Page interrupted");
            report.state = PageState::PartiallyDone;
            report.reason = Some("interrupted".to_string());
        } else if enrichment_lost {
            report.state = PageState::PartiallyDone;
        } else {
            report.state = PageState::Done;
        }

        info!(
            state = %report.state,
            listings = report.listings,
            persisted = report.persisted,
            "Page finished"
        );
        report
    }
}
