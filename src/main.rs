//! # jobscrape
//!
//! A resilient scraper for paginated job-vacancy listings. It fetches listing
//! pages through a rotating pool of proxy/user-agent identities, extracts each
//! vacancy's summary fields, opens every vacancy's detail view in a headless
//! browser to collect page metadata and OCR the advert image, and appends one
//! JSON record per vacancy to a crash-safe store.
//!
//! ## Usage
//!
//! ```sh
//! jobscrape -o scraped_data.json --pages 5 --proxy-file proxies.txt
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Fetching**: Download a listing page with retries and identity rotation
//! 2. **Parsing**: Extract listing drafts with layered fallback strategies
//! 3. **Enriching**: Open each detail view in the page's own browser session
//!    and OCR its advert image
//! 4. **Output**: Append each finished record to the JSON store
//!
//! Up to `--concurrency` pages run at once; a failing page or listing never
//! affects the others.

use clap::Parser;
use std::error::Error;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;
mod config;
mod enrich;
mod error;
mod fetch;
mod identity;
mod models;
mod ocr;
mod orchestrator;
mod outputs;
mod scrapers;
mod utils;

use cli::Cli;
use config::Settings;
use enrich::chromium::ChromiumLauncher;
use enrich::{BrowserSession, DetailEnricher, EnrichOptions, SessionLauncher};
use error::ConfigError;
use fetch::{PageFetcher, ReqwestTransport, RetryPolicy};
use models::PageState;
use ocr::{OcrExtractor, TesseractEngine};
use orchestrator::{page_jobs, Orchestrator};
use outputs::json::JsonStore;
use utils::ensure_writable_parent;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("jobscrape starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.output, args.pages, args.concurrency, "Parsed CLI arguments");

    let settings = match Settings::from_cli(&args) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        identities = settings.identities.len(),
        pages = settings.pages,
        concurrency = settings.concurrency,
        enrich = settings.enrich,
        "Configuration loaded"
    );

    // Early check: ensure the store's directory is writable
    if let Err(e) = ensure_writable_parent(&settings.output).await {
        error!(
            error = %e,
            "Output file is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    // ---- Build pipeline components ----
    let transport = ReqwestTransport::new(settings.request_timeout, settings.insecure_proxies);
    let fetcher = PageFetcher::new(transport, settings.identities.clone(), RetryPolicy::default());

    let image_client = reqwest::Client::builder()
        .user_agent(settings.browser_user_agent.clone())
        .timeout(settings.ocr_timeout)
        .build()?;
    let engine = TesseractEngine::new(&settings.tesseract_cmd, &settings.ocr_lang, settings.ocr_timeout);
    let enricher = DetailEnricher::new(
        OcrExtractor::new(image_client, engine, settings.ocr_timeout),
        EnrichOptions {
            detail_timeout: settings.detail_timeout,
            screenshot_fallback: settings.screenshot_fallback,
            ..EnrichOptions::default()
        },
    );

    let launcher = if settings.enrich {
        let launcher = ChromiumLauncher {
            chrome_path: settings.chrome_path.clone(),
            user_agent: settings.browser_user_agent.clone(),
            no_sandbox: settings.browser_no_sandbox,
            request_timeout: settings.request_timeout,
        };
        if let Err(e) = probe_browser(&launcher).await {
            error!(error = %e, "Browser could not be started; pass --chrome-path or --no-enrich");
            return Err(e.into());
        }
        Some(launcher)
    } else {
        info!("Enrichment disabled; listing fields only");
        None
    };

    let store = JsonStore::new(&settings.output);
    store.report_existing().await;

    // ---- Ctrl-C stops dispatch and ends in-flight pages early ----
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing current listings and stopping");
            on_signal.cancel();
        }
    });

    // ---- Run ----
    let jobs = page_jobs(&settings.base_url, settings.start_page, settings.pages);
    let orchestrator = Orchestrator::new(
        &fetcher,
        launcher.as_ref(),
        &enricher,
        &store,
        settings.concurrency,
        cancel.clone(),
    );
    let summary = orchestrator.run(jobs).await;

    for report in summary.skipped() {
        warn!(
            page = report.page,
            url = %report.url,
            reason = report.reason.as_deref().unwrap_or("unknown"),
            "Page skipped"
        );
    }
    for report in summary.reports.iter().filter(|r| r.state == PageState::PartiallyDone) {
        warn!(
            page = report.page,
            listings = report.listings,
            persisted = report.persisted,
            reason = report.reason.as_deref().unwrap_or("unknown"),
            "Page partially done"
        );
    }
    if cancel.is_cancelled() {
        info!(
            not_started = summary.count(PageState::Pending),
            "Run interrupted; records persisted so far are kept"
        );
    }

    let elapsed = start_time.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        elapsed_human = %format_duration(elapsed),
        persisted = summary.persisted(),
        output = %store.path().display(),
        "Scraping complete"
    );

    Ok(())
}

/// Start and immediately close one browser session.
async fn probe_browser(launcher: &ChromiumLauncher) -> Result<(), ConfigError> {
    let session = launcher.launch("about:blank").await?;
    session.shutdown().await;
    info!("Browser probe succeeded");
    Ok(())
}

fn format_duration(d: StdDuration) -> String {
    let secs = d.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}
