//! Command-line interface definitions for jobscrape.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Most arguments can also be provided via environment variables.

use clap::Parser;
use std::path::PathBuf;

/// Listing page URL without the trailing page number.
pub const DEFAULT_BASE_URL: &str =
    "https://www.topjobs.lk/applicant/vacancybyfunctionalarea.jsp?FA=AV&pageNo=";

/// Desktop Chrome user agent the site serves full markup to.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";

/// Command-line arguments for jobscrape.
///
/// # Examples
///
/// ```sh
/// # Five pages, enrichment and OCR on, direct connection
/// jobscrape -o scraped_data.json
///
/// # Through a proxy list, relaxing TLS checks for the proxies only
/// jobscrape --proxy-file proxies.txt --insecure-proxies
///
/// # Listing fields only, no browser
/// jobscrape --pages 10 --no-enrich
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Listing URL the page number is appended to
    #[arg(long, env = "JOBSCRAPE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// First page number
    #[arg(long, default_value_t = 1)]
    pub start_page: u32,

    /// Number of pages to scrape
    #[arg(long, env = "JOBSCRAPE_PAGES", default_value_t = 5)]
    pub pages: u32,

    /// Pages processed concurrently (each with its own browser)
    #[arg(long, env = "JOBSCRAPE_CONCURRENCY", default_value_t = 5)]
    pub concurrency: usize,

    /// JSON file listings are appended to
    #[arg(short, long, env = "JOBSCRAPE_OUTPUT", default_value = "scraped_data.json")]
    pub output: PathBuf,

    /// Proxy URL, credentials inline (repeatable)
    #[arg(long = "proxy")]
    pub proxies: Vec<String>,

    /// File with one proxy URL per line; `#` starts a comment
    #[arg(long, env = "JOBSCRAPE_PROXY_FILE")]
    pub proxy_file: Option<PathBuf>,

    /// User-Agent header (repeatable)
    #[arg(long = "user-agent", default_values_t = [DEFAULT_USER_AGENT.to_string()])]
    pub user_agents: Vec<String>,

    /// Skip TLS certificate verification when going through a proxy
    #[arg(long)]
    pub insecure_proxies: bool,

    /// HTTP timeout for listing pages
    #[arg(long, default_value_t = 20)]
    pub request_timeout_secs: u64,

    /// Only scrape listing fields; do not open detail views
    #[arg(long)]
    pub no_enrich: bool,

    /// Chrome/Chromium executable
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Run Chromium without its sandbox (some containers need this)
    #[arg(long)]
    pub browser_no_sandbox: bool,

    /// How long to wait for a detail tab to open
    #[arg(long, default_value_t = 10)]
    pub detail_timeout_secs: u64,

    /// tesseract executable
    #[arg(long = "tesseract", env = "TESSERACT_CMD", default_value = "tesseract")]
    pub tesseract_cmd: String,

    /// OCR language
    #[arg(long, default_value = "eng")]
    pub ocr_lang: String,

    /// Timeout for each image download and each OCR run
    #[arg(long, default_value_t = 30)]
    pub ocr_timeout_secs: u64,

    /// OCR a screenshot of the detail view when it has no advert image
    #[arg(long)]
    pub screenshot_fallback: bool,
}
