//! Validated run settings.
//!
//! [`Settings::from_cli`] turns raw CLI input into the values the pipeline
//! components are constructed from, and is where configuration errors are
//! caught: before any page is dispatched.

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::identity::IdentityPool;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use tracing::{debug, info};

/// Upper bound on concurrent page workers (each may own a browser).
pub const MAX_CONCURRENCY: usize = 16;

/// Everything `main` needs to assemble the pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub start_page: u32,
    pub pages: u32,
    pub concurrency: usize,
    pub output: PathBuf,
    pub identities: IdentityPool,
    pub insecure_proxies: bool,
    pub request_timeout: StdDuration,
    pub enrich: bool,
    pub chrome_path: Option<PathBuf>,
    pub browser_no_sandbox: bool,
    /// User agent the browser presents.
    pub browser_user_agent: String,
    pub detail_timeout: StdDuration,
    pub tesseract_cmd: String,
    pub ocr_lang: String,
    pub ocr_timeout: StdDuration,
    pub screenshot_fallback: bool,
}

impl Settings {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        url::Url::parse(&cli.base_url).map_err(|_| ConfigError::InvalidBaseUrl(cli.base_url.clone()))?;

        let mut proxies = cli.proxies.clone();
        if let Some(path) = &cli.proxy_file {
            let from_file = load_proxy_file(path)?;
            if from_file.is_empty() {
                return Err(ConfigError::EmptyIdentityPool);
            }
            proxies.extend(from_file);
        }

        let user_agents: Vec<String> = cli
            .user_agents
            .iter()
            .map(|ua| ua.trim().to_string())
            .filter(|ua| !ua.is_empty())
            .collect();
        let identities = IdentityPool::from_parts(&proxies, &user_agents)?;

        let concurrency = cli.concurrency.clamp(1, MAX_CONCURRENCY);
        if concurrency != cli.concurrency {
            info!(requested = cli.concurrency, using = concurrency, "Concurrency clamped");
        }

        Ok(Self {
            base_url: cli.base_url.clone(),
            start_page: cli.start_page,
            pages: cli.pages,
            concurrency,
            output: cli.output.clone(),
            identities,
            insecure_proxies: cli.insecure_proxies,
            request_timeout: StdDuration::from_secs(cli.request_timeout_secs.max(1)),
            enrich: !cli.no_enrich,
            chrome_path: cli.chrome_path.clone(),
            browser_no_sandbox: cli.browser_no_sandbox,
            browser_user_agent: user_agents[0].clone(),
            detail_timeout: StdDuration::from_secs(cli.detail_timeout_secs.max(1)),
            tesseract_cmd: cli.tesseract_cmd.clone(),
            ocr_lang: cli.ocr_lang.clone(),
            ocr_timeout: StdDuration::from_secs(cli.ocr_timeout_secs.max(1)),
            screenshot_fallback: cli.screenshot_fallback,
        })
    }
}

/// Read proxy URLs, one per line, skipping blanks and `#` comments.
pub fn load_proxy_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ProxyFile {
        path: path.to_path_buf(),
        source,
    })?;
    let proxies = parse_proxy_list(&text);
    debug!(path = %path.display(), count = proxies.len(), "Loaded proxy list");
    Ok(proxies)
}

fn parse_proxy_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["jobscrape"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn test_defaults_give_direct_identity() {
        let settings = Settings::from_cli(&cli(&[])).unwrap();
        assert_eq!(settings.identities.len(), 1);
        assert!(settings.enrich);
        assert_eq!(settings.request_timeout, StdDuration::from_secs(20));
        assert_eq!(settings.browser_user_agent, crate::cli::DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_concurrency_is_clamped() {
        let settings = Settings::from_cli(&cli(&["--concurrency", "0"])).unwrap();
        assert_eq!(settings.concurrency, 1);
        let settings = Settings::from_cli(&cli(&["--concurrency", "500"])).unwrap();
        assert_eq!(settings.concurrency, MAX_CONCURRENCY);
    }

    #[test]
    fn test_blank_user_agent_is_empty_pool() {
        let err = Settings::from_cli(&cli(&["--user-agent", "  "])).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyIdentityPool));
    }

    #[test]
    fn test_invalid_base_url() {
        let err = Settings::from_cli(&cli(&["--base-url", "not a url"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl(_)));
    }

    #[test]
    fn test_proxy_file_merged_with_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# pool A").unwrap();
        writeln!(file, "http://u1:p1@10.0.0.1:8000").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "http://u2:p2@10.0.0.2:8000  # backup").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let settings = Settings::from_cli(&cli(&[
            "--proxy-file",
            &path,
            "--proxy",
            "http://u3:p3@10.0.0.3:8000",
        ]))
        .unwrap();
        assert_eq!(settings.identities.len(), 3);
    }

    #[test]
    fn test_empty_proxy_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# nothing here").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let err = Settings::from_cli(&cli(&["--proxy-file", &path])).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyIdentityPool));
    }

    #[test]
    fn test_missing_proxy_file() {
        let err = Settings::from_cli(&cli(&["--proxy-file", "/nonexistent/proxies.txt"])).unwrap_err();
        assert!(matches!(err, ConfigError::ProxyFile { .. }));
    }

    #[test]
    fn test_parse_proxy_list() {
        let list = parse_proxy_list("a\n  # c\n\nb # d\n");
        assert_eq!(list, vec!["a".to_string(), "b".to_string()]);
    }
}
