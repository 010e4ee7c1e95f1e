//! Text extraction from advert images.
//!
//! Many employers upload their advert as a single image, so the only way to
//! get its text is OCR. [`OcrExtractor::extract_text`] downloads the image,
//! checks it really is an image, hands it to an [`OcrEngine`], and normalises
//! the result. Every failure degrades to the sentinel; nothing escapes.

use crate::error::OcrError;
use crate::models::SENTINEL;
use crate::utils::{collapse_whitespace, truncate_for_log};
use std::process::Stdio;
use std::time::Duration as StdDuration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Recognises text in encoded image bytes.
pub trait OcrEngine {
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Runs the `tesseract` executable over stdin/stdout.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
    lang: String,
    timeout: StdDuration,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<String>, lang: impl Into<String>, timeout: StdDuration) -> Self {
        Self {
            binary: binary.into(),
            lang: lang.into(),
            timeout,
        }
    }

    async fn run(&self, image: &[u8]) -> Result<String, OcrError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.lang])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::Engine(format!("failed to start {}: {e}", self.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image)
                .await
                .map_err(|e| OcrError::Engine(format!("failed to feed image: {e}")))?;
            // Dropping stdin closes the pipe so tesseract sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OcrError::Engine(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                truncate_for_log(stderr.trim(), 200)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl OcrEngine for TesseractEngine {
    #[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        // The child is killed on drop if the timeout fires.
        timeout(self.timeout, self.run(image))
            .await
            .map_err(|_| OcrError::EngineTimeout(self.timeout))?
    }
}

/// Image container formats the OCR engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
    WebP,
}

/// Identify an image by its magic bytes.
pub fn sniff_image(bytes: &[u8]) -> Option<ImageFormat> {
    match bytes {
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(ImageFormat::Gif),
        [b'B', b'M', ..] => Some(ImageFormat::Bmp),
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(ImageFormat::Tiff),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Downloads, validates and OCRs advert images.
#[derive(Debug, Clone)]
pub struct OcrExtractor<E> {
    client: reqwest::Client,
    engine: E,
    download_timeout: StdDuration,
}

impl<E> OcrExtractor<E>
where
    E: OcrEngine,
{
    pub fn new(client: reqwest::Client, engine: E, download_timeout: StdDuration) -> Self {
        Self {
            client,
            engine,
            download_timeout,
        }
    }

    /// OCR the image at `image_url`, or the sentinel on any failure.
    #[instrument(level = "info", skip_all, fields(%image_url))]
    pub async fn extract_text(&self, image_url: &str) -> String {
        let result = match self.download(image_url).await {
            Ok(bytes) => self.recognize_bytes(&bytes).await,
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    /// OCR already-fetched image bytes (e.g. a screenshot), or the sentinel.
    #[instrument(level = "info", skip_all, fields(bytes = image.len()))]
    pub async fn extract_from_bytes(&self, image: &[u8]) -> String {
        let result = self.recognize_bytes(image).await;
        self.finish(result)
    }

    async fn download(&self, image_url: &str) -> Result<Vec<u8>, OcrError> {
        let fetch = async {
            let response = self.client.get(image_url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(OcrError::Status(status.as_u16()));
            }
            Ok::<Vec<u8>, OcrError>(response.bytes().await?.to_vec())
        };
        timeout(self.download_timeout, fetch)
            .await
            .map_err(|_| OcrError::DownloadTimeout(self.download_timeout))?
    }

    async fn recognize_bytes(&self, image: &[u8]) -> Result<String, OcrError> {
        let format = sniff_image(image).ok_or(OcrError::Decode(image.len()))?;
        debug!(?format, bytes = image.len(), "Running OCR");
        self.engine.recognize(image).await
    }

    fn finish(&self, result: Result<String, OcrError>) -> String {
        match result {
            Ok(raw) => {
                let text = collapse_whitespace(&raw);
                if text.is_empty() {
                    debug!("OCR produced no text");
                    SENTINEL.to_string()
                } else {
                    debug!(chars = text.len(), preview = %truncate_for_log(&text, 80), "OCR succeeded");
                    text
                }
            }
            Err(e) => {
                warn!(error = %e, "Text extraction failed; using sentinel");
                SENTINEL.to_string()
            }
        }
    }
}
