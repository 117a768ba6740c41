//! Captcha solvers: a remote OCR service and an operator prompt.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use image::ImageFormat;
use rustyline::error::ReadlineError;
use serde::{Deserialize, Serialize};

use slotclaim::{CaptchaSolver, ClaimError, ClaimResult};

/// Request timeout for the OCR service.
const OCR_TIMEOUT: Duration = Duration::from_secs(10);

/// Decode a captcha screenshot and re-encode it as a grayscale PNG.
pub fn normalize_captcha(bytes: &[u8]) -> ClaimResult<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ClaimError::Ocr(format!("undecodable captcha image: {e}")))?;
    let gray = img.grayscale();

    let mut buf = Vec::new();
    gray.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ClaimError::Ocr(format!("failed to encode captcha image: {e}")))?;
    Ok(buf)
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct OcrResponse {
    result: String,
}

/// Sends the captcha to an HTTP OCR service.
///
/// Request body is `{"image": "<base64 png>"}`, the answer `{"result": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpOcrSolver {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOcrSolver {
    pub fn new(endpoint: impl Into<String>) -> ClaimResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(OCR_TIMEOUT)
            .build()
            .map_err(|e| ClaimError::Ocr(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CaptchaSolver for HttpOcrSolver {
    async fn classify(&self, image: &[u8]) -> ClaimResult<String> {
        let png = normalize_captcha(image)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&OcrRequest { image: &encoded })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClaimError::Ocr(format!("OCR request failed: {e}")))?;
        let body: OcrResponse = response
            .json()
            .await
            .map_err(|e| ClaimError::Ocr(format!("malformed OCR response: {e}")))?;

        tracing::debug!("OCR service answered {:?}", body.result);
        Ok(body.result.trim().to_string())
    }
}

/// Saves the captcha to disk and asks the operator to read it.
#[derive(Debug, Clone)]
pub struct PromptSolver {
    image_path: PathBuf,
}

impl PromptSolver {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
        }
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// Write the normalized captcha where the operator can open it.
    pub fn save_image(&self, image: &[u8]) -> ClaimResult<()> {
        let png = normalize_captcha(image)?;
        std::fs::write(&self.image_path, png).map_err(|e| {
            ClaimError::Ocr(format!(
                "failed to write captcha to {}: {e}",
                self.image_path.display()
            ))
        })
    }
}

#[async_trait]
impl CaptchaSolver for PromptSolver {
    async fn classify(&self, image: &[u8]) -> ClaimResult<String> {
        self.save_image(image)?;
        let prompt = format!("Captcha saved to {}. Text: ", self.image_path.display());

        tokio::task::spawn_blocking(move || {
            let mut rl = rustyline::DefaultEditor::new()
                .map_err(|e| ClaimError::Ocr(format!("terminal unavailable: {e}")))?;
            match rl.readline(&prompt) {
                Ok(line) => Ok(line.trim().to_string()),
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    Err(ClaimError::Ocr("captcha entry cancelled".to_string()))
                }
                Err(e) => Err(ClaimError::Ocr(format!("failed to read captcha: {e}"))),
            }
        })
        .await
        .map_err(|e| ClaimError::Ocr(format!("captcha prompt aborted: {e}")))?
    }
}

/// The solver picked by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredSolver {
    Http(HttpOcrSolver),
    Prompt(PromptSolver),
}

impl ConfiguredSolver {
    /// The OCR service when an endpoint is set, otherwise the operator prompt.
    pub fn select(endpoint: Option<&str>, prompt_image: impl Into<PathBuf>) -> ClaimResult<Self> {
        match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
            Some(endpoint) => Ok(Self::Http(HttpOcrSolver::new(endpoint)?)),
            None => Ok(Self::Prompt(PromptSolver::new(prompt_image))),
        }
    }
}

#[async_trait]
impl CaptchaSolver for ConfiguredSolver {
    async fn classify(&self, image: &[u8]) -> ClaimResult<String> {
        match self {
            Self::Http(solver) => solver.classify(image).await,
            Self::Prompt(solver) => solver.classify(image).await,
        }
    }
}
