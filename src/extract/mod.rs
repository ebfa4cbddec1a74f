//! Attachment text extraction.
//!
//! Text-like attachments are decoded locally. Anything else (PDFs, images,
//! office documents) goes to LlamaParse when `LLAMA_CLOUD_API_KEY` is set.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::email::strip_html;
use crate::channels::Attachment;
use crate::config::env_lookup;
use crate::error::ExtractError;

/// Turns an attachment into plain text for the decision engine.
#[async_trait]
pub trait AttachmentExtractor: Send + Sync {
    async fn extract(&self, attachment: &Attachment) -> Result<String, ExtractError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextKind {
    Plain,
    Html,
}

fn text_kind(attachment: &Attachment) -> Option<TextKind> {
    let ctype = attachment.content_type.to_ascii_lowercase();
    let ext = attachment
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if ctype.starts_with("text/html") || matches!(ext.as_str(), "html" | "htm") {
        return Some(TextKind::Html);
    }
    if ctype.starts_with("text/")
        || ctype == "application/csv"
        || ctype == "application/json"
        || matches!(ext.as_str(), "txt" | "md" | "markdown" | "csv" | "json")
    {
        return Some(TextKind::Plain);
    }
    None
}

/// Decodes text, markdown, CSV, JSON and HTML attachments as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl AttachmentExtractor for PlainTextExtractor {
    async fn extract(&self, attachment: &Attachment) -> Result<String, ExtractError> {
        let kind = text_kind(attachment).ok_or_else(|| ExtractError::Unsupported {
            filename: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
        })?;

        let text = std::str::from_utf8(&attachment.data).map_err(|e| ExtractError::Corrupt {
            filename: attachment.filename.clone(),
            reason: e.to_string(),
        })?;

        Ok(match kind {
            TextKind::Plain => text.to_string(),
            TextKind::Html => strip_html(text),
        })
    }
}

pub const LLAMA_PARSE_URL: &str = "https://api.cloud.llamaindex.ai/api/parsing";

#[derive(Debug, Deserialize)]
struct JobStatus {
    id: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct MarkdownResult {
    markdown: String,
}

/// Remote extraction through the LlamaParse REST API.
///
/// Uploads the file, polls the job until it finishes, then fetches the
/// markdown result.
pub struct LlamaParseExtractor {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl LlamaParseExtractor {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: LLAMA_PARSE_URL.to_string(),
            poll_interval: Duration::from_secs(2),
            max_polls: 90,
        }
    }

    /// Build from `LLAMA_CLOUD_API_KEY`; `None` when it is not set.
    pub fn from_env() -> Option<Self> {
        env_lookup("LLAMA_CLOUD_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .map(|k| Self::new(SecretString::from(k)))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    fn remote_err(filename: &str, reason: impl Into<String>) -> ExtractError {
        ExtractError::Remote {
            filename: filename.to_string(),
            reason: reason.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        filename: &str,
    ) -> Result<T, ExtractError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Self::remote_err(filename, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::remote_err(filename, format!("{status}: {body}")));
        }
        resp.json()
            .await
            .map_err(|e| Self::remote_err(filename, e.to_string()))
    }
}

#[async_trait]
impl AttachmentExtractor for LlamaParseExtractor {
    async fn extract(&self, attachment: &Attachment) -> Result<String, ExtractError> {
        let filename = attachment.filename.as_str();
        let part = Part::bytes(attachment.data.clone())
            .file_name(filename.to_string())
            .mime_str(&attachment.content_type)
            .map_err(|e| Self::remote_err(filename, e.to_string()))?;
        let form = Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/upload", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::remote_err(filename, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::remote_err(filename, format!("upload {status}: {body}")));
        }
        let job: JobStatus = resp
            .json()
            .await
            .map_err(|e| Self::remote_err(filename, e.to_string()))?;
        tracing::debug!(filename, job_id = %job.id, "LlamaParse job submitted");

        let job_url = format!("{}/job/{}", self.base_url, job.id);
        let mut polls = 0;
        loop {
            let status: JobStatus = self.get_json(&job_url, filename).await?;
            match status.status.as_str() {
                "SUCCESS" => break,
                "ERROR" | "CANCELED" => {
                    return Err(Self::remote_err(
                        filename,
                        format!("job {} ended with {}", job.id, status.status),
                    ));
                }
                _ => {}
            }
            polls += 1;
            if polls >= self.max_polls {
                return Err(Self::remote_err(filename, "timed out waiting for job"));
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let result: MarkdownResult = self
            .get_json(&format!("{job_url}/result/markdown"), filename)
            .await?;
        tracing::info!(filename, chars = result.markdown.len(), "Attachment extracted remotely");
        Ok(result.markdown)
    }
}

/// Local extraction first, remote for whatever it does not support.
pub struct ExtractorChain {
    local: PlainTextExtractor,
    remote: Option<Box<dyn AttachmentExtractor>>,
}

impl ExtractorChain {
    pub fn local_only() -> Self {
        Self {
            local: PlainTextExtractor,
            remote: None,
        }
    }

    pub fn with_remote(remote: Box<dyn AttachmentExtractor>) -> Self {
        Self {
            local: PlainTextExtractor,
            remote: Some(remote),
        }
    }

    /// LlamaParse when `LLAMA_CLOUD_API_KEY` is set, local only otherwise.
    pub fn from_env() -> Self {
        match LlamaParseExtractor::from_env() {
            Some(remote) => {
                tracing::info!("Remote attachment extraction enabled (LlamaParse)");
                Self::with_remote(Box::new(remote))
            }
            None => Self::local_only(),
        }
    }
}

#[async_trait]
impl AttachmentExtractor for ExtractorChain {
    async fn extract(&self, attachment: &Attachment) -> Result<String, ExtractError> {
        let local = self.local.extract(attachment).await;
        match (&self.remote, local) {
            (Some(remote), Err(ExtractError::Unsupported { .. })) => {
                remote.extract(attachment).await
            }
            (_, result) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(filename: &str, content_type: &str, data: &[u8]) -> Attachment {
        Attachment {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn plain_text_and_csv_pass_through() {
        let ex = PlainTextExtractor;
        let csv = attachment("items.csv", "application/octet-stream", b"item,amount\nrent,1200\n");
        assert_eq!(ex.extract(&csv).await.unwrap(), "item,amount\nrent,1200\n");

        let txt = attachment("note", "text/plain; charset=utf-8", "Faktura №42".as_bytes());
        assert_eq!(ex.extract(&txt).await.unwrap(), "Faktura №42");
    }

    #[tokio::test]
    async fn html_is_stripped() {
        let ex = PlainTextExtractor;
        let html = attachment("bill.html", "text/html", b"<p>Total: <b>$99</b></p>");
        let text = ex.extract(&html).await.unwrap();
        assert!(text.contains("Total:"));
        assert!(text.contains("$99"));
        assert!(!text.contains('<'));
    }

    #[tokio::test]
    async fn pdf_is_unsupported_locally() {
        let ex = PlainTextExtractor;
        let pdf = attachment("invoice.pdf", "application/pdf", b"%PDF-1.7");
        assert!(matches!(
            ex.extract(&pdf).await,
            Err(ExtractError::Unsupported { filename, .. }) if filename == "invoice.pdf"
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_is_corrupt() {
        let ex = PlainTextExtractor;
        let bad = attachment("notes.txt", "text/plain", &[0xff, 0xfe, 0x00]);
        assert!(matches!(ex.extract(&bad).await, Err(ExtractError::Corrupt { .. })));
    }

    struct FixedRemote;

    #[async_trait]
    impl AttachmentExtractor for FixedRemote {
        async fn extract(&self, attachment: &Attachment) -> Result<String, ExtractError> {
            Ok(format!("# {}", attachment.filename))
        }
    }

    #[tokio::test]
    async fn chain_falls_back_to_remote_only_for_unsupported() {
        let chain = ExtractorChain::with_remote(Box::new(FixedRemote));
        let pdf = attachment("invoice.pdf", "application/pdf", b"%PDF-1.7");
        assert_eq!(chain.extract(&pdf).await.unwrap(), "# invoice.pdf");

        let bad = attachment("notes.txt", "text/plain", &[0xff]);
        assert!(matches!(chain.extract(&bad).await, Err(ExtractError::Corrupt { .. })));

        let local = ExtractorChain::local_only();
        assert!(local.extract(&pdf).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_remote_reports_remote_error() {
        let ex = LlamaParseExtractor::new(SecretString::from("llx-test"))
            .with_base_url("http://127.0.0.1:9")
            .with_polling(Duration::from_millis(1), 1);
        let pdf = attachment("invoice.pdf", "application/pdf", b"%PDF-1.7");
        assert!(matches!(ex.extract(&pdf).await, Err(ExtractError::Remote { .. })));
    }
}
