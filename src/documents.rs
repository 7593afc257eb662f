//! Reference documents pinned to a conversation
//!
//! A session can carry one context turn built from web pages (paragraph text
//! only) or from text the caller supplies. The context turn sits outside the
//! conversation log, so no memory policy ever counts, drops or summarizes it.

use crate::error::MemoryError;
use crate::memory::{Role, Turn};
use crate::Result;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{info, warn};

/// Lead-in for the pinned system turn
pub const CONTEXT_PREAMBLE: &str =
    "Answer the user's questions using the following reference documents:";

/// Fetches web pages and keeps their paragraph text
pub struct WebpageReader {
    client: Client,
}

impl WebpageReader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("chat-memory/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// Fetch one page and return the text of its `<p>` elements
    pub async fn read(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MemoryError::Document(format!("Error reading webpage from {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MemoryError::Document(format!(
                "Error reading webpage from {}: HTTP {}",
                url, status
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| MemoryError::Document(format!("Error reading webpage from {}: {}", url, e)))?;

        let text = extract_paragraphs(&html)?;
        if text.is_empty() {
            return Err(MemoryError::Document(format!(
                "No paragraph text found at {}",
                url
            )));
        }

        info!(%url, chars = text.len(), "Webpage loaded");
        Ok(text)
    }

    /// Fetch every page, skipping the ones that fail. At least one page must
    /// load; the documents are joined with a blank line between them.
    pub async fn read_all(&self, urls: &[String]) -> Result<String> {
        let mut documents = Vec::with_capacity(urls.len());
        let mut last_error = None;

        for url in urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            match self.read(url).await {
                Ok(text) => documents.push(text),
                Err(e) => {
                    warn!(%url, "Skipping document: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if documents.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                MemoryError::Document("At least one document URL is required".to_string())
            }));
        }

        Ok(combine_documents(&documents))
    }
}

/// Paragraph text of an HTML page, paragraphs separated by a space
pub fn extract_paragraphs(html: &str) -> Result<String> {
    let selector =
        Selector::parse("p").map_err(|e| MemoryError::Document(format!("Bad selector: {}", e)))?;
    let page = Html::parse_document(html);

    let paragraphs: Vec<String> = page
        .select(&selector)
        .map(|p| p.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect();

    Ok(paragraphs.join(" "))
}

pub fn combine_documents(documents: &[String]) -> String {
    documents
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The pinned system turn for `document`. Blank documents are rejected.
pub fn context_turn(document: &str) -> Result<Turn> {
    if document.trim().is_empty() {
        return Err(MemoryError::InvalidTurn(
            "context document must not be empty".to_string(),
        ));
    }
    Turn::new(Role::System, format!("{}\n\n{}", CONTEXT_PREAMBLE, document.trim()))
}
