//! Content extraction.
//!
//! Turns an upload (raw text, PDF bytes, or a remote URL) into UTF-8
//! Markdown-ish text ready for chunking. Dispatch table:
//!
//! | kind | behavior |
//! |------|----------|
//! | text | UTF-8 decode, strip `![alt](url)` image links |
//! | pdf  | PDF → Markdown text, pages separated by a blank line |
//! | url  | HTTP GET; PDF responses go through the pdf path, anything else HTML → Markdown |
//!
//! No retries happen here; a typed [`ExtractError`] surfaces to the caller,
//! which decides (the ingestion pipeline turns it into an SSE `error` frame
//! before anything is persisted).

use std::time::Duration;

/// Input kind accepted by the extractor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Pdf,
    Url,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("content is not valid UTF-8")]
    InvalidUtf8,
    #[error("failed to extract PDF content")]
    Pdf,
    #[error("url is required for url resources")]
    MissingUrl,
    #[error("failed to fetch url: {0}")]
    Fetch(String),
    #[error("fetch returned status {0}")]
    FetchStatus(u16),
    #[error("extracted content is empty")]
    Empty,
}

/// Stateless extraction dispatcher holding the HTTP client for URL fetches.
pub struct Extractor {
    client: reqwest::Client,
}

impl Extractor {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Extract text for `kind`. `url` is only consulted for [`ContentKind::Url`].
    pub async fn extract(
        &self,
        kind: ContentKind,
        raw: &[u8],
        url: Option<&str>,
    ) -> Result<String, ExtractError> {
        let text = match kind {
            ContentKind::Text => extract_text(raw)?,
            ContentKind::Pdf => extract_pdf(raw)?,
            ContentKind::Url => {
                let url = url.ok_or(ExtractError::MissingUrl)?;
                self.extract_url(url).await?
            }
        };
        if text.trim().is_empty() {
            return Err(ExtractError::Empty);
        }
        Ok(text)
    }

    async fn extract_url(&self, url: &str) -> Result<String, ExtractError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::FetchStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let path = response.url().path().to_string();

        if is_pdf_response(content_type.as_deref(), &path) {
            let body = response
                .bytes()
                .await
                .map_err(|e| ExtractError::Fetch(e.to_string()))?;
            tracing::debug!(url, bytes = body.len(), "fetched remote PDF");
            return extract_pdf(&body);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExtractError::Fetch(e.to_string()))?;
        tracing::debug!(url, bytes = body.len(), "fetched remote page");
        Ok(html2md::parse_html(&body))
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// UTF-8 decode with image-link stripping.
pub fn extract_text(raw: &[u8]) -> Result<String, ExtractError> {
    let text = std::str::from_utf8(raw).map_err(|_| ExtractError::InvalidUtf8)?;
    Ok(strip_image_links(text))
}

/// PDF bytes to Markdown-ish text. The library already separates pages
/// with blank lines; the result is trimmed but otherwise untouched.
pub fn extract_pdf(raw: &[u8]) -> Result<String, ExtractError> {
    match pdf_extract::extract_text_from_mem(raw) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(err) => {
            tracing::debug!(error = %err, "PDF extraction failed");
            Err(ExtractError::Pdf)
        }
    }
}

/// Whether a fetched response should be treated as a PDF document.
fn is_pdf_response(content_type: Option<&str>, path: &str) -> bool {
    if let Some(ct) = content_type {
        if ct.split(';').next().unwrap_or("").trim() == "application/pdf" {
            return true;
        }
    }
    path.to_ascii_lowercase().ends_with(".pdf")
}

/// Remove Markdown image links (`![alt](url)`) from `text`.
///
/// Image payloads are useless to the index and their URLs pollute both
/// chunking and retrieval. Regular links are kept.
pub fn strip_image_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("![") {
        let (before, candidate) = rest.split_at(start);
        out.push_str(before);
        match image_link_len(candidate) {
            Some(len) => rest = &candidate[len..],
            None => {
                out.push_str("![");
                rest = &candidate[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte length of the image link at the start of `s` (which begins `![`),
/// or `None` when the pattern never closes.
fn image_link_len(s: &str) -> Option<usize> {
    let alt_end = s.find(']')?;
    let after = &s[alt_end + 1..];
    if !after.starts_with('(') {
        return None;
    }
    let url_end = after.find(')')?;
    Some(alt_end + 1 + url_end + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_a_single_image_link() {
        assert_eq!(
            strip_image_links("before ![diagram](http://x/a.png) after"),
            "before  after"
        );
    }

    #[test]
    fn strips_multiple_image_links() {
        assert_eq!(
            strip_image_links("![a](u1)middle![b](u2)"),
            "middle"
        );
    }

    #[test]
    fn keeps_regular_links() {
        let text = "see [the docs](http://x/docs) for details";
        assert_eq!(strip_image_links(text), text);
    }

    #[test]
    fn keeps_unclosed_image_markers() {
        assert_eq!(strip_image_links("a ![dangling"), "a ![dangling");
        assert_eq!(strip_image_links("a ![alt] no paren"), "a ![alt] no paren");
    }

    #[test]
    fn strip_is_noop_on_plain_text() {
        assert_eq!(strip_image_links("hello world"), "hello world");
    }

    #[test]
    fn text_extraction_rejects_invalid_utf8() {
        assert!(matches!(
            extract_text(&[0xff, 0xfe, 0x00]),
            Err(ExtractError::InvalidUtf8)
        ));
    }

    #[test]
    fn text_extraction_strips_images() {
        let out = extract_text("hello ![x](y) world".as_bytes()).unwrap();
        assert_eq!(out, "hello  world");
    }

    #[test]
    fn garbage_pdf_yields_typed_error() {
        let err = extract_pdf(b"not a pdf").unwrap_err();
        assert_eq!(err.to_string(), "failed to extract PDF content");
    }

    #[test]
    fn pdf_response_detection() {
        assert!(is_pdf_response(Some("application/pdf"), "/doc"));
        assert!(is_pdf_response(Some("application/pdf; charset=binary"), "/doc"));
        assert!(is_pdf_response(None, "/files/report.PDF"));
        assert!(!is_pdf_response(Some("text/html"), "/files/report"));
    }

    #[tokio::test]
    async fn url_extraction_converts_html_to_markdown() {
        use axum::routing::get;

        let app = axum::Router::new().route(
            "/page",
            get(|| async { axum::response::Html("<h1>Title</h1><p>hello world</p>") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let extractor = Extractor::new();
        let text = extractor
            .extract(ContentKind::Url, &[], Some(&format!("http://{addr}/page")))
            .await
            .unwrap();
        assert!(text.contains("Title"), "{text}");
        assert!(text.contains("hello world"), "{text}");
    }

    #[tokio::test]
    async fn url_extraction_surfaces_http_errors() {
        let app = axum::Router::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let extractor = Extractor::new();
        let err = extractor
            .extract(ContentKind::Url, &[], Some(&format!("http://{addr}/missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::FetchStatus(404)));
    }

    #[tokio::test]
    async fn url_extraction_requires_a_url() {
        let extractor = Extractor::new();
        assert!(matches!(
            extractor.extract(ContentKind::Url, &[], None).await,
            Err(ExtractError::MissingUrl)
        ));
    }

    #[tokio::test]
    async fn empty_extraction_is_an_error() {
        let extractor = Extractor::new();
        let err = extractor
            .extract(ContentKind::Text, b"   ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Empty));
    }
}
