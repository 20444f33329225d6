//! A concrete [`Crawler`] over `reqwest` + a regex-based link extractor. The crawl-engine
//! internals are explicitly out of scope (spec.md's Non-goals); this is the minimal
//! default wiring so the binary runs without a third-party crawling SDK, swappable by
//! injecting a different `Crawler` at startup.

use async_trait::async_trait;
use pipeline_core::external::{CrawledPage, Crawler, ExternalServiceError};
use regex::Regex;
use std::time::Duration;
use url::Url;

pub struct HttpCrawler {
    client: reqwest::Client,
    link_pattern: Regex,
}

impl HttpCrawler {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .expect("reqwest client config is valid");
        // Matches `href="..."` / `href='...'` attributes; good enough for the same-origin
        // link discovery this stage needs without pulling in a full HTML parser.
        let link_pattern = Regex::new(r#"(?i)href\s*=\s*["']([^"'#]+)["']"#).unwrap();
        Self { client, link_pattern }
    }

    fn extract_links(&self, base: &Url, html: &str) -> Vec<String> {
        let mut links = Vec::new();
        for capture in self.link_pattern.captures_iter(html) {
            if let Some(href) = capture.get(1) {
                if let Ok(resolved) = base.join(href.as_str()) {
                    links.push(resolved.to_string());
                }
            }
        }
        links
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    async fn fetch_page(&self, url: &str) -> Result<CrawledPage, ExternalServiceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExternalServiceError::Service(format!("fetch {url} returned {status}")));
        }
        let body = response.text().await?;
        let base = Url::parse(url).map_err(|e| ExternalServiceError::Parse(e.to_string()))?;
        let links = self.extract_links(&base, &body);
        Ok(CrawledPage { url: url.to_string(), content: body, links })
    }
}

/// `true` when the URL or content-type names a PDF -- detection used by the crawler to pick
/// the PDF-extraction path over the HTML-crawl path (§4.4).
pub fn is_pdf(url: &str, content_type: Option<&str>) -> bool {
    url.to_lowercase().ends_with(".pdf") || content_type.map(|ct| ct.contains("application/pdf")).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_resolves_relative_links() {
        let crawler = HttpCrawler::new(Duration::from_secs(10), Duration::from_secs(30));
        let base = Url::parse("https://example.gov/notices/").unwrap();
        let html = r#"<a href="/about">About</a><a href='page2.html'>Next</a><a href="https://other.gov/x">Other</a>"#;
        let links = crawler.extract_links(&base, html);
        assert_eq!(links.len(), 3);
        assert!(links.contains(&"https://example.gov/about".to_string()));
        assert!(links.contains(&"https://example.gov/notices/page2.html".to_string()));
    }

    #[test]
    fn detects_pdf_by_extension_or_content_type() {
        assert!(is_pdf("https://example.gov/foo.PDF", None));
        assert!(is_pdf("https://example.gov/foo", Some("application/pdf; charset=binary")));
        assert!(!is_pdf("https://example.gov/foo.html", Some("text/html")));
    }
}
