//! Full research path (§4.6 step 3): four category-conditioned search slots, per-result
//! validation, and summarization.

use pipeline_core::external::{ExternalServiceError, TextAnalyzer, WebSearchResult, WebSearchService};

const SEARCH_SLOTS: &[&str] = &["government schemes", "budget allocation", "development plans", "local resources"];
const MIN_RELEVANCE: f64 = 0.5;
const MIN_CONTENT_LEN: usize = 100;
const RESULTS_PER_SLOT: u32 = 3;

pub struct ResearchReport {
    pub summary: String,
    pub sources: Vec<String>,
}

/// Crude lexical overlap between the query and a result's title+snippet -- the original
/// search APIs return their own relevance score; the opaque `WebSearchService` trait here
/// doesn't carry one, so this stands in for it.
fn relevance_score(query: &str, result: &WebSearchResult) -> f64 {
    let query_words: std::collections::HashSet<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {}", result.title, result.snippet).to_lowercase();
    let hits = query_words.iter().filter(|w| haystack.contains(w.as_str())).count();
    hits as f64 / query_words.len() as f64
}

fn is_valid_result(query: &str, result: &WebSearchResult) -> bool {
    url::Url::parse(&result.url).is_ok()
        && relevance_score(query, result) >= MIN_RELEVANCE
        && result.snippet.len() >= MIN_CONTENT_LEN
        && result.title.trim().len() > 3
}

pub async fn run_full_research(
    category: &str,
    location: &str,
    web_search: &dyn WebSearchService,
    text_analyzer: &dyn TextAnalyzer,
) -> Result<ResearchReport, ExternalServiceError> {
    let mut valid_results: Vec<WebSearchResult> = Vec::new();

    for slot in SEARCH_SLOTS {
        let query = format!("{category} {slot} {location}");
        let results = web_search.search(&query, RESULTS_PER_SLOT).await?;
        valid_results.extend(results.into_iter().filter(|r| is_valid_result(&query, r)));
    }

    let sources: Vec<String> = valid_results.iter().map(|r| r.url.clone()).collect();

    if valid_results.is_empty() {
        return Ok(ResearchReport { summary: format!("No validated sources found for {category} in {location}."), sources });
    }

    let corpus: String = valid_results
        .iter()
        .map(|r| format!("- {}: {}\n  {}", r.title, r.url, r.snippet))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "Summarize the following sources into a short research report about {category} grievances in {location}. Focus on applicable schemes, budget, development plans, and resources."
    );
    let summary = text_analyzer.analyze(&prompt, &corpus).await?;

    Ok(ResearchReport { summary, sources })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str, title: &str, snippet: &str) -> WebSearchResult {
        WebSearchResult { title: title.to_string(), url: url.to_string(), snippet: snippet.to_string() }
    }

    #[test]
    fn rejects_malformed_url() {
        let r = result("not-a-url", "Sanitation budget scheme", &"x".repeat(150));
        assert!(!is_valid_result("sanitation budget scheme", &r));
    }

    #[test]
    fn rejects_short_content() {
        let r = result("https://example.gov/x", "Sanitation budget scheme", "too short");
        assert!(!is_valid_result("sanitation budget scheme", &r));
    }

    #[test]
    fn rejects_low_relevance() {
        let r = result("https://example.gov/x", "Completely unrelated page", &"filler text ".repeat(20));
        assert!(!is_valid_result("sanitation budget scheme", &r));
    }

    #[test]
    fn accepts_well_formed_relevant_result() {
        let snippet = format!("Details about the sanitation budget scheme rollout. {}", "context ".repeat(15));
        let r = result("https://example.gov/sanitation-budget-scheme", "Sanitation Budget Scheme", &snippet);
        assert!(is_valid_result("sanitation budget scheme", &r));
    }
}
