//! Page text cleanup (§4.4): "strip navigation, footers, markdown links, short or low-alpha
//! lines, duplicate consecutive lines."

use regex::Regex;

const MIN_LINE_LEN: usize = 20;
const MIN_ALPHA_RATIO: f64 = 0.4;

const NAV_KEYWORDS: &[&str] = &["skip to content", "skip to main", "home |", "menu", "breadcrumb", "all rights reserved", "copyright ©"];

fn markdown_link_pattern() -> Regex {
    Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap()
}

fn alpha_ratio(line: &str) -> f64 {
    let total = line.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    let alpha = line.chars().filter(|c| c.is_alphabetic()).count();
    alpha as f64 / total as f64
}

fn looks_like_navigation_or_footer(line: &str) -> bool {
    let lower = line.to_lowercase();
    NAV_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

pub fn clean_page_text(raw_html: &str) -> String {
    let without_tags = strip_tags(raw_html);
    let markdown_links = markdown_link_pattern();

    let mut cleaned_lines: Vec<String> = Vec::new();
    let mut previous_line: Option<String> = None;

    for line in without_tags.lines() {
        let line = markdown_links.replace_all(line.trim(), "$1").trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line.len() < MIN_LINE_LEN {
            continue;
        }
        if alpha_ratio(&line) < MIN_ALPHA_RATIO {
            continue;
        }
        if looks_like_navigation_or_footer(&line) {
            continue;
        }
        if previous_line.as_deref() == Some(line.as_str()) {
            continue;
        }
        previous_line = Some(line.clone());
        cleaned_lines.push(line);
    }

    cleaned_lines.join("\n")
}

fn strip_tags(html: &str) -> String {
    let tag_pattern = Regex::new(r"(?s)<script.*?</script>|<style.*?</style>|<[^>]+>").unwrap();
    tag_pattern.replace_all(html, "\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_short_and_low_alpha_lines() {
        let html = "<p>This is a genuinely long and informative paragraph about civic services.</p><p>123456</p>";
        let cleaned = clean_page_text(html);
        assert!(cleaned.contains("genuinely long and informative"));
        assert!(!cleaned.contains("123456"));
    }

    #[test]
    fn drops_duplicate_consecutive_lines() {
        let html = "<p>This line repeats exactly across the whole document body.</p><p>This line repeats exactly across the whole document body.</p>";
        let cleaned = clean_page_text(html);
        assert_eq!(cleaned.lines().count(), 1);
    }

    #[test]
    fn collapses_markdown_links_to_their_text() {
        let html = "<p>Read the [grievance policy](https://example.gov/policy) before filing.</p>";
        let cleaned = clean_page_text(html);
        assert!(cleaned.contains("Read the grievance policy before filing"));
        assert!(!cleaned.contains("https://"));
    }

    #[test]
    fn drops_navigation_boilerplate() {
        let html = "<nav>Skip to main content navigation area for this page</nav><p>Actual civic content describing road repairs.</p>";
        let cleaned = clean_page_text(html);
        assert!(!cleaned.to_lowercase().contains("skip to main"));
        assert!(cleaned.contains("road repairs"));
    }
}
