//! Keyword → URL interlinking of generated HTML

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

/// Keyword that should link to `url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterlinkRule {
    pub keyword: String,
    pub url: String,
}

impl InterlinkRule {
    pub fn new(keyword: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterlinkResult {
    pub html: String,
    /// Keywords that were linked, in rule order
    pub applied: Vec<String>,
}

/// Link the first occurrence of each rule's keyword
///
/// Only text outside tags, existing `<a>` elements, headings and
/// `<script>`/`<style>` is considered. Each keyword is linked at most once,
/// at most `max_links` links are added and rules whose URL is already
/// linked in the document are skipped.
pub fn apply_interlinking(html: &str, rules: &[InterlinkRule], max_links: usize) -> InterlinkResult {
    let mut html = html.to_string();
    let mut applied = Vec::new();
    let mut linked_urls = existing_hrefs(&html);

    for rule in rules {
        if applied.len() >= max_links {
            break;
        }
        let keyword = rule.keyword.trim();
        let url = rule.url.trim();
        if keyword.is_empty() || url.is_empty() {
            continue;
        }
        if linked_urls.contains(&normalize_href(url)) {
            debug!(keyword, url, "url already linked, skipping");
            continue;
        }
        let Some(pattern) = keyword_pattern(keyword) else {
            continue;
        };

        if let Some((start, end)) = find_in_text_nodes(&html, &pattern) {
            let anchor = format!(
                "<a href=\"{}\">{}</a>",
                escape_attr(url),
                &html[start..end]
            );
            html.replace_range(start..end, &anchor);
            linked_urls.insert(normalize_href(url));
            applied.push(keyword.to_string());
        }
    }

    InterlinkResult { html, applied }
}

fn keyword_pattern(keyword: &str) -> Option<Regex> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let starts_word = keyword.chars().next().is_some_and(is_word);
    let ends_word = keyword.chars().last().is_some_and(is_word);

    let pattern = format!(
        "{}{}{}",
        if starts_word { r"\b" } else { "" },
        regex::escape(keyword),
        if ends_word { r"\b" } else { "" }
    );
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

/// Elements whose text must never be linked
const SKIP_ELEMENTS: [&str; 9] = ["a", "h1", "h2", "h3", "h4", "h5", "h6", "script", "style"];

/// Byte range of the first match located in a linkable text node
fn find_in_text_nodes(html: &str, pattern: &Regex) -> Option<(usize, usize)> {
    let bytes = html.as_bytes();
    let mut depth = [0usize; SKIP_ELEMENTS.len()];
    let mut pos = 0;

    while pos < html.len() {
        if bytes[pos] == b'<' {
            let end = tag_end(html, pos);
            track_tag(&html[pos..end], &mut depth);
            pos = end;
            continue;
        }

        let text_end = html[pos..].find('<').map_or(html.len(), |i| pos + i);
        if depth.iter().all(|d| *d == 0) {
            let text = &html[pos..text_end];
            let entities: Vec<_> = entity_regex().find_iter(text).map(|e| e.range()).collect();
            // `&amp;` などの実体参照の内側は対象外
            let hit = pattern
                .find_iter(text)
                .find(|m| !entities.iter().any(|e| m.start() < e.end && e.start < m.end()));
            if let Some(m) = hit {
                return Some((pos + m.start(), pos + m.end()));
            }
        }
        pos = text_end;
    }
    None
}

/// End (exclusive) of the tag or comment starting at `start`
fn tag_end(html: &str, start: usize) -> usize {
    if html[start..].starts_with("<!--") {
        return html[start..]
            .find("-->")
            .map_or(html.len(), |i| start + i + 3);
    }
    html[start..].find('>').map_or(html.len(), |i| start + i + 1)
}

fn track_tag(tag: &str, depth: &mut [usize; SKIP_ELEMENTS.len()]) {
    let inner = tag.trim_start_matches('<');
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let name: String = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    let self_closing = tag.trim_end_matches('>').ends_with('/');

    if let Some(idx) = SKIP_ELEMENTS.iter().position(|e| *e == name) {
        if closing {
            depth[idx] = depth[idx].saturating_sub(1);
        } else if !self_closing {
            depth[idx] += 1;
        }
    }
}

fn entity_regex() -> &'static Regex {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    ENTITY.get_or_init(|| {
        Regex::new(r"&(?:[A-Za-z][A-Za-z0-9]*|#[0-9]+|#[xX][0-9A-Fa-f]+);")
            .expect("entity pattern is valid")
    })
}

fn href_regex() -> &'static Regex {
    static HREF: OnceLock<Regex> = OnceLock::new();
    HREF.get_or_init(|| {
        Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']*)["']"#)
            .expect("href pattern is valid")
    })
}

fn existing_hrefs(html: &str) -> HashSet<String> {
    href_regex()
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| normalize_href(m.as_str()))
        .collect()
}

fn normalize_href(url: &str) -> String {
    url.trim()
        .replace("&amp;", "&")
        .trim_end_matches('/')
        .to_lowercase()
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(pairs: &[(&str, &str)]) -> Vec<InterlinkRule> {
        pairs.iter().map(|(k, u)| InterlinkRule::new(*k, *u)).collect()
    }

    #[test]
    fn test_links_first_occurrence_case_insensitive() {
        let html = "<p>Green Tea is great. I love green tea.</p>";
        let result = apply_interlinking(html, &rules(&[("green tea", "https://a.com/tea")]), 3);
        assert_eq!(
            result.html,
            "<p><a href=\"https://a.com/tea\">Green Tea</a> is great. I love green tea.</p>"
        );
        assert_eq!(result.applied, vec!["green tea"]);
    }

    #[test]
    fn test_whole_words_only() {
        let html = "<p>teapot and tea</p>";
        let result = apply_interlinking(html, &rules(&[("tea", "https://a.com")]), 3);
        assert_eq!(result.html, "<p>teapot and <a href=\"https://a.com\">tea</a></p>");
    }

    #[test]
    fn test_skips_headings_anchors_and_attributes() {
        let html = concat!(
            "<h2>Coffee basics</h2>",
            "<p><a href=\"https://x.com\">coffee shop</a></p>",
            "<img alt=\"coffee\" src=\"c.png\">",
            "<p>Fresh coffee daily.</p>"
        );
        let result = apply_interlinking(html, &rules(&[("coffee", "https://b.com")]), 3);
        assert!(result.html.starts_with("<h2>Coffee basics</h2>"));
        assert!(result.html.contains("alt=\"coffee\""));
        assert!(result
            .html
            .ends_with("<p>Fresh <a href=\"https://b.com\">coffee</a> daily.</p>"));
    }

    #[test]
    fn test_max_links_and_already_linked_urls() {
        let html = "<p>alpha beta gamma <a href=\"https://d.com/\">delta</a></p>";
        let result = apply_interlinking(
            html,
            &rules(&[
                ("alpha", "https://a.com"),
                ("missing", "https://m.com"),
                ("gamma", "https://d.com"),
                ("beta", "https://b.com"),
                ("delta", "https://e.com"),
            ]),
            2,
        );
        assert_eq!(result.applied, vec!["alpha", "beta"]);
        assert!(!result.html.contains("<a href=\"https://d.com\">gamma"));
    }

    #[test]
    fn test_no_match_leaves_html_untouched() {
        let html = "<p>nothing here</p>";
        let result = apply_interlinking(html, &rules(&[("tea", "https://a.com")]), 3);
        assert_eq!(result.html, html);
        assert!(result.applied.is_empty());
    }

    #[test]
    fn test_character_references_are_not_split() {
        let html = "<p>Tom &amp; Jerry&nbsp;amp</p>";
        let result = apply_interlinking(html, &rules(&[("amp", "https://a.com")]), 3);
        assert_eq!(
            result.html,
            "<p>Tom &amp; Jerry&nbsp;<a href=\"https://a.com\">amp</a></p>"
        );

        let html = "<p>tea&nbsp;time &#8211; 5</p>";
        let result = apply_interlinking(
            html,
            &rules(&[("nbsp", "https://n.com"), ("8211", "https://d.com")]),
            3,
        );
        assert_eq!(result.html, html);
        assert!(result.applied.is_empty());
    }

    #[test]
    fn test_keyword_with_symbols() {
        let html = "<p>Learn C++ today</p>";
        let result = apply_interlinking(html, &rules(&[("c++", "https://cpp.com")]), 1);
        assert!(result.html.contains("<a href=\"https://cpp.com\">C++</a>"));
    }
}
