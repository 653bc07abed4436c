use serde::{Deserialize, Serialize};

use super::ContentError;

/// LLM generated outline of an article
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBrief {
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub sections: Vec<String>,
}

impl ContentBrief {
    /// Parse a brief out of an LLM answer
    ///
    /// Accepts raw JSON, JSON inside a markdown code fence, or a JSON
    /// object embedded in prose (first `{` to last `}`).
    pub fn parse(text: &str) -> Result<Self, ContentError> {
        let json = extract_json_object(text)
            .ok_or_else(|| ContentError::InvalidBrief("no JSON object in response".to_string()))?;

        let mut brief: ContentBrief = serde_json::from_str(json)
            .map_err(|e| ContentError::InvalidBrief(e.to_string()))?;

        brief.title = brief.title.trim().to_string();
        brief.keywords = clean_list(brief.keywords);
        brief.sections = clean_list(brief.sections);

        if brief.title.is_empty() {
            return Err(ContentError::InvalidBrief("empty title".to_string()));
        }
        if brief.sections.is_empty() {
            return Err(ContentError::InvalidBrief("no sections".to_string()));
        }
        Ok(brief)
    }

    /// Primary keyword, falling back to the title
    pub fn focus_keyword(&self) -> &str {
        self.keywords.first().map(String::as_str).unwrap_or(&self.title)
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Locate the JSON object in an LLM answer
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let text = strip_code_fence(text.trim());
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````)
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // 言語タグ（```json, ```html）を読み飛ばす
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
