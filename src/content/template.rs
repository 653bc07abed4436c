//! Prompt templates
//!
//! `{name}` をプレースホルダーとして置換する。`{{` / `}}` はリテラルの波括弧。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ContentError;

/// Named prompt template, overridable through the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            updated_at: Utc::now(),
        }
    }

    /// Built-in template by name (`brief`, `article`, `meta`, `image`)
    pub fn builtin(name: &str) -> Option<Self> {
        let body = match name {
            BRIEF => BRIEF_TEMPLATE,
            ARTICLE => ARTICLE_TEMPLATE,
            META => META_TEMPLATE,
            IMAGE => IMAGE_TEMPLATE,
            _ => return None,
        };
        Some(Self::new(name, body))
    }

    pub fn builtin_names() -> [&'static str; 4] {
        [BRIEF, ARTICLE, META, IMAGE]
    }

    /// Placeholder names used by the template, in order of first appearance
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        for segment in parse(&self.body) {
            if let Segment::Var(name) = segment {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    pub fn render(&self, vars: &HashMap<&str, String>) -> Result<String, ContentError> {
        let mut out = String::with_capacity(self.body.len());
        for segment in parse(&self.body) {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(name) => match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => return Err(ContentError::MissingVariable(name.to_string())),
                },
            }
        }
        Ok(out)
    }
}

pub const BRIEF: &str = "brief";
pub const ARTICLE: &str = "article";
pub const META: &str = "meta";
pub const IMAGE: &str = "image";

const BRIEF_TEMPLATE: &str = r#"Prepare a content brief for a blog article about "{topic}".
Write in {language}.
Respond with a single JSON object only:
{{"title": "...", "keywords": ["..."], "target_audience": "...", "sections": ["..."]}}
Use 3-6 keywords and 4-8 section headings."#;

const ARTICLE_TEMPLATE: &str = r#"Write a complete blog article in {language} as HTML.
Title: {title}
Target audience: {audience}
Keywords to use naturally: {keywords}
Sections (use <h2> for each):
{sections}

Use <p>, <h2>, <h3>, <ul> and <li> only. Do not include <html>, <head>, <body> or the title itself."#;

const META_TEMPLATE: &str = r#"Write SEO meta tags in {language} for the article "{title}".
Article excerpt:
{excerpt}

Respond with a single JSON object only:
{{"meta_title": "max 60 characters", "meta_description": "max 160 characters", "focus_keyword": "..."}}"#;

const IMAGE_TEMPLATE: &str = r#"Photorealistic featured image for a blog article titled "{title}", themed around: {keywords}. No text, no logos, no watermarks."#;

enum Segment<'a> {
    Text(&'a str),
    Var(&'a str),
}

fn is_var_char(c: u8) -> bool {
    c.is_ascii_lowercase() || c == b'_'
}

/// Split the body into literal text and placeholders
fn parse(body: &str) -> Vec<Segment<'_>> {
    let bytes = body.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                segments.push(Segment::Text(&body[start..i]));
                segments.push(Segment::Text("{"));
                i += 2;
                start = i;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                segments.push(Segment::Text(&body[start..i]));
                segments.push(Segment::Text("}"));
                i += 2;
                start = i;
            }
            b'{' => {
                let name_len = bytes[i + 1..].iter().take_while(|c| is_var_char(**c)).count();
                let close = i + 1 + name_len;
                if name_len > 0 && bytes.get(close) == Some(&b'}') {
                    segments.push(Segment::Text(&body[start..i]));
                    segments.push(Segment::Var(&body[i + 1..close]));
                    i = close + 1;
                    start = i;
                } else {
                    // プレースホルダーでなければそのまま出力
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    segments.push(Segment::Text(&body[start..]));
    segments
}
