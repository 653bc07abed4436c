//! Content generation
//!
//! ペルソナ、プロンプトテンプレート、ブリーフ、記事生成、内部リンク。

pub mod brief;
pub mod generator;
pub mod interlink;
pub mod persona;
pub mod template;

pub use brief::ContentBrief;
pub use generator::{truncate_chars, Article, ContentGenerator, GeneratedPost, MetaTags};
pub use interlink::{apply_interlinking, InterlinkResult, InterlinkRule};
pub use persona::Persona;
pub use template::PromptTemplate;

use thiserror::Error;

/// コンテンツ生成エラー
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Template variable '{0}' is missing")]
    MissingVariable(String),

    #[error("Unknown prompt template '{0}'")]
    UnknownTemplate(String),

    #[error("Invalid brief: {0}")]
    InvalidBrief(String),

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
}
