//! The tagged document model and its validator.
//!
//! The source corpus uses per-kind class inheritance over a common
//! `BaseDocument`. Here the common envelope and the kind tag live together
//! on one struct, and kind-specific shape is enforced by the validator
//! rather than by distinct Rust types — this keeps indexing and chunking
//! code, which only ever needs the envelope plus a handful of metadata
//! keys, from having to match on eleven separate structs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::ValidationError;

/// The discriminant tag. Eleven kinds; some upstream model definitions omit
/// `Statistics`, but the richer eleven-kind set is authoritative here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Statute,
    Case,
    Procedure,
    Template,
    Manual,
    CaseType,
    SentencingGuideline,
    Faq,
    KeywordMapping,
    StyleIssue,
    Statistics,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Statute => "statute",
            DocumentKind::Case => "case",
            DocumentKind::Procedure => "procedure",
            DocumentKind::Template => "template",
            DocumentKind::Manual => "manual",
            DocumentKind::CaseType => "case_type",
            DocumentKind::SentencingGuideline => "sentencing_guideline",
            DocumentKind::Faq => "faq",
            DocumentKind::KeywordMapping => "keyword_mapping",
            DocumentKind::StyleIssue => "style_issue",
            DocumentKind::Statistics => "statistics",
        }
    }

    /// The kind-specific metadata keys that must be present for the
    /// validator to accept a document of this kind.
    fn required_metadata_keys(&self) -> &'static [&'static str] {
        match self {
            DocumentKind::Statute => &["law_name", "article_number"],
            DocumentKind::Case => &["court", "year", "holding"],
            DocumentKind::Procedure => &["steps"],
            DocumentKind::Template => &["fields"],
            DocumentKind::Manual => &["section"],
            DocumentKind::CaseType => &["category_code"],
            DocumentKind::SentencingGuideline => &["crime_type"],
            DocumentKind::Faq => &["question", "answer"],
            DocumentKind::KeywordMapping => &["canonical_term"],
            DocumentKind::StyleIssue => &["issue_type"],
            DocumentKind::Statistics => &["domain", "source", "date", "crime_category_main"],
        }
    }
}

/// `content` is either a textual body or an ordered list of strings
/// (templates, keyword mappings).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    List(Vec<String>),
}

impl Content {
    pub fn is_empty_trimmed(&self) -> bool {
        match self {
            Content::Text(s) => s.trim().is_empty(),
            Content::List(items) => items.iter().all(|s| s.trim().is_empty()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            Content::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Content::Text(_) => None,
            Content::List(items) => Some(items),
        }
    }

    /// Flattened textual representation, used by the default chunker and
    /// by context assembly when the variant doesn't matter.
    pub fn joined(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::List(items) => items.join("\n"),
        }
    }
}

/// The common envelope every document carries, tagged by `kind`. There is no
/// virtual class hierarchy — a flat enum tag plus per-kind metadata keys.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Document {
    pub id: String,
    pub category: String,
    pub sub_category: String,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub title: String,
    pub content: Content,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Document {
    /// Non-empty id, non-empty content, and complete kind-specific metadata.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id".into()));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title".into()));
        }
        if self.content.is_empty_trimmed() {
            return Err(ValidationError::EmptyContent);
        }
        for key in self.kind.required_metadata_keys() {
            if !self.metadata.contains_key(*key) {
                return Err(ValidationError::IncompleteMetadata {
                    kind: self.kind.as_str().to_string(),
                    field: key.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}
