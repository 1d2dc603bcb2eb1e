//! Type-aware document chunking.
//!
//! Structured the way the source's `ContentChunker` dispatches by kind,
//! generalized from the original's single-chunker-per-type Python file
//! (`rag/chunker.py`) into per-kind policies: article-marker splitting
//! for statutes, header detection for cases, and a sentence-boundary
//! fallback for the generic path.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::document::{Content, Document, DocumentKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub split_statute_by_items: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            split_statute_by_items: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Overview,
    Summary,
    Reasoning,
    Reference,
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub parent_id: String,
    pub chunk_index: usize,
    pub parent_kind: DocumentKind,
    pub article_number: Option<String>,
    pub article_num: Option<String>,
    pub sub_article: Option<String>,
    pub item_number: Option<String>,
    pub is_header: bool,
    pub section_type: Option<SectionType>,
}

impl Chunk {
    fn base(parent_id: &str, parent_kind: DocumentKind, chunk_index: usize, text: String) -> Self {
        Self {
            text,
            parent_id: parent_id.to_string(),
            chunk_index,
            parent_kind,
            article_number: None,
            article_num: None,
            sub_article: None,
            item_number: None,
            is_header: false,
            section_type: None,
        }
    }

    /// Vector-store id derived as `parent_id + "_chunk_" + chunk_index`.
    pub fn store_id(&self) -> String {
        format!("{}_chunk_{}", self.parent_id, self.chunk_index)
    }
}

static ARTICLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"제(\d+)조(?:의(\d+))?").unwrap());
static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[①-⑳]|\(\d+\)").unwrap());
static BRACKET_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^【([^】]+)】").unwrap());
static NUMBERED_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)\.\s*(.+)$").unwrap());
static COLON_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^(.{1,30}):\s*$").unwrap());

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        match document.kind {
            DocumentKind::Statute => self.chunk_statute(document),
            DocumentKind::Case => self.chunk_case(document),
            DocumentKind::Template => self.chunk_template(document),
            _ => self.chunk_default(document),
        }
    }

    fn chunk_statute(&self, document: &Document) -> Vec<Chunk> {
        let Some(text) = document.content.as_text() else {
            return self.chunk_default(document);
        };

        let matches: Vec<_> = ARTICLE_RE.find_iter(text).collect();
        if matches.is_empty() {
            return self.chunk_default(document);
        }

        let mut chunks = Vec::new();
        let mut index = 0usize;
        for (i, m) in matches.iter().enumerate() {
            let start = m.start();
            let end = matches.get(i + 1).map(|n| n.start()).unwrap_or(text.len());
            let body = text[start..end].trim();
            if body.is_empty() {
                continue;
            }
            let caps = ARTICLE_RE.captures(&text[start..m.end()]).unwrap();
            let article_num = caps.get(1).map(|c| c.as_str().to_string());
            let sub_article = caps.get(2).map(|c| c.as_str().to_string());
            let article_number = format!(
                "제{}조{}",
                article_num.clone().unwrap_or_default(),
                sub_article
                    .as_ref()
                    .map(|s| format!("의{}", s))
                    .unwrap_or_default()
            );

            if self.config.split_statute_by_items {
                let item_matches: Vec<_> = ITEM_RE.find_iter(body).collect();
                if !item_matches.is_empty() {
                    let header = body[..item_matches[0].start()].trim();
                    if !header.is_empty() {
                        let mut header_chunk =
                            Chunk::base(&document.id, document.kind, index, header.to_string());
                        header_chunk.article_number = Some(article_number.clone());
                        header_chunk.article_num = article_num.clone();
                        header_chunk.sub_article = sub_article.clone();
                        header_chunk.is_header = true;
                        chunks.push(header_chunk);
                        index += 1;
                    }
                    for (j, im) in item_matches.iter().enumerate() {
                        let item_start = im.start();
                        let item_end = item_matches
                            .get(j + 1)
                            .map(|n| n.start())
                            .unwrap_or(body.len());
                        let item_text = body[item_start..item_end].trim();
                        if item_text.is_empty() {
                            continue;
                        }
                        let mut c =
                            Chunk::base(&document.id, document.kind, index, item_text.to_string());
                        c.article_number = Some(article_number.clone());
                        c.article_num = article_num.clone();
                        c.sub_article = sub_article.clone();
                        c.item_number = Some(im.as_str().to_string());
                        chunks.push(c);
                        index += 1;
                    }
                    continue;
                }
            }

            let mut c = Chunk::base(&document.id, document.kind, index, body.to_string());
            c.article_number = Some(article_number);
            c.article_num = article_num;
            c.sub_article = sub_article;
            chunks.push(c);
            index += 1;
        }
        chunks
    }

    fn chunk_case(&self, document: &Document) -> Vec<Chunk> {
        let Some(text) = document.content.as_text() else {
            return self.chunk_default(document);
        };

        let mut headers: Vec<(usize, &str)> = Vec::new();
        for cap in BRACKET_HEADER_RE.captures_iter(text) {
            let m = cap.get(0).unwrap();
            headers.push((m.start(), cap.get(1).unwrap().as_str()));
        }
        if headers.is_empty() {
            for cap in NUMBERED_HEADER_RE.captures_iter(text) {
                let m = cap.get(0).unwrap();
                headers.push((m.start(), cap.get(2).unwrap().as_str()));
            }
        }
        if headers.is_empty() {
            for cap in COLON_HEADER_RE.captures_iter(text) {
                let m = cap.get(0).unwrap();
                headers.push((m.start(), cap.get(1).unwrap().as_str()));
            }
        }
        headers.sort_by_key(|(pos, _)| *pos);

        if headers.is_empty() {
            return self.chunk_case_by_sentence(document, text);
        }

        let mut chunks = Vec::new();
        for (i, (start, title)) in headers.iter().enumerate() {
            let end = headers.get(i + 1).map(|(p, _)| *p).unwrap_or(text.len());
            let body = text[*start..end].trim();
            if body.is_empty() {
                continue;
            }
            let mut c = Chunk::base(&document.id, document.kind, i, body.to_string());
            c.section_type = Some(classify_section(title));
            chunks.push(c);
        }
        chunks
    }

    fn chunk_case_by_sentence(&self, document: &Document, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut index = 0usize;
        for sentence in text.split('。') {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            if current.len() + sentence.len() > self.config.chunk_size && !current.is_empty() {
                let mut c = Chunk::base(&document.id, document.kind, index, current.trim().to_string());
                c.section_type = Some(SectionType::General);
                chunks.push(c);
                index += 1;
                current.clear();
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
        }
        if !current.trim().is_empty() {
            let mut c = Chunk::base(&document.id, document.kind, index, current.trim().to_string());
            c.section_type = Some(SectionType::General);
            chunks.push(c);
        }
        chunks
    }

    fn chunk_template(&self, document: &Document) -> Vec<Chunk> {
        match &document.content {
            Content::List(items) => items
                .iter()
                .enumerate()
                .filter(|(_, item)| !item.trim().is_empty())
                .map(|(i, item)| Chunk::base(&document.id, document.kind, i, item.clone()))
                .collect(),
            Content::Text(_) => self.chunk_default(document),
        }
    }

    fn chunk_default(&self, document: &Document) -> Vec<Chunk> {
        let text = document.content.joined();
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap.min(chunk_size.saturating_sub(1));

        if text.chars().count() <= chunk_size {
            return vec![Chunk::base(&document.id, document.kind, 0, text)];
        }

        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;
        while start < chars.len() {
            let end = (start + chunk_size).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            if !piece.trim().is_empty() {
                chunks.push(Chunk::base(&document.id, document.kind, index, piece.trim().to_string()));
                index += 1;
            }
            if end >= chars.len() {
                break;
            }
            start = end.saturating_sub(overlap).max(start + 1);
        }
        chunks
    }
}

fn classify_section(title: &str) -> SectionType {
    if title.contains("개요") || title.contains("사건") {
        SectionType::Overview
    } else if title.contains("요지") || title.contains("요약") {
        SectionType::Summary
    } else if title.contains("이유") || title.contains("판단") {
        SectionType::Reasoning
    } else if title.contains("참조") || title.contains("근거") {
        SectionType::Reference
    } else {
        SectionType::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentKind;
    use std::collections::HashMap;

    fn doc(kind: DocumentKind, content: Content) -> Document {
        Document {
            id: "doc-1".into(),
            category: "형사".into(),
            sub_category: "사기".into(),
            kind,
            title: "테스트".into(),
            content,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn statute_splits_on_article_markers() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let d = doc(
            DocumentKind::Statute,
            Content::Text("제1조(목적) 이 법은 목적을 정한다. 제2조(정의) 이 법에서 용어의 뜻은 다음과 같다.".into()),
        );
        let chunks = chunker.chunk(&d);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].article_number.as_deref(), Some("제1조"));
        assert_eq!(chunks[1].article_number.as_deref(), Some("제2조"));
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert!(!chunks[0].text.is_empty());
        assert!(!chunks[1].text.is_empty());
    }

    #[test]
    fn statute_falls_back_to_default_without_article_markers() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let d = doc(DocumentKind::Statute, Content::Text("본문에 조문 표시가 없습니다.".into()));
        let chunks = chunker.chunk(&d);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].article_number.is_none());
    }

    #[test]
    fn statute_item_splitting_produces_header_chunk() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let d = doc(
            DocumentKind::Statute,
            Content::Text("제347조(사기) ① 사람을 기망하여 재물을 취득한 자는 처벌한다. ② 전항의 방법으로 제3자로 하여금 취득하게 한 자도 같다.".into()),
        );
        let chunks = chunker.chunk(&d);
        assert!(chunks.iter().any(|c| c.is_header));
        assert!(chunks.iter().any(|c| c.item_number.is_some()));
    }

    #[test]
    fn template_produces_one_chunk_per_item() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let d = doc(
            DocumentKind::Template,
            Content::List(vec!["제1조 목적".into(), "제2조 정의".into(), "제3조 적용범위".into()]),
        );
        let chunks = chunker.chunk(&d);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn case_falls_back_to_sentence_split_without_headers() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let d = doc(
            DocumentKind::Case,
            Content::Text("피고인은 기망행위를 하였다。 피해자는 손해를 입었다。".into()),
        );
        let chunks = chunker.chunk(&d);
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].section_type, Some(SectionType::General));
    }

    #[test]
    fn case_detects_bracketed_headers() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let d = doc(
            DocumentKind::Case,
            Content::Text("【사건개요】 피고인은... 【판단】 법원은 다음과 같이 판단한다...".into()),
        );
        let chunks = chunker.chunk(&d);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_type, Some(SectionType::Overview));
        assert_eq!(chunks[1].section_type, Some(SectionType::Reasoning));
    }

    #[test]
    fn default_chunking_respects_overlap_and_is_dense() {
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 10,
            chunk_overlap: 3,
            split_statute_by_items: true,
        });
        let d = doc(DocumentKind::Manual, Content::Text("a".repeat(35)));
        let chunks = chunker.chunk(&d);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn store_id_derivation_matches_contract() {
        let c = Chunk::base("statute-347", DocumentKind::Statute, 2, "text".into());
        assert_eq!(c.store_id(), "statute-347_chunk_2");
    }
}
