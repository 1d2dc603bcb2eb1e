//! Prompt templates and context-window optimization.
//!
//! Grounded on `original_source/src/rag/prompts.py`'s `PromptTemplates`
//! and `ContextOptimizer`: four document-type-specific answer templates
//! plus a fallback, and a greedy length-budgeted context reducer that
//! keeps whole `[문서N]`-delimited blocks rather than truncating mid-block.
//!
//! `ContentType`, `build_generation_system_prompt`/`build_generation_user_prompt`
//! and `parse_generated_content` are grounded on
//! `original_source/src/api/routers/generate.py`'s `_build_system_prompt`,
//! `_build_user_prompt` and `_parse_generated_content`: long-form content
//! generation gets its own prompt family, separate from the short-answer
//! templates above.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Blog,
    Article,
    Opinion,
    Analysis,
    Faq,
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType::Blog
    }
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Blog => "blog",
            ContentType::Article => "article",
            ContentType::Opinion => "opinion",
            ContentType::Analysis => "analysis",
            ContentType::Faq => "faq",
        }
    }
}

pub const SYSTEM_PROMPT: &str = "당신은 법률 전문가 AI 어시스턴트입니다. \
사용자의 법률 질문에 대해 정확하고 전문적인 답변을 제공합니다.\n\n\
주요 역할:\n\
1. 법령, 판례, 절차 등 법률 정보를 정확하게 설명\n\
2. 사용자의 질문에 대해 명확하고 이해하기 쉬운 답변 제공\n\
3. 관련 법령 조문과 판례를 적절히 인용\n\
4. 실무적인 조언과 주의사항 제공\n\n\
답변 작성 시 주의사항:\n\
- 정확한 법률 용어 사용\n\
- 출처를 명확히 표시 (법령 조문 번호, 판례 번호 등)\n\
- 추측이나 불확실한 정보 제공 금지\n\
- 사용자의 상황에 맞는 실무적 조언 제공";

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

fn statute_prompt(context: &str, query: &str) -> String {
    format!(
        "다음은 관련 법령 정보입니다:\n\n{context}\n\n사용자 질문: {query}\n\n\
위 법령 정보를 바탕으로 사용자의 질문에 답변해주세요.\n답변 시 다음을 포함해주세요:\n\
1. 관련 법령 조문 번호와 내용\n2. 법령의 핵심 내용 설명\n3. 실무 적용 시 주의사항"
    )
}

fn case_prompt(context: &str, query: &str) -> String {
    format!(
        "다음은 관련 판례 정보입니다:\n\n{context}\n\n사용자 질문: {query}\n\n\
위 판례 정보를 바탕으로 사용자의 질문에 답변해주세요.\n답변 시 다음을 포함해주세요:\n\
1. 관련 판례 번호와 법원\n2. 판결 요지\n3. 실무에 대한 시사점"
    )
}

fn procedure_prompt(context: &str, query: &str) -> String {
    format!(
        "다음은 관련 절차 정보입니다:\n\n{context}\n\n사용자 질문: {query}\n\n\
위 절차 정보를 바탕으로 사용자의 질문에 답변해주세요.\n답변 시 다음을 포함해주세요:\n\
1. 절차의 단계별 설명\n2. 각 단계에서 주의할 사항\n3. 필요한 서류나 준비사항"
    )
}

fn general_prompt(context: &str, query: &str) -> String {
    format!(
        "다음은 검색된 법률 정보입니다:\n\n{context}\n\n사용자 질문: {query}\n\n\
위 정보를 바탕으로 사용자의 질문에 정확하고 전문적인 답변을 제공해주세요.\n\
답변 시 다음을 포함해주세요:\n1. 핵심 내용 요약\n2. 관련 법령이나 판례 인용\n3. 실무적 조언"
    )
}

fn prompt_by_type(doc_type: &str, context: &str, query: &str) -> String {
    match doc_type {
        "statute" => statute_prompt(context, query),
        "case" => case_prompt(context, query),
        "procedure" => procedure_prompt(context, query),
        _ => general_prompt(context, query),
    }
}

/// Picks the specialized template only when the search was scoped to a
/// single document type; mixed or unscoped results use the general template.
pub fn user_prompt(context: &str, query: &str, document_types: Option<&[String]>) -> String {
    match document_types {
        Some(types) if types.len() == 1 => prompt_by_type(&types[0], context, query),
        _ => general_prompt(context, query),
    }
}

/// Default context budget in characters (original: 4000 tokens * 3).
pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 12_000;

/// Greedily keeps the largest `[문서N]...` blocks that fit within
/// `max_length`, then restores original document order.
pub fn optimize_context(context: &str, max_length: Option<usize>) -> String {
    let max_length = max_length.unwrap_or(DEFAULT_MAX_CONTEXT_LENGTH);
    if context.chars().count() <= max_length {
        return context.to_string();
    }

    let parts: Vec<&str> = context.split("[문서").collect();
    let mut blocks: Vec<(usize, String)> = Vec::new();
    for part in parts.iter().skip(1) {
        if part.trim().is_empty() {
            continue;
        }
        let doc_text = format!("[문서{part}");
        let order_key = part
            .split(']')
            .next()
            .and_then(|n| n.trim().parse::<usize>().ok())
            .unwrap_or(0);
        blocks.push((order_key, doc_text));
    }

    let mut by_size: Vec<&(usize, String)> = blocks.iter().collect();
    by_size.sort_by_key(|(_, text)| std::cmp::Reverse(text.chars().count()));

    let mut kept: Vec<&(usize, String)> = Vec::new();
    let mut current_length = 0usize;
    for entry in by_size {
        let len = entry.1.chars().count();
        if current_length + len <= max_length {
            kept.push(entry);
            current_length += len;
        }
    }

    if kept.is_empty() {
        return context.chars().take(max_length).collect();
    }

    kept.sort_by_key(|(order, _)| *order);
    kept.into_iter()
        .map(|(_, text)| text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn content_type_instructions(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Blog => "\n블로그 포스팅 작성 규칙:\n\
- 독자 친화적이고 이해하기 쉬운 문체 사용\n\
- 법률 용어는 쉬운 설명과 함께 사용\n\
- 실제 사례와 판례를 활용하여 구체적으로 설명\n\
- 실용적인 조언과 대응 방법 포함\n",
        ContentType::Article => "\n법률 기사 작성 규칙:\n\
- 객관적이고 중립적인 톤 유지\n\
- 사실에 기반한 정확한 정보 제공\n\
- 법령 조문과 판례를 명확히 인용\n\
- 전문가 의견과 분석 포함\n",
        ContentType::Opinion => "\n법률 의견서 작성 규칙:\n\
- 전문적이고 정확한 법률 분석\n\
- 관련 법령과 판례를 상세히 인용\n\
- 법리적 논거를 체계적으로 제시\n\
- 결론과 권고사항을 명확히 제시\n",
        ContentType::Analysis => "\n법률 케이스 분석 작성 규칙:\n\
- 사건의 사실관계를 명확히 정리\n\
- 법적 쟁점을 체계적으로 분석\n\
- 관련 법령과 판례를 비교 분석\n\
- 법리적 판단과 시사점 제시\n",
        ContentType::Faq => "\nFAQ 작성 규칙:\n\
- 질문은 일반인이 궁금해할 만한 내용으로 구성\n\
- 답변은 간결하고 명확하게 작성\n\
- 관련 법령 조문 번호 명시\n\
- 실무적인 조언 포함\n",
    }
}

/// System prompt for long-form content generation, built from the
/// content type's house style plus any caller-supplied style/length/
/// section/keyword constraints.
#[allow(clippy::too_many_arguments)]
pub fn build_generation_system_prompt(
    content_type: ContentType,
    style: Option<&str>,
    target_length: Option<usize>,
    include_sections: Option<&[String]>,
    keywords: Option<&[String]>,
) -> String {
    let mut prompt = String::from(
        "당신은 전문 법률 콘텐츠 작가입니다. 제공된 법률 문서(법령, 판례 등)를 참고하여 정확하고 전문적인 법률 콘텐츠를 작성합니다.\n\n",
    );
    prompt.push_str(content_type_instructions(content_type));

    if let Some(style) = style {
        prompt.push_str(&format!("\n작성 스타일: {style}\n"));
    }
    if let Some(target_length) = target_length {
        prompt.push_str(&format!("\n목표 글자 수: 약 {target_length}자 (공백 제외)\n"));
    }
    if let Some(sections) = include_sections {
        if !sections.is_empty() {
            prompt.push_str(&format!("\n반드시 포함할 섹션: {}\n", sections.join(", ")));
        }
    }
    if let Some(keywords) = keywords {
        if !keywords.is_empty() {
            prompt.push_str(&format!("\n반드시 포함할 키워드: {}\n", keywords.join(", ")));
            prompt.push_str("키워드는 자연스럽게 문맥에 맞게 배치하세요.\n");
        }
    }

    prompt.push_str("\n중요: 제공된 법률 문서의 내용을 정확히 반영하고, 법령 조문 번호와 판례 번호를 명확히 표시하세요.");
    prompt
}

/// User prompt naming the requested structure per content type, with the
/// retrieved context appended.
pub fn build_generation_user_prompt(topic: &str, context: &str, content_type: ContentType) -> String {
    match content_type {
        ContentType::Blog => format!(
            "다음 주제에 대해 법률 블로그 포스팅을 작성해주세요.\n\n주제: {topic}\n\n\
다음 구조로 작성해주세요:\n1. 제목 (SEO 최적화, 매력적)\n2. 도입부 (문제 상황 설명, 호기심 유발)\n\
3. 법적 기준과 처벌\n4. 실제 사례와 판례\n5. 대응 방법과 예방책\n6. 마무리 (행동 유도)\n\n참고 문서:\n{context}"
        ),
        ContentType::Article => format!(
            "다음 주제에 대해 법률 기사를 작성해주세요.\n\n주제: {topic}\n\n\
다음 구조로 작성해주세요:\n1. 제목\n2. 기사 본문 (사실 관계, 법적 배경, 전문가 의견)\n\
3. 관련 법령 및 판례 인용\n4. 시사점 및 전망\n\n참고 문서:\n{context}"
        ),
        ContentType::Opinion => format!(
            "다음 주제에 대해 법률 의견서를 작성해주세요.\n\n주제: {topic}\n\n\
다음 구조로 작성해주세요:\n1. 의견서 제목\n2. 사실관계\n3. 법적 쟁점\n\
4. 관련 법령 및 판례\n5. 법리적 분석\n6. 결론 및 의견\n\n참고 문서:\n{context}"
        ),
        ContentType::Analysis => format!(
            "다음 주제에 대해 법률 케이스 분석을 작성해주세요.\n\n주제: {topic}\n\n\
다음 구조로 작성해주세요:\n1. 분석 제목\n2. 사건 개요\n3. 법적 쟁점\n\
4. 관련 법령 검토\n5. 관련 판례 분석\n6. 법리적 판단\n7. 시사점\n\n참고 문서:\n{context}"
        ),
        ContentType::Faq => format!(
            "다음 주제에 대해 FAQ를 작성해주세요.\n\n주제: {topic}\n\n\
질문과 답변 형식으로 작성하되, 다음 주제들을 포함해주세요:\n\
- 법적 정의 및 기준\n- 처벌 및 법적 효과\n- 실제 사례\n- 대응 방법\n- 전문가 상담 필요성\n\n참고 문서:\n{context}"
        ),
    }
}

/// Extracted shape of a generated content response: a best-effort title,
/// a `header -> body` section map for blog/article content, and the
/// original content unchanged.
pub struct ParsedContent {
    pub title: Option<String>,
    pub sections: Option<HashMap<String, String>>,
}

/// Best-effort title and section extraction from free-form generated text.
/// Mirrors the line-scanning heuristics of the source content parser
/// rather than requiring the model to emit structured output.
pub fn parse_generated_content(content: &str, content_type: ContentType) -> ParsedContent {
    let lines: Vec<&str> = content.lines().collect();

    let mut title = None;
    for line in lines.iter().take(10) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains('제') && line.contains('목') || line.to_lowercase().contains("title") {
            if let Some((_, rest)) = line.split_once(':') {
                title = Some(rest.trim().to_string());
            } else if line.chars().count() < 100 {
                title = Some(line.to_string());
            }
            break;
        }
    }

    let mut sections = None;
    if matches!(content_type, ContentType::Blog | ContentType::Article) {
        let mut map: HashMap<String, String> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut current: Option<String> = None;
        let mut buf: Vec<String> = Vec::new();

        let numbered_prefixes = ["1.", "2.", "3.", "4.", "5.", "6.", "7.", "8.", "9."];
        let circled = ["①", "②", "③", "④", "⑤", "⑥", "⑦", "⑧"];
        let section_suffixes = ["법", "책", "안", "점", "례"];

        for raw in &lines {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let is_header = numbered_prefixes.iter().any(|p| line.starts_with(p))
                || circled.iter().any(|p| line.starts_with(p))
                || (line.chars().count() < 50 && !line.contains(':') && section_suffixes.iter().any(|s| line.ends_with(s)));

            if is_header {
                if let Some(header) = current.take() {
                    map.insert(header, buf.join("\n"));
                    buf = Vec::new();
                }
                current = Some(line.to_string());
                order.push(line.to_string());
            } else {
                buf.push(line.to_string());
            }
        }
        if let Some(header) = current {
            map.insert(header, buf.join("\n"));
        }
        if !map.is_empty() {
            sections = Some(map);
        }
    }

    ParsedContent { title, sections }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_context_is_unchanged() {
        let context = "짧은 컨텍스트";
        assert_eq!(optimize_context(context, None), context);
    }

    #[test]
    fn single_document_type_selects_specialized_template() {
        let prompt = user_prompt("context", "query", Some(&["statute".to_string()]));
        assert!(prompt.contains("법령 조문 번호"));
    }

    #[test]
    fn multiple_document_types_fall_back_to_general() {
        let prompt = user_prompt(
            "context",
            "query",
            Some(&["statute".to_string(), "case".to_string()]),
        );
        assert!(prompt.contains("핵심 내용 요약"));
    }

    #[test]
    fn unknown_document_type_falls_back_to_general() {
        let prompt = prompt_by_type("unknown", "context", "query");
        assert!(prompt.contains("핵심 내용 요약"));
    }

    #[test]
    fn optimize_context_keeps_original_document_order() {
        let long_a = "A".repeat(50);
        let long_b = "B".repeat(50);
        let context = format!("[문서1] {long_a}\n[문서2] {long_b}");
        let optimized = optimize_context(&context, Some(60));
        let pos1 = optimized.find("[문서1").unwrap();
        let pos2 = optimized.find("[문서2").unwrap_or(usize::MAX);
        assert!(pos2 == usize::MAX || pos1 < pos2);
    }

    #[test]
    fn optimize_context_never_exceeds_fallback_slice_when_nothing_fits() {
        let context = format!("[문서1] {}", "x".repeat(100));
        let optimized = optimize_context(&context, Some(10));
        assert!(optimized.chars().count() <= 10);
    }

    #[test]
    fn generation_system_prompt_includes_style_length_sections_and_keywords() {
        let prompt = build_generation_system_prompt(
            ContentType::Blog,
            Some("간결한"),
            Some(1500),
            Some(&["법적기준".to_string(), "판례".to_string()]),
            Some(&["손해배상".to_string()]),
        );
        assert!(prompt.contains("작성 스타일: 간결한"));
        assert!(prompt.contains("1500자"));
        assert!(prompt.contains("법적기준, 판례"));
        assert!(prompt.contains("손해배상"));
    }

    #[test]
    fn generation_user_prompt_embeds_topic_and_context_by_type() {
        let prompt = build_generation_user_prompt("계약 해지", "[문서1] ...", ContentType::Faq);
        assert!(prompt.contains("계약 해지"));
        assert!(prompt.contains("[문서1]"));
    }

    #[test]
    fn parse_generated_content_extracts_colon_title() {
        let content = "제목: 계약 해지 시 유의사항\n\n본문 내용입니다.";
        let parsed = parse_generated_content(content, ContentType::Blog);
        assert_eq!(parsed.title, Some("계약 해지 시 유의사항".to_string()));
    }

    #[test]
    fn parse_generated_content_extracts_numbered_sections_for_blog() {
        let content = "1. 도입부\n문제 상황 설명입니다.\n2. 법적 기준\n관련 조문 설명입니다.";
        let parsed = parse_generated_content(content, ContentType::Blog);
        let sections = parsed.sections.unwrap();
        assert_eq!(sections.get("1. 도입부").unwrap(), "문제 상황 설명입니다.");
        assert_eq!(sections.get("2. 법적 기준").unwrap(), "관련 조문 설명입니다.");
    }

    #[test]
    fn parse_generated_content_skips_sections_for_non_article_types() {
        let content = "1. 질문\n답변 내용입니다.";
        let parsed = parse_generated_content(content, ContentType::Faq);
        assert!(parsed.sections.is_none());
    }
}
