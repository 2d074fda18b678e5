//! 집계 모듈
//!
//! 로드된 `Document` 목록에 대한 부수효과 없는 집계 연산입니다.
//! - 인기도(metric) 상위 N개
//! - 검색어 언급 횟수 (대소문자 무시, 부분 문자열)

use serde::Serialize;

use crate::error::{InsightError, Result};
use crate::knowledge::Document;

// ============================================================================
// Types
// ============================================================================

/// 필드별 언급 횟수
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MentionCounts {
    pub title: usize,
    pub body: usize,
    pub total: usize,
}

// ============================================================================
// Operations
// ============================================================================

/// metric 내림차순 상위 N개
///
/// 안정 정렬이므로 동점은 원래 수집 순서를 유지합니다.
/// `n`은 `[0, documents.len()]`로 잘립니다.
pub fn top_by_metric(documents: &[Document], n: usize) -> Vec<&Document> {
    let mut sorted: Vec<&Document> = documents.iter().collect();
    sorted.sort_by(|a, b| b.metric.cmp(&a.metric));
    sorted.truncate(n.min(documents.len()));
    sorted
}

/// 검색어 언급 횟수 (title / body / 합계)
pub fn count_mentions(documents: &[Document], term: &str) -> Result<MentionCounts> {
    let needle = normalize_term(term)?;

    let mut counts = MentionCounts::default();
    for doc in documents {
        counts.title += count_occurrences(&doc.title, &needle);
        counts.body += count_occurrences(&doc.body, &needle);
    }
    counts.total = counts.title + counts.body;

    Ok(counts)
}

/// 문서별 언급 횟수 순위
///
/// 언급이 없는 문서는 제외하고, 횟수 내림차순(동점은 원래 순서)으로 상위 N개를 반환합니다.
pub fn rank_by_mentions<'a>(
    documents: &'a [Document],
    term: &str,
    n: usize,
) -> Result<Vec<(&'a Document, usize)>> {
    let needle = normalize_term(term)?;

    let mut ranked: Vec<(&Document, usize)> = documents
        .iter()
        .map(|doc| {
            let count =
                count_occurrences(&doc.title, &needle) + count_occurrences(&doc.body, &needle);
            (doc, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect();

    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(n);

    Ok(ranked)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 검색어 검증 + 소문자화
fn normalize_term(term: &str) -> Result<String> {
    if term.is_empty() {
        return Err(InsightError::InvalidArgument(
            "search term must not be empty".to_string(),
        ));
    }
    Ok(term.to_lowercase())
}

/// 겹치지 않는 부분 문자열 출현 횟수 (대소문자 무시)
fn count_occurrences(haystack: &str, lowered_needle: &str) -> usize {
    haystack.to_lowercase().matches(lowered_needle).count()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Source;
    use serde_json::json;

    fn doc(id: &str, title: &str, body: &str, metric: i64) -> Document {
        Document {
            source: Source::Repository,
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            metric,
            tags: vec![],
            raw: json!({}),
        }
    }

    fn ids(docs: &[&Document]) -> Vec<String> {
        docs.iter().map(|d| d.id.clone()).collect()
    }

    #[test]
    fn test_top_by_metric_descending() {
        let docs = vec![doc("a", "", "", 5), doc("b", "", "", 50), doc("c", "", "", 20)];
        let top = top_by_metric(&docs, 2);
        assert_eq!(ids(&top), vec!["b", "c"]);
    }

    #[test]
    fn test_top_by_metric_is_stable_for_ties() {
        let docs = vec![
            doc("first", "", "", 10),
            doc("high", "", "", 99),
            doc("second", "", "", 10),
            doc("third", "", "", 10),
        ];
        let top = top_by_metric(&docs, 10);
        assert_eq!(ids(&top), vec!["high", "first", "second", "third"]);

        // 동점 문서의 입력 순서를 바꾸면 출력 순서도 그대로 따라감
        let reordered = vec![
            doc("third", "", "", 10),
            doc("high", "", "", 99),
            doc("first", "", "", 10),
            doc("second", "", "", 10),
        ];
        let top = top_by_metric(&reordered, 10);
        assert_eq!(ids(&top), vec!["high", "third", "first", "second"]);
    }

    #[test]
    fn test_top_by_metric_clamps_n() {
        let docs = vec![doc("a", "", "", 1), doc("b", "", "", 2)];
        assert_eq!(top_by_metric(&docs, 100).len(), 2);
        assert!(top_by_metric(&docs, 0).is_empty());
        assert!(top_by_metric(&[], 5).is_empty());
    }

    #[test]
    fn test_count_mentions_body() {
        let docs = vec![doc("a", "repo", "Uses transformers and Transformers.", 1)];
        let counts = count_mentions(&docs, "transformers").unwrap();
        assert_eq!(counts.body, 2);
        assert_eq!(counts.title, 0);
        assert_eq!(counts.total, 2);
    }

    #[test]
    fn test_count_mentions_case_insensitive() {
        let docs = vec![
            doc("a", "PyTorch tutorials", "pytorch, PYTORCH and Pytorch", 1),
            doc("b", "other", "built on pytorch-lightning", 1),
        ];
        let lower = count_mentions(&docs, "pytorch").unwrap();
        assert_eq!(count_mentions(&docs, "Pytorch").unwrap(), lower);
        assert_eq!(count_mentions(&docs, "PYTORCH").unwrap(), lower);
        assert_eq!(lower.title, 1);
        assert_eq!(lower.body, 4);
        assert_eq!(lower.total, 5);
    }

    #[test]
    fn test_count_mentions_substring_not_word_boundary() {
        let docs = vec![doc("a", "", "transformers transformer-xl retransform", 1)];
        assert_eq!(count_mentions(&docs, "transform").unwrap().body, 3);
    }

    #[test]
    fn test_count_mentions_non_overlapping() {
        let docs = vec![doc("a", "", "aaaa", 1)];
        assert_eq!(count_mentions(&docs, "aa").unwrap().body, 2);
    }

    #[test]
    fn test_empty_term_is_invalid() {
        let docs = vec![doc("a", "t", "b", 1)];
        assert!(matches!(
            count_mentions(&docs, ""),
            Err(InsightError::InvalidArgument(_))
        ));
        assert!(matches!(
            rank_by_mentions(&docs, "", 5),
            Err(InsightError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rank_by_mentions() {
        let docs = vec![
            doc("none", "x", "nothing here", 1),
            doc("one", "Rust", "", 1),
            doc("three", "rust", "rust RUST", 1),
            doc("also-one", "", "trust", 1),
        ];
        let ranked = rank_by_mentions(&docs, "rust", 5).unwrap();
        let got: Vec<(&str, usize)> = ranked.iter().map(|(d, c)| (d.id.as_str(), *c)).collect();
        assert_eq!(got, vec![("three", 3), ("one", 1), ("also-one", 1)]);

        assert_eq!(rank_by_mentions(&docs, "rust", 1).unwrap().len(), 1);
    }
}
