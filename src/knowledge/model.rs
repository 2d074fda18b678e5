//! 정규화된 레코드 타입
//!
//! 두 소스(GitHub 저장소, Reddit 게시물)의 결과를 하나의 `Document` 스키마로 통합합니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InsightError;

// ============================================================================
// Source
// ============================================================================

/// 문서 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// 코드 저장소 (GitHub)
    Repository,
    /// 포럼 게시물 (Reddit)
    ForumPost,
}

impl Source {
    /// 직렬화 이름 (아티팩트 파일명에도 사용)
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Repository => "repository",
            Source::ForumPost => "forum_post",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = InsightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "repository" | "github" => Ok(Source::Repository),
            "forum_post" | "reddit" => Ok(Source::ForumPost),
            other => Err(InsightError::InvalidArgument(format!(
                "unknown source '{}' (expected github or reddit)",
                other
            ))),
        }
    }
}

// ============================================================================
// Document
// ============================================================================

/// 정규화된 단일 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub source: Source,
    /// 소스 고유 ID
    pub id: String,
    /// 저장소 full_name 또는 게시물 제목
    pub title: String,
    /// QA 컨텍스트 (README 또는 본문 + 상위 댓글). 없으면 빈 문자열
    pub body: String,
    /// 인기도 (stars 또는 score)
    pub metric: i64,
    /// 토픽 (게시물은 빈 목록)
    pub tags: Vec<String>,
    /// 원본 페이로드
    pub raw: serde_json::Value,
}

impl Document {
    /// 원본 페이로드의 설명 필드 (리포트 출력용)
    pub fn description(&self) -> Option<&str> {
        self.raw
            .get("description")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// 원본 페이로드의 URL (html_url 또는 url)
    pub fn url(&self) -> Option<&str> {
        ["html_url", "url"]
            .iter()
            .find_map(|key| self.raw.get(*key).and_then(|v| v.as_str()))
    }
}

// ============================================================================
// FetchResult
// ============================================================================

/// 한 번의 수집 결과 (불변)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub query: String,
    pub source: Source,
    /// 포럼 수집 시 서브레딧 이름
    pub community: Option<String>,
    /// 요청한 개수
    pub limit: usize,
    pub documents: Vec<Document>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    /// 현재 시각으로 새 결과 생성
    pub fn new(
        source: Source,
        query: &str,
        community: Option<String>,
        limit: usize,
        documents: Vec<Document>,
    ) -> Self {
        Self {
            query: query.to_string(),
            source,
            community,
            limit,
            documents,
            fetched_at: Utc::now(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_serde_names() {
        assert_eq!(
            serde_json::to_string(&Source::Repository).unwrap(),
            "\"repository\""
        );
        assert_eq!(
            serde_json::to_string(&Source::ForumPost).unwrap(),
            "\"forum_post\""
        );
    }

    #[test]
    fn test_source_from_str() {
        assert_eq!("github".parse::<Source>().unwrap(), Source::Repository);
        assert_eq!("Reddit".parse::<Source>().unwrap(), Source::ForumPost);
        assert!(matches!(
            "gitlab".parse::<Source>(),
            Err(InsightError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_body_is_serialized() {
        let doc = Document {
            source: Source::ForumPost,
            id: "abc".to_string(),
            title: "t".to_string(),
            body: String::new(),
            metric: -3,
            tags: vec![],
            raw: json!({}),
        };

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["body"], json!(""));
        assert_eq!(value["tags"], json!([]));
        assert_eq!(value["metric"], json!(-3));
    }

    #[test]
    fn test_fetch_result_fields_always_present() {
        let result = FetchResult::new(Source::Repository, "rust", None, 5, vec![]);
        let value = serde_json::to_value(&result).unwrap();

        for key in ["query", "source", "community", "limit", "documents", "fetched_at"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_document_raw_accessors() {
        let doc = Document {
            source: Source::Repository,
            id: "1".to_string(),
            title: "a/b".to_string(),
            body: String::new(),
            metric: 10,
            tags: vec![],
            raw: json!({"description": "desc", "html_url": "https://github.com/a/b"}),
        };

        assert_eq!(doc.description(), Some("desc"));
        assert_eq!(doc.url(), Some("https://github.com/a/b"));
    }
}
