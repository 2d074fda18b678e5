//! 소스 커넥터 모듈
//!
//! 외부 API(GitHub 저장소 검색, Reddit 게시물 검색)에서 문서를 수집해
//! 공통 `Document` 형태로 정규화합니다.
//!
//! 모든 요청은 소스별 `RateLimiter`를 거치고, rate limit/일시 오류는
//! `RetryPolicy`에 따라 재시도됩니다.

mod github;
mod http;
mod reddit;
mod retry;

pub use github::{
    GitHubClient, GitHubConfig, RepoSearchPage, RepositoryApi, RepositoryConnector,
    GITHUB_API_URL,
};
pub use http::{ApiError, PacingConfig, RateLimiter, USER_AGENT};
pub use reddit::{
    compose_forum_body, Comment, ForumApi, ForumConnector, PostSearchPage, RedditClient,
    RedditConfig, RedditCredentials, SearchOrder, SearchSort, TimeFilter, MAX_BODY_CHARS,
    REDDIT_API_URL, REDDIT_AUTH_URL, TOP_COMMENTS,
};
pub use retry::{with_retry, RetryPolicy};

use crate::error::{InsightError, Result};
use crate::knowledge::{FetchResult, Source};

/// GitHub 토큰 환경변수
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

// ============================================================================
// Connector
// ============================================================================

/// 소스 선택 결과
pub enum Connector {
    Repository(RepositoryConnector),
    Forum(ForumConnector),
}

impl Connector {
    /// 환경변수 설정으로 커넥터 생성
    ///
    /// 포럼 소스는 커뮤니티(서브레딧) 이름이 필요하고, `order`는 포럼 검색에만 쓰입니다.
    pub fn from_env(source: Source, community: Option<&str>, order: SearchOrder) -> Result<Self> {
        match source {
            Source::Repository => Ok(Connector::Repository(RepositoryConnector::from_env()?)),
            Source::ForumPost => {
                let community = community.ok_or_else(|| {
                    InsightError::InvalidArgument(
                        "a subreddit is required for forum searches".to_string(),
                    )
                })?;
                Ok(Connector::Forum(ForumConnector::from_env(community, order)?))
            }
        }
    }

    pub fn source(&self) -> Source {
        match self {
            Connector::Repository(_) => Source::Repository,
            Connector::Forum(_) => Source::ForumPost,
        }
    }

    /// 문서 수집
    pub async fn fetch(&self, query: &str, limit: usize) -> Result<FetchResult> {
        match self {
            Connector::Repository(connector) => connector.fetch(query, limit).await,
            Connector::Forum(connector) => connector.fetch(query, limit).await,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// GitHub 토큰 (없으면 비인증 요청)
pub fn github_token() -> Option<String> {
    std::env::var(GITHUB_TOKEN_ENV)
        .ok()
        .filter(|token| !token.trim().is_empty())
}

/// GitHub 토큰 설정 여부
pub fn has_github_token() -> bool {
    github_token().is_some()
}

/// CLI 등에서 받은 정수 limit 검증
pub fn validate_limit(limit: i64) -> Result<usize> {
    if limit <= 0 {
        return Err(InsightError::InvalidArgument(format!(
            "limit must be a positive integer, got {}",
            limit
        )));
    }
    usize::try_from(limit)
        .map_err(|_| InsightError::InvalidArgument(format!("limit {} is too large", limit)))
}

/// 수집 요청 검증
pub(crate) fn validate_request(query: &str, limit: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(InsightError::InvalidArgument(
            "query must not be empty".to_string(),
        ));
    }
    if limit == 0 {
        return Err(InsightError::InvalidArgument(
            "limit must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

/// 검색 항목 식별자 (로그/에러 메시지용)
pub(crate) fn item_label(raw: &serde_json::Value, key: &str) -> String {
    raw.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// 항목별 상세 조회 실패 집계
///
/// 항목 고유의 실패는 경고만 남기고 건너뛰며, 전부 실패한 경우에만 소스 오류로 올립니다.
/// 재시도를 소진한 rate limit/일시 오류는 이후 항목에도 똑같이 닥치므로 즉시 중단합니다.
#[derive(Debug, Default)]
pub(crate) struct DetailTally {
    failed: usize,
    last_error: Option<String>,
}

impl DetailTally {
    pub(crate) fn skip(&mut self, source_name: &str, item: &str, error: ApiError) -> Result<()> {
        if error.is_retryable() {
            return Err(InsightError::source_unavailable(
                source_name,
                format!("{}: {}", item, error),
            ));
        }

        tracing::warn!("Skipping {} item {}: {}", source_name, item, error);
        self.failed += 1;
        self.last_error = Some(format!("{}: {}", item, error));
        Ok(())
    }

    pub(crate) fn finish(self, source_name: &str, succeeded: usize) -> Result<()> {
        if succeeded == 0 && self.failed > 0 {
            return Err(InsightError::source_unavailable(
                source_name,
                format!(
                    "all {} detail requests failed (last: {})",
                    self.failed,
                    self.last_error.unwrap_or_default()
                ),
            ));
        }
        if self.failed > 0 {
            tracing::warn!(
                "{}: {} item(s) skipped, {} collected",
                source_name,
                self.failed,
                succeeded
            );
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_limit() {
        assert_eq!(validate_limit(15).unwrap(), 15);
        assert!(matches!(
            validate_limit(0),
            Err(InsightError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_limit(-3),
            Err(InsightError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_item_label() {
        let raw = serde_json::json!({"full_name": "org/repo", "id": 7});
        assert_eq!(item_label(&raw, "full_name"), "org/repo");
        assert_eq!(item_label(&raw, "id"), "<unknown>");
    }

    #[test]
    fn test_validate_request() {
        assert!(validate_request("llm", 1).is_ok());
        assert!(validate_request("", 5).is_err());
        assert!(validate_request("   ", 5).is_err());
        assert!(validate_request("llm", 0).is_err());
    }

    fn not_available() -> ApiError {
        ApiError::Status {
            status: 451,
            body: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_detail_tally() {
        assert!(DetailTally::default().finish("GitHub", 0).is_ok());

        let mut partial = DetailTally::default();
        partial.skip("GitHub", "org/a", not_available()).unwrap();
        assert!(partial.finish("GitHub", 3).is_ok());

        let mut total = DetailTally::default();
        total.skip("Reddit", "p1", not_available()).unwrap();
        total
            .skip("Reddit", "p2", ApiError::NotFound("gone".to_string()))
            .unwrap();
        match total.finish("Reddit", 0) {
            Err(InsightError::SourceUnavailable { source_name, cause }) => {
                assert_eq!(source_name, "Reddit");
                assert!(cause.contains("p2"));
            }
            other => panic!("expected SourceUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_detail_tally_aborts_on_exhausted_retries() {
        let mut tally = DetailTally::default();
        let err = tally
            .skip(
                "GitHub",
                "org/a",
                ApiError::RateLimited {
                    retry_after: Some(std::time::Duration::from_secs(60)),
                },
            )
            .unwrap_err();
        assert!(matches!(err, InsightError::SourceUnavailable { .. }));

        let err = tally
            .skip("GitHub", "org/b", ApiError::Transient("timeout".to_string()))
            .unwrap_err();
        assert!(matches!(err, InsightError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_forum_connector_requires_community() {
        assert!(matches!(
            Connector::from_env(Source::ForumPost, None, SearchOrder::default()),
            Err(InsightError::InvalidArgument(_))
        ));
    }
}
