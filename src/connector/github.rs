//! GitHub 저장소 커넥터
//!
//! `GET /search/repositories`로 후보를 찾고, 각 저장소의 README를
//! `GET /repos/{full_name}/readme`로 가져와 `Document`로 정규화합니다.
//!
//! source: https://docs.github.com/en/rest/search/search#search-repositories

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::http::{build_client, header_secs, truncate_body, ApiError, PacingConfig, RateLimiter};
use super::retry::{with_retry, RetryPolicy};
use super::{github_token, item_label, validate_request, DetailTally};
use crate::error::{InsightError, Result};
use crate::knowledge::{Document, FetchResult, Source};

/// GitHub REST API 기본 URL
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// 검색 API 페이지 크기 상한
const PAGE_SIZE: usize = 100;
/// 검색 API가 반환하는 최대 결과 수
const SEARCH_RESULT_CAP: u64 = 1000;

const SOURCE_NAME: &str = "GitHub";

// ============================================================================
// RepositoryApi Trait
// ============================================================================

/// 검색 결과 한 페이지
#[derive(Debug, Clone, Default)]
pub struct RepoSearchPage {
    pub total_count: u64,
    /// 검색 결과 항목 (원본 JSON)
    pub items: Vec<Value>,
}

/// 코드 저장소 API
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    /// 저장소 검색 (page는 1부터)
    async fn search_repositories(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> std::result::Result<RepoSearchPage, ApiError>;

    /// README 본문 (없으면 None)
    async fn readme(&self, full_name: &str) -> std::result::Result<Option<String>, ApiError>;
}

// ============================================================================
// GitHub Client
// ============================================================================

/// GitHub 클라이언트 설정
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    /// 없으면 비인증 요청 (낮은 쿼터)
    pub token: Option<String>,
    pub pacing: PacingConfig,
}

impl GitHubConfig {
    /// 환경변수(GITHUB_TOKEN)에서 설정 생성
    pub fn from_env() -> Self {
        Self {
            api_base: GITHUB_API_URL.to_string(),
            token: github_token(),
            pacing: PacingConfig::github(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
    #[serde(default)]
    incomplete_results: bool,
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

/// GitHub REST 클라이언트
pub struct GitHubClient {
    client: reqwest::Client,
    config: GitHubConfig,
    rate_limiter: Mutex<RateLimiter>,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> std::result::Result<Self, ApiError> {
        if config.token.is_none() {
            tracing::warn!("GITHUB_TOKEN not set; using unauthenticated GitHub requests");
        }

        Ok(Self {
            client: build_client()?,
            rate_limiter: Mutex::new(RateLimiter::new(config.pacing)),
            config,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// GET 요청 (간격 제어 + 상태 코드 분류)
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<reqwest::Response, ApiError> {
        self.rate_limiter.lock().await.acquire().await;

        tracing::debug!("GET {}", url);

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .query(query);

        if let Some(ref token) = self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &headers, &body, chrono::Utc::now().timestamp()))
    }
}

#[async_trait]
impl RepositoryApi for GitHubClient {
    async fn search_repositories(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> std::result::Result<RepoSearchPage, ApiError> {
        let url = self.endpoint("search/repositories");
        let params = [
            ("q", query.to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];

        let response: SearchResponse = self.get(&url, &params).await?.json().await?;
        if response.incomplete_results {
            tracing::warn!("GitHub search timed out server-side; results may be incomplete");
        }

        Ok(RepoSearchPage {
            total_count: response.total_count,
            items: response.items,
        })
    }

    async fn readme(&self, full_name: &str) -> std::result::Result<Option<String>, ApiError> {
        let url = self.endpoint(&format!("repos/{}/readme", full_name));

        match self.get(&url, &[]).await {
            Ok(response) => {
                let content: ContentResponse = response.json().await?;
                decode_content(content)
            }
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// 실패 응답 분류
///
/// 429, 또는 쿼터 소진(403 + x-ratelimit-remaining: 0 / Retry-After)은 rate limit 입니다.
/// source: https://docs.github.com/en/rest/using-the-rest-api/rate-limits-for-the-rest-api
fn classify(status: StatusCode, headers: &HeaderMap, body: &str, now_epoch: i64) -> ApiError {
    let quota_exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);

    let is_rate_limit = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (quota_exhausted || headers.contains_key("retry-after")));

    if is_rate_limit {
        let retry_after = header_secs(headers, "retry-after").or_else(|| {
            header_secs(headers, "x-ratelimit-reset")
                .map(|reset| reset.saturating_sub(now_epoch.max(0) as u64))
        });
        return ApiError::RateLimited {
            retry_after: retry_after.map(Duration::from_secs),
        };
    }

    match status.as_u16() {
        401 => ApiError::Unauthorized(truncate_body(body)),
        404 => ApiError::NotFound(truncate_body(body)),
        500..=599 => ApiError::Transient(format!("HTTP {}", status)),
        code => ApiError::Status {
            status: code,
            body: truncate_body(body),
        },
    }
}

/// contents API 응답 디코딩 (base64)
fn decode_content(content: ContentResponse) -> std::result::Result<Option<String>, ApiError> {
    match (content.content, content.encoding.as_deref()) {
        (Some(encoded), Some("base64")) => {
            let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = STANDARD
                .decode(cleaned)
                .map_err(|e| ApiError::Decode(format!("README base64: {}", e)))?;
            Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
        }
        (_, encoding) => {
            // 1MB 초과 파일은 encoding "none"으로 본문 없이 내려옴
            tracing::debug!("README not inlined (encoding: {:?})", encoding);
            Ok(None)
        }
    }
}

// ============================================================================
// Repository Connector
// ============================================================================

/// 검색 항목에서 필요한 필드
#[derive(Debug, Deserialize)]
struct RepoItem {
    id: u64,
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    topics: Vec<String>,
}

/// 저장소 항목 -> Document
///
/// README가 없으면 설명, 설명도 없으면 빈 문자열을 body로 씁니다.
fn repository_document(item: RepoItem, readme: Option<String>, raw: Value) -> Document {
    let body = readme
        .or(item.description)
        .unwrap_or_default();

    Document {
        source: Source::Repository,
        id: item.id.to_string(),
        title: item.full_name,
        body,
        metric: item.stargazers_count,
        tags: item.topics,
        raw,
    }
}

/// 저장소 커넥터
pub struct RepositoryConnector {
    api: Arc<dyn RepositoryApi>,
    retry: RetryPolicy,
}

impl RepositoryConnector {
    pub fn new(api: Arc<dyn RepositoryApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// 환경변수 설정으로 GitHub 커넥터 생성
    pub fn from_env() -> Result<Self> {
        let client = GitHubClient::new(GitHubConfig::from_env())
            .map_err(|e| InsightError::source_unavailable(SOURCE_NAME, e))?;
        Ok(Self::new(Arc::new(client), RetryPolicy::default()))
    }

    /// 저장소 검색 + README 수집
    ///
    /// README 조회에 실패한 항목은 건너뛰고 다음 후보로 채웁니다.
    pub async fn fetch(&self, query: &str, limit: usize) -> Result<FetchResult> {
        validate_request(query, limit)?;

        tracing::info!("Fetching GitHub repositories for '{}' (limit {})", query, limit);

        let api = self.api.as_ref();
        let per_page = limit.min(PAGE_SIZE) as u32;
        let mut documents = Vec::with_capacity(limit);
        let mut tally = DetailTally::default();
        let mut page: u32 = 1;

        'pages: loop {
            let result = with_retry(&self.retry, "GitHub search", move || {
                api.search_repositories(query, page, per_page)
            })
            .await
            .map_err(|e| InsightError::source_unavailable(SOURCE_NAME, e))?;

            let received = result.items.len();

            for raw in result.items {
                if documents.len() >= limit {
                    break 'pages;
                }

                let label = item_label(&raw, "full_name");
                match self.document_for(raw).await {
                    Ok(doc) => {
                        tracing::info!("  - Added {}", doc.title);
                        documents.push(doc);
                    }
                    Err(e) => tally.skip(SOURCE_NAME, &label, e)?,
                }
            }

            let seen = u64::from(page) * u64::from(per_page);
            if documents.len() >= limit
                || received < per_page as usize
                || seen >= result.total_count.min(SEARCH_RESULT_CAP)
            {
                break;
            }
            page += 1;
        }

        tally.finish(SOURCE_NAME, documents.len())?;

        Ok(FetchResult::new(
            Source::Repository,
            query,
            None,
            limit,
            documents,
        ))
    }

    /// 검색 항목 하나의 상세 조회
    async fn document_for(&self, raw: Value) -> std::result::Result<Document, ApiError> {
        let item: RepoItem = serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::Decode(format!("unexpected search item: {}", e)))?;

        let api = self.api.as_ref();
        let name = item.full_name.as_str();
        let readme = with_retry(&self.retry, "GitHub README", move || api.readme(name)).await?;

        Ok(repository_document(item, readme, raw))
    }
}

// ============================================================================
// Tests
// ============================================================================
