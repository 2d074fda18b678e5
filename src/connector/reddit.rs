//! Reddit 게시물 커넥터
//!
//! 서브레딧 범위 검색(`/r/{community}/search?restrict_sr=1`) 후
//! 각 게시물의 상위 댓글(`/r/{community}/comments/{id}?sort=top`)을 본문에 합칩니다.
//!
//! source: https://www.reddit.com/dev/api/#GET_search

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::http::{build_client, header_secs, truncate_body, ApiError, PacingConfig, RateLimiter};
use super::retry::{with_retry, RetryPolicy};
use super::{item_label, validate_request, DetailTally};
use crate::error::{InsightError, Result};
use crate::knowledge::{Document, FetchResult, Source};

/// OAuth 토큰 엔드포인트
pub const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
/// OAuth API 기본 URL
pub const REDDIT_API_URL: &str = "https://oauth.reddit.com";

/// 검색 API 페이지 크기 상한
const PAGE_SIZE: usize = 100;
/// 본문에 합칠 상위 댓글 수
pub const TOP_COMMENTS: usize = 3;
/// 합친 본문 최대 길이 (문자)
pub const MAX_BODY_CHARS: usize = 8000;

const SOURCE_NAME: &str = "Reddit";

// ============================================================================
// Search Order
// ============================================================================

/// 검색 정렬 기준 (`sort`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SearchSort {
    #[default]
    Relevance,
    Hot,
    Top,
    New,
    Comments,
}

impl SearchSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSort::Relevance => "relevance",
            SearchSort::Hot => "hot",
            SearchSort::Top => "top",
            SearchSort::New => "new",
            SearchSort::Comments => "comments",
        }
    }
}

/// 검색 기간 (`t`, top/comments 정렬에서 의미 있음)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    #[default]
    All,
}

impl TimeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

/// 포럼 검색 순서 (기본: relevance, all)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchOrder {
    pub sort: SearchSort,
    pub time: TimeFilter,
}

// ============================================================================
// ForumApi Trait
// ============================================================================

/// 검색 결과 한 페이지
#[derive(Debug, Clone, Default)]
pub struct PostSearchPage {
    /// 게시물 (t3 data, 원본 JSON)
    pub posts: Vec<Value>,
    /// 다음 페이지 커서
    pub after: Option<String>,
}

/// 댓글
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub score: i64,
}

/// 포럼 API
#[async_trait]
pub trait ForumApi: Send + Sync {
    /// 커뮤니티 범위 검색
    async fn search_posts(
        &self,
        community: &str,
        query: &str,
        order: SearchOrder,
        after: Option<&str>,
        limit: u32,
    ) -> std::result::Result<PostSearchPage, ApiError>;

    /// 점수 상위 댓글 (최상위 댓글만)
    async fn top_comments(
        &self,
        community: &str,
        post_id: &str,
        limit: u32,
    ) -> std::result::Result<Vec<Comment>, ApiError>;
}

// ============================================================================
// Credentials
// ============================================================================

/// Reddit 스크립트 앱 자격 증명 (password grant)
#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RedditCredentials {
    /// 환경변수 이름
    pub const ENV_VARS: [&'static str; 4] = [
        "REDDIT_CLIENT_ID",
        "REDDIT_CLIENT_SECRET",
        "REDDIT_USERNAME",
        "REDDIT_PASSWORD",
    ];

    /// 환경변수에서 로드 (하나라도 없으면 InvalidArgument)
    pub fn from_env() -> Result<Self> {
        let values: Vec<Option<String>> = Self::ENV_VARS
            .iter()
            .map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
            .collect();

        let missing: Vec<&str> = Self::ENV_VARS
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(InsightError::InvalidArgument(format!(
                "Reddit credentials not set: {}",
                missing.join(", ")
            )));
        }

        let mut values = values.into_iter().flatten();
        let mut next = || values.next().unwrap_or_default();

        Ok(Self {
            client_id: next(),
            client_secret: next(),
            username: next(),
            password: next(),
        })
    }

    /// 자격 증명 설정 여부
    pub fn is_configured() -> bool {
        Self::ENV_VARS
            .iter()
            .all(|name| std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false))
    }
}

// ============================================================================
// Reddit Client
// ============================================================================

/// Reddit 클라이언트 설정
#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub auth_url: String,
    pub api_base: String,
    pub pacing: PacingConfig,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            auth_url: REDDIT_AUTH_URL.to_string(),
            api_base: REDDIT_API_URL.to_string(),
            pacing: PacingConfig::reddit(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Reddit Listing 응답
#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Thing>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Thing {
    kind: String,
    data: Value,
}

/// Reddit OAuth 클라이언트
pub struct RedditClient {
    client: reqwest::Client,
    credentials: RedditCredentials,
    config: RedditConfig,
    /// 프로세스 수명 동안 재사용하는 bearer 토큰
    token: Mutex<Option<String>>,
    rate_limiter: Mutex<RateLimiter>,
}

impl RedditClient {
    pub fn new(
        credentials: RedditCredentials,
        config: RedditConfig,
    ) -> std::result::Result<Self, ApiError> {
        Ok(Self {
            client: build_client()?,
            credentials,
            rate_limiter: Mutex::new(RateLimiter::new(config.pacing)),
            config,
            token: Mutex::new(None),
        })
    }

    /// bearer 토큰 (최초 1회 발급)
    async fn access_token(&self) -> std::result::Result<String, ApiError> {
        let mut cached = self.token.lock().await;
        if let Some(ref token) = *cached {
            return Ok(token.clone());
        }

        self.rate_limiter.lock().await.acquire().await;

        let response = self
            .client
            .post(&self.config.auth_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &headers, &body));
        }

        let token: TokenResponse = response.json().await?;
        match (token.access_token, token.error) {
            (Some(access_token), _) => {
                tracing::debug!("Obtained Reddit access token");
                *cached = Some(access_token.clone());
                Ok(access_token)
            }
            (None, error) => Err(ApiError::Unauthorized(
                error.unwrap_or_else(|| "no access token in response".to_string()),
            )),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// 인증된 GET 요청
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<reqwest::Response, ApiError> {
        let token = self.access_token().await?;

        self.rate_limiter.lock().await.acquire().await;

        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &headers, &body))
    }
}

#[async_trait]
impl ForumApi for RedditClient {
    async fn search_posts(
        &self,
        community: &str,
        query: &str,
        order: SearchOrder,
        after: Option<&str>,
        limit: u32,
    ) -> std::result::Result<PostSearchPage, ApiError> {
        let url = self.endpoint(&format!("r/{}/search", community));
        let mut params = vec![
            ("q", query.to_string()),
            ("restrict_sr", "1".to_string()),
            ("sort", order.sort.as_str().to_string()),
            ("t", order.time.as_str().to_string()),
            ("limit", limit.to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(cursor) = after {
            params.push(("after", cursor.to_string()));
        }

        let listing: Listing = self.get(&url, &params).await?.json().await?;
        Ok(search_page(listing))
    }

    async fn top_comments(
        &self,
        community: &str,
        post_id: &str,
        limit: u32,
    ) -> std::result::Result<Vec<Comment>, ApiError> {
        let url = self.endpoint(&format!("r/{}/comments/{}", community, post_id));
        let params = [
            ("sort", "top".to_string()),
            ("limit", limit.to_string()),
            ("depth", "1".to_string()),
            ("raw_json", "1".to_string()),
        ];

        let listings: Vec<Listing> = self.get(&url, &params).await?.json().await?;
        Ok(comments_from(listings))
    }
}

/// 실패 응답 분류
///
/// Reddit의 x-ratelimit-reset 은 리셋까지 남은 초입니다.
/// source: https://support.reddithelp.com/hc/en-us/articles/16160319875092-Reddit-Data-API-Wiki
fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> ApiError {
    match status.as_u16() {
        429 => ApiError::RateLimited {
            retry_after: header_secs(headers, "retry-after")
                .or_else(|| header_secs(headers, "x-ratelimit-reset"))
                .map(Duration::from_secs),
        },
        401 => ApiError::Unauthorized(truncate_body(body)),
        404 => ApiError::NotFound(truncate_body(body)),
        500..=599 => ApiError::Transient(format!("HTTP {}", status)),
        code => ApiError::Status {
            status: code,
            body: truncate_body(body),
        },
    }
}

/// 검색 Listing -> 게시물 목록
fn search_page(listing: Listing) -> PostSearchPage {
    let posts = listing
        .data
        .children
        .into_iter()
        .filter(|thing| thing.kind == "t3")
        .map(|thing| thing.data)
        .collect();

    PostSearchPage {
        posts,
        after: listing.data.after,
    }
}

/// 댓글 페이지 응답([게시물 Listing, 댓글 Listing]) -> 댓글 목록
///
/// "more" 자리표시자는 제외합니다.
fn comments_from(listings: Vec<Listing>) -> Vec<Comment> {
    listings
        .into_iter()
        .nth(1)
        .map(|listing| {
            listing
                .data
                .children
                .into_iter()
                .filter(|thing| thing.kind == "t1")
                .filter_map(|thing| serde_json::from_value::<Comment>(thing.data).ok())
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Forum Connector
// ============================================================================

/// 게시물 항목에서 필요한 필드
#[derive(Debug, Deserialize)]
struct PostItem {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    score: i64,
}

/// 게시물 본문 + 상위 댓글 결합
///
/// 본문 다음에 점수 내림차순(동점은 API 순서) 상위 댓글을 빈 줄로 구분해 붙이고,
/// 삭제된 댓글은 제외하며, 전체 길이는 `MAX_BODY_CHARS`로 자릅니다.
pub fn compose_forum_body(selftext: &str, comments: &[Comment]) -> String {
    let mut ranked: Vec<&Comment> = comments
        .iter()
        .filter(|c| {
            let body = c.body.trim();
            !body.is_empty() && body != "[deleted]" && body != "[removed]"
        })
        .collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));

    let parts: Vec<&str> = std::iter::once(selftext.trim())
        .chain(ranked.iter().take(TOP_COMMENTS).map(|c| c.body.trim()))
        .filter(|part| !part.is_empty())
        .collect();

    let joined = parts.join("\n\n");
    if joined.chars().count() <= MAX_BODY_CHARS {
        joined
    } else {
        joined.chars().take(MAX_BODY_CHARS).collect()
    }
}

/// 게시물 항목 -> Document
fn forum_document(item: PostItem, comments: &[Comment], raw: Value) -> Document {
    Document {
        source: Source::ForumPost,
        id: item.id,
        title: item.title,
        body: compose_forum_body(&item.selftext, comments),
        metric: item.score,
        tags: vec![],
        raw,
    }
}

/// 포럼 커넥터 (서브레딧 하나로 범위 제한)
pub struct ForumConnector {
    api: Arc<dyn ForumApi>,
    community: String,
    order: SearchOrder,
    retry: RetryPolicy,
}

impl ForumConnector {
    pub fn new(api: Arc<dyn ForumApi>, community: &str, retry: RetryPolicy) -> Result<Self> {
        let community = community.trim().trim_start_matches("r/").to_string();
        let valid = !community.is_empty()
            && community
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(InsightError::InvalidArgument(format!(
                "invalid subreddit name '{}'",
                community
            )));
        }

        Ok(Self {
            api,
            community,
            order: SearchOrder::default(),
            retry,
        })
    }

    /// 검색 정렬/기간 지정
    pub fn with_order(mut self, order: SearchOrder) -> Self {
        self.order = order;
        self
    }

    /// 환경변수 자격 증명으로 Reddit 커넥터 생성
    pub fn from_env(community: &str, order: SearchOrder) -> Result<Self> {
        let credentials = RedditCredentials::from_env()?;
        let client = RedditClient::new(credentials, RedditConfig::default())
            .map_err(|e| InsightError::source_unavailable(SOURCE_NAME, e))?;
        Ok(Self::new(Arc::new(client), community, RetryPolicy::default())?.with_order(order))
    }

    pub fn community(&self) -> &str {
        &self.community
    }

    /// 게시물 검색 + 상위 댓글 수집
    ///
    /// 댓글 조회에 실패한 게시물은 건너뛰고 다음 후보로 채웁니다.
    pub async fn fetch(&self, query: &str, limit: usize) -> Result<FetchResult> {
        validate_request(query, limit)?;

        tracing::info!(
            "Fetching Reddit posts from r/{} for '{}' (limit {}, sort {}, time {})",
            self.community,
            query,
            limit,
            self.order.sort.as_str(),
            self.order.time.as_str()
        );

        let api = self.api.as_ref();
        let community = self.community.as_str();
        let order = self.order;
        let page_size = limit.min(PAGE_SIZE) as u32;
        let mut documents = Vec::with_capacity(limit);
        let mut tally = DetailTally::default();
        let mut after: Option<String> = None;

        'pages: loop {
            let cursor = after.as_deref();
            let page = with_retry(&self.retry, "Reddit search", move || {
                api.search_posts(community, query, order, cursor, page_size)
            })
            .await
            .map_err(|e| InsightError::source_unavailable(SOURCE_NAME, e))?;

            let received = page.posts.len();

            for raw in page.posts {
                if documents.len() >= limit {
                    break 'pages;
                }

                let label = item_label(&raw, "id");
                match self.document_for(raw).await {
                    Ok(doc) => {
                        tracing::info!("  - Added Reddit post: {}", doc.title);
                        documents.push(doc);
                    }
                    Err(e) => tally.skip(SOURCE_NAME, &label, e)?,
                }
            }

            match page.after {
                Some(next) if documents.len() < limit && received > 0 => after = Some(next),
                _ => break,
            }
        }

        tally.finish(SOURCE_NAME, documents.len())?;

        Ok(FetchResult::new(
            Source::ForumPost,
            query,
            Some(self.community.clone()),
            limit,
            documents,
        ))
    }

    /// 게시물 하나의 상세 조회 (상위 댓글)
    async fn document_for(&self, raw: Value) -> std::result::Result<Document, ApiError> {
        let item: PostItem = serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::Decode(format!("unexpected search item: {}", e)))?;

        let api = self.api.as_ref();
        let community = self.community.as_str();
        let post_id = item.id.as_str();
        let comments = with_retry(&self.retry, "Reddit comments", move || {
            api.top_comments(community, post_id, TOP_COMMENTS as u32)
        })
        .await?;

        Ok(forum_document(item, &comments, raw))
    }
}

// ============================================================================
// Tests
// ============================================================================
