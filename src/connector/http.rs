//! HTTP 공통 - API 에러 분류 + 요청 간격 제어
//!
//! 각 소스 클라이언트는 모든 요청(재시도 포함) 전에 `RateLimiter::acquire`를 호출합니다.

use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use thiserror::Error;

/// User-Agent (GitHub/Reddit 모두 필수)
pub const USER_AGENT: &str = concat!("insight-agent/", env!("CARGO_PKG_VERSION"));

/// 요청 타임아웃
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ApiError
// ============================================================================

/// 외부 API 호출 결과 분류
///
/// 커넥터 밖으로는 `SourceUnavailable`의 원인으로만 전달됩니다.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 429 또는 쿼터 소진 (API가 알려준 대기 시간)
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// 네트워크 오류, 타임아웃, 5xx
    #[error("transient failure: {0}")]
    Transient(String),

    /// 인증 실패
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// 그 외 4xx
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 응답 파싱 실패
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// 재시도 대상 여부
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. } | ApiError::Transient(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transient(err.to_string())
        }
    }
}

/// 응답 본문 요약 (에러 메시지용)
pub fn truncate_body(body: &str) -> String {
    const MAX_CHARS: usize = 300;
    if body.chars().count() <= MAX_CHARS {
        body.trim().to_string()
    } else {
        let truncated: String = body.chars().take(MAX_CHARS).collect();
        format!("{}...", truncated.trim())
    }
}

/// 정수 헤더 값 읽기 (소수점 값은 올림)
pub fn header_secs(headers: &HeaderMap, name: &str) -> Option<u64> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|v| v.max(0.0).ceil() as u64))
}

/// reqwest 클라이언트 생성
pub fn build_client() -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ApiError::Transient(format!("failed to create HTTP client: {}", e)))
}

// ============================================================================
// RateLimiter
// ============================================================================

/// 요청 간격 설정
#[derive(Debug, Clone, Copy)]
pub struct PacingConfig {
    /// 윈도우당 최대 요청 수
    pub max_requests: u32,
    pub window: Duration,
    /// 요청 간 최소 딜레이 (버스트 방지)
    pub min_delay: Duration,
}

impl PacingConfig {
    /// GitHub 검색 쿼터 (인증 시 30 RPM)
    pub fn github() -> Self {
        Self {
            max_requests: 30,
            window: Duration::from_secs(60),
            min_delay: Duration::from_millis(250),
        }
    }

    /// Reddit OAuth 쿼터 (60 RPM)
    pub fn reddit() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            min_delay: Duration::from_millis(1000),
        }
    }

    /// 제한 없음 (테스트용)
    pub fn unlimited() -> Self {
        Self {
            max_requests: u32::MAX,
            window: Duration::from_secs(60),
            min_delay: Duration::ZERO,
        }
    }
}

/// Sliding window rate limiter with minimum delay between requests
#[derive(Debug)]
pub struct RateLimiter {
    requests: Vec<Instant>,
    config: PacingConfig,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            requests: Vec::new(),
            config,
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    pub async fn acquire(&mut self) {
        // 1. 최소 딜레이 적용
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.config.min_delay {
                let wait_time = self.config.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();
        let window = self.config.window;

        // 2. 윈도우 밖의 오래된 요청 제거
        self.requests.retain(|&t| now.duration_since(t) < window);

        // 3. 윈도우 한도 초과 시 대기
        if self.requests.len() >= self.config.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Request quota reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < window);
            }
        }

        // 4. 현재 요청 기록
        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }

    /// 윈도우 내 기록된 요청 수
    pub fn in_window(&self) -> usize {
        self.requests.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retryable_classification() {
        assert!(ApiError::RateLimited { retry_after: None }.is_retryable());
        assert!(ApiError::Transient("reset".into()).is_retryable());
        assert!(!ApiError::Unauthorized("bad token".into()).is_retryable());
        assert!(!ApiError::NotFound("x".into()).is_retryable());
        assert!(!ApiError::Status {
            status: 422,
            body: String::new()
        }
        .is_retryable());
        assert!(!ApiError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn test_header_secs() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("12"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("3.2"));
        headers.insert("x-broken", HeaderValue::from_static("soon"));

        assert_eq!(header_secs(&headers, "retry-after"), Some(12));
        assert_eq!(header_secs(&headers, "x-ratelimit-reset"), Some(4));
        assert_eq!(header_secs(&headers, "x-broken"), None);
        assert_eq!(header_secs(&headers, "x-missing"), None);
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("  short  "), "short");
        let long = "x".repeat(500);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 303);
    }

    #[tokio::test]
    async fn test_rate_limiter_records_requests() {
        let mut limiter = RateLimiter::new(PacingConfig::unlimited());
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.in_window(), 5);
    }

    #[tokio::test]
    async fn test_rate_limiter_min_delay() {
        let mut limiter = RateLimiter::new(PacingConfig {
            max_requests: 100,
            window: Duration::from_secs(60),
            min_delay: Duration::from_millis(30),
        });

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
