//! 재시도 정책 - 제한된 횟수의 지수 백오프 루프
//!
//! 재시도 대상(rate limit, 일시 오류)만 재시도하고, 나머지는 즉시 반환합니다.
//! 재시도 소진을 `SourceUnavailable`로 바꿀지는 호출하는 커넥터가 결정합니다.

use std::future::Future;
use std::time::Duration;

use super::http::ApiError;

/// 최대 재시도 횟수 (총 시도 = MAX_RETRIES + 1)
const MAX_RETRIES: u32 = 3;
/// 초기 백오프
const INITIAL_BACKOFF_MS: u64 = 2000;
/// 백오프 상한 (API가 알려준 대기 시간에도 적용)
const MAX_BACKOFF_SECS: u64 = 60;

/// 재시도 정책
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    /// 대기 없이 재시도 (테스트용)
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// `attempt`번째(0-based) 실패 후 대기 시간
    pub fn delay_for(&self, attempt: u32, error: &ApiError) -> Duration {
        let computed = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt));

        let delay = match error {
            ApiError::RateLimited {
                retry_after: Some(after),
            } => *after,
            _ => computed,
        };

        delay.min(self.max_backoff)
    }
}

/// 재시도 루프
///
/// `op`는 매 시도마다 새 future를 만듭니다.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let backoff = policy.delay_for(attempt, &e);
                tracing::warn!(
                    "{} failed ({}), retrying in {:?} (attempt {}/{})",
                    what,
                    e,
                    backoff,
                    attempt + 1,
                    policy.max_retries
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
