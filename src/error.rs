//! 에러 타입 정의
//!
//! 라이브러리 계층은 `InsightError`로 실패를 분류하고,
//! CLI 계층(anyhow)은 이를 다운캐스트하여 종료 코드를 결정합니다.

use std::path::PathBuf;

use thiserror::Error;

/// insight-agent 공통 에러
#[derive(Debug, Error)]
pub enum InsightError {
    /// 잘못된 사용자 입력 (limit <= 0, 빈 검색어, 설정 누락 등)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 외부 API 사용 불가 (재시도 소진, 인증 실패, 모든 상세 조회 실패)
    #[error("{source_name} unavailable: {cause}")]
    SourceUnavailable { source_name: String, cause: String },

    /// 아티팩트 없음
    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    /// 아티팩트 스키마 불일치
    #[error("corrupt artifact {}: {cause}", path.display())]
    CorruptData { path: PathBuf, cause: String },

    /// ask 인덱스 범위 초과
    #[error("index {index} out of range (documents: {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// QA 모델 로드/추론 실패
    #[error("QA model error: {0}")]
    Model(String),

    /// 저장소 파일시스템 에러
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InsightError {
    /// CLI 종료 코드
    ///
    /// 2: 잘못된 인자, 3: 아티팩트 없음, 4: 손상된 아티팩트, 5: 소스/모델 실패
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) | Self::IndexOutOfRange { .. } => 2,
            Self::NotFound(_) => 3,
            Self::CorruptData { .. } => 4,
            Self::SourceUnavailable { .. } | Self::Model(_) => 5,
            Self::Io(_) => 1,
        }
    }

    pub(crate) fn source_unavailable(source_name: &str, cause: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// 라이브러리 결과 타입
pub type Result<T> = std::result::Result<T, InsightError>;
