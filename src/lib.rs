//! insight-agent - 토픽 수집 + 추출형 QA
//!
//! GitHub 저장소 / Reddit 게시물을 검색해 공통 `Document`로 정규화하고,
//! 로컬 JSON 아티팩트로 저장한 뒤 집계하거나 문서 본문에 질문합니다.

pub mod analysis;
pub mod cli;
pub mod connector;
pub mod error;
pub mod knowledge;
pub mod qa;

// Re-exports
pub use analysis::{count_mentions, rank_by_mentions, top_by_metric, MentionCounts};
pub use connector::{
    ApiError, Connector, ForumApi, ForumConnector, RepositoryApi, RepositoryConnector,
    RetryPolicy,
};
pub use error::{InsightError, Result};
pub use knowledge::{get_data_dir, ArtifactInfo, Document, DocumentStore, FetchResult, Source};
pub use qa::{Answer, LazyModel, OnnxQaModel, QaEngine, QaModel};
