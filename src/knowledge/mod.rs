//! Knowledge 모듈 - 정규화 레코드 + 로컬 JSON 저장소
//!
//! - model: `Document`, `FetchResult`, `Source`
//! - store: 쓰기 전용 JSON 아티팩트 저장소

mod model;
mod store;

// Re-exports
pub use model::{Document, FetchResult, Source};
pub use store::{get_data_dir, slugify, ArtifactInfo, DocumentStore, DATA_DIR_ENV};
