//! Document Store - JSON 아티팩트 기반 지식 저장소
//!
//! 수집 결과(`FetchResult`)를 타임스탬프가 붙은 JSON 파일로 저장하고 다시 읽습니다.
//! 쓰기 전용(write-once) 저장소이며 수정/삭제 연산은 없습니다.
//! 저장 위치: $INSIGHT_AGENT_DATA_DIR 또는 ~/.local/share/insight-agent/

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use regex::Regex;
use tempfile::NamedTempFile;

use super::model::FetchResult;
use crate::error::{InsightError, Result};

/// 데이터 디렉토리 환경변수
pub const DATA_DIR_ENV: &str = "INSIGHT_AGENT_DATA_DIR";

/// 파일명 슬러그 최대 길이
const MAX_SLUG_CHARS: usize = 60;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로
///
/// 우선순위:
/// 1. `INSIGHT_AGENT_DATA_DIR` 환경변수
/// 2. 플랫폼 데이터 디렉토리 (~/.local/share/insight-agent/)
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("insight-agent")
}

// ============================================================================
// Types
// ============================================================================

/// 저장된 아티팩트 정보
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: Option<SystemTime>,
}

// ============================================================================
// DocumentStore
// ============================================================================

/// JSON 파일 저장소
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// 지정 디렉토리에 저장소 열기 (디렉토리는 첫 쓰기 시 생성)
    pub fn open(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// 기본 위치에서 열기
    pub fn open_default() -> Self {
        Self::open(&get_data_dir())
    }

    /// 저장소 루트
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 수집 결과 저장
    ///
    /// 같은 디렉토리의 임시 파일에 쓴 뒤 최종 이름으로 persist 합니다.
    /// 이름이 이미 있으면 `-1`, `-2`, ... 접미사를 붙입니다.
    pub fn write(&self, result: &FetchResult) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;

        let json = serde_json::to_vec_pretty(result).map_err(|e| {
            InsightError::Io(std::io::Error::new(ErrorKind::InvalidData, e))
        })?;

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;

        let stem = artifact_stem(result);
        let mut attempt = 0usize;

        loop {
            let name = if attempt == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}-{}.json", stem, attempt)
            };
            let path = self.root.join(name);

            match tmp.persist_noclobber(&path) {
                Ok(_) => {
                    tracing::info!(
                        "Saved {} documents to {}",
                        result.documents.len(),
                        path.display()
                    );
                    return Ok(path);
                }
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!("Artifact name taken: {}", path.display());
                    tmp = e.file;
                    attempt += 1;
                }
                Err(e) => return Err(InsightError::Io(e.error)),
            }
        }
    }

    /// 아티팩트 읽기
    ///
    /// 없으면 `NotFound`, 스키마 불일치면 `CorruptData`.
    pub fn read(&self, location: &Path) -> Result<FetchResult> {
        let bytes = match std::fs::read(location) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(InsightError::NotFound(location.to_path_buf()));
            }
            Err(e) => return Err(InsightError::Io(e)),
        };

        let result = serde_json::from_slice(&bytes).map_err(|e| InsightError::CorruptData {
            path: location.to_path_buf(),
            cause: e.to_string(),
        })?;

        tracing::debug!("Loaded artifact {}", location.display());
        Ok(result)
    }

    /// 저장된 아티팩트 목록 (최신순)
    pub fn list(&self) -> Result<Vec<ArtifactInfo>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(InsightError::Io(e)),
        };

        let mut artifacts = Vec::new();

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            artifacts.push(ArtifactInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size: metadata.len(),
                modified_at: metadata.modified().ok(),
            });
        }

        artifacts.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.name.cmp(&a.name))
        });

        Ok(artifacts)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 아티팩트 파일명 (확장자 제외)
///
/// `{source}_{slug}_{YYYYMMDDHHMMSSmmm}` (포럼은 `{source}_{community}_{slug}_{ts}`)
fn artifact_stem(result: &FetchResult) -> String {
    let timestamp = result.fetched_at.format("%Y%m%d%H%M%S%3f");
    let slug = slugify(&result.query);

    match result.community.as_deref() {
        Some(community) => format!(
            "{}_{}_{}_{}",
            result.source,
            slugify(community),
            slug,
            timestamp
        ),
        None => format!("{}_{}_{}", result.source, slug, timestamp),
    }
}

/// 영숫자 이외 문자열 (한 번만 컴파일)
fn slug_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"[^\p{Alphabetic}\p{N}]+").expect("Invalid regex"))
}

/// 파일시스템 안전 슬러그
///
/// 소문자화, 영숫자 이외 문자열은 `_` 하나로 치환, 양끝 `_` 제거, 길이 제한.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();

    let replaced = slug_separator().replace_all(&lowered, "_");

    let slug: String = replaced
        .trim_matches('_')
        .chars()
        .take(MAX_SLUG_CHARS)
        .collect();
    let slug = slug.trim_end_matches('_');

    if slug.is_empty() {
        "query".to_string()
    } else {
        slug.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
