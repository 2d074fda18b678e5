//! QA 모듈 - 문서 본문에 대한 추출형 질의응답
//!
//! 저장된 FetchResult에서 문서 하나를 골라 본문을 context로 삼고,
//! 추출형 QA 모델이 답 구간(문자 오프셋)과 신뢰도를 반환합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let engine = QaEngine::onnx_default();
//! let answer = engine.ask("What license is used?", &store, &path, 0)?;
//! ```

mod onnx;

pub use onnx::{get_model_dir, ModelLocation, OnnxQaModel, MODEL_DIR_ENV, MODEL_REPO};

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::error::{InsightError, Result};
use crate::knowledge::DocumentStore;

// ============================================================================
// Types
// ============================================================================

/// 추출된 답
///
/// 오프셋은 context 기준 문자(char) 단위이며 `end_offset`은 포함하지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub confidence: f32,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Answer {
    /// 빈 context에 대한 답
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            start_offset: 0,
            end_offset: 0,
        }
    }
}

// ============================================================================
// QaModel Trait
// ============================================================================

/// 추출형 QA 모델
///
/// 호출 간 상태를 갖지 않으며, 반환하는 `text`는 context의 부분 문자열입니다.
pub trait QaModel: Send + Sync {
    fn answer(&self, question: &str, context: &str) -> Result<Answer>;

    /// 모델 이름
    fn name(&self) -> &str;
}

type ModelLoader = Box<dyn Fn() -> Result<Arc<dyn QaModel>> + Send + Sync>;

/// 최초 사용 시 한 번만 로드되는 모델
///
/// 로드 실패는 기억하지 않으므로 다음 호출에서 다시 시도합니다.
pub struct LazyModel {
    loader: ModelLoader,
    model: Mutex<Option<Arc<dyn QaModel>>>,
}

impl LazyModel {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn QaModel>> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            model: Mutex::new(None),
        }
    }

    /// 이미 로드된 모델로 생성
    pub fn ready(model: Arc<dyn QaModel>) -> Self {
        Self {
            loader: Box::new(|| {
                Err(InsightError::Model("model loader not configured".to_string()))
            }),
            model: Mutex::new(Some(model)),
        }
    }

    /// 모델 획득 (필요 시 로드)
    ///
    /// 잠금을 쥔 채로 로드하므로 동시 호출에서도 로더는 한 번만 실행됩니다.
    pub fn get(&self) -> Result<Arc<dyn QaModel>> {
        let mut slot = self
            .model
            .lock()
            .map_err(|_| InsightError::Model("model lock poisoned".to_string()))?;

        if let Some(ref model) = *slot {
            return Ok(Arc::clone(model));
        }

        tracing::info!("Loading QA model...");
        let model = (self.loader)()?;
        tracing::info!("QA model ready: {}", model.name());
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

// ============================================================================
// QaEngine
// ============================================================================

/// QA 엔진 (모델 호출 조율)
pub struct QaEngine {
    model: LazyModel,
}

impl QaEngine {
    pub fn new(model: LazyModel) -> Self {
        Self { model }
    }

    /// 로컬 ONNX 모델(distilbert SQuAD)을 쓰는 엔진
    pub fn onnx_default() -> Self {
        Self::new(LazyModel::new(|| {
            let location = ModelLocation::from_env();
            let model = OnnxQaModel::load(&location.dir, location.allow_download)?;
            Ok(Arc::new(model) as Arc<dyn QaModel>)
        }))
    }

    /// question + context -> 답
    ///
    /// 공백뿐인 context는 모델을 호출하지 않고 빈 답을 반환합니다.
    pub fn answer(&self, question: &str, context: &str) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(InsightError::InvalidArgument(
                "question must not be empty".to_string(),
            ));
        }

        if context.trim().is_empty() {
            tracing::debug!("Empty context, skipping model invocation");
            return Ok(Answer::empty());
        }

        self.model.get()?.answer(question, context)
    }

    /// 저장된 FetchResult의 `index`번째 문서 본문에 질문
    pub fn ask(
        &self,
        question: &str,
        store: &DocumentStore,
        location: &Path,
        index: usize,
    ) -> Result<Answer> {
        let result = store.read(location)?;

        let document = result
            .documents
            .get(index)
            .ok_or(InsightError::IndexOutOfRange {
                index,
                len: result.documents.len(),
            })?;

        tracing::info!("Asking document #{} ({})", index, document.title);
        self.answer(question, &document.body)
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model.is_loaded()
    }
}

/// context의 문자 구간 추출
pub(crate) fn char_slice(context: &str, start: usize, end: usize) -> String {
    context
        .chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Document, FetchResult, Source};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// 질문 키워드로 정해진 구간을 찾는 스텁 모델
    struct StubModel {
        calls: Arc<AtomicUsize>,
    }

    impl QaModel for StubModel {
        fn answer(&self, question: &str, context: &str) -> Result<Answer> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let needle = if question.to_lowercase().contains("license") {
                "MIT"
            } else {
                "Rust"
            };

            let answer = context
                .find(needle)
                .map(|byte_start| {
                    let start = context[..byte_start].chars().count();
                    let end = start + needle.chars().count();
                    Answer {
                        text: char_slice(context, start, end),
                        confidence: 0.87,
                        start_offset: start,
                        end_offset: end,
                    }
                })
                .unwrap_or_else(Answer::empty);
            Ok(answer)
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    struct Counters {
        loads: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    fn stub_engine() -> (QaEngine, Counters) {
        let loads = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let (loader_loads, model_calls) = (Arc::clone(&loads), Arc::clone(&calls));
        let engine = QaEngine::new(LazyModel::new(move || {
            loader_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubModel {
                calls: Arc::clone(&model_calls),
            }) as Arc<dyn QaModel>)
        }));

        (engine, Counters { loads, calls })
    }

    fn doc(id: &str, body: &str) -> Document {
        Document {
            source: Source::Repository,
            id: id.to_string(),
            title: format!("owner/{}", id),
            body: body.to_string(),
            metric: 1,
            tags: vec![],
            raw: json!({"id": id}),
        }
    }

    fn stored(docs: Vec<Document>) -> (TempDir, DocumentStore, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(dir.path());
        let result = FetchResult::new(Source::Repository, "licenses", None, docs.len(), docs);
        let path = store.write(&result).unwrap();
        (dir, store, path)
    }

    #[test]
    fn test_ask_license_scenario() {
        let (engine, counters) = stub_engine();
        let (_dir, store, path) = stored(vec![doc(
            "lib",
            "A small library.\nLicensed under MIT.",
        )]);

        let answer = engine
            .ask("What license is used?", &store, &path, 0)
            .unwrap();
        assert_eq!(answer.text, "MIT");
        assert!(answer.confidence > 0.0);
        assert_eq!(
            char_slice(
                "A small library.\nLicensed under MIT.",
                answer.start_offset,
                answer.end_offset
            ),
            "MIT"
        );
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ask_index_out_of_range() {
        let (engine, counters) = stub_engine();
        let (_dir, store, path) = stored(vec![doc("a", "x"), doc("b", "y"), doc("c", "z")]);

        match engine.ask("What?", &store, &path, 99) {
            Err(InsightError::IndexOutOfRange { index, len }) => {
                assert_eq!(index, 99);
                assert_eq!(len, 3);
            }
            other => panic!("expected IndexOutOfRange, got {:?}", other),
        }
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ask_missing_artifact() {
        let (engine, _) = stub_engine();
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open(dir.path());

        assert!(matches!(
            engine.ask("What?", &store, &dir.path().join("missing.json"), 0),
            Err(InsightError::NotFound(_))
        ));
    }

    #[test]
    fn test_empty_body_short_circuits() {
        let (engine, counters) = stub_engine();

        for context in ["", "   \n\t "] {
            let answer = engine.answer("What license is used?", context).unwrap();
            assert_eq!(answer, Answer::empty());
        }

        assert_eq!(counters.calls.load(Ordering::SeqCst), 0);
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
        assert!(!engine.is_model_loaded());
    }

    #[test]
    fn test_empty_question_is_invalid() {
        let (engine, _) = stub_engine();
        assert!(matches!(
            engine.answer("  ", "Licensed under MIT."),
            Err(InsightError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_model_loads_once() {
        let (engine, counters) = stub_engine();

        for _ in 0..5 {
            engine.answer("Which language?", "Written in Rust.").unwrap();
        }

        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
        assert_eq!(counters.calls.load(Ordering::SeqCst), 5);
        assert!(engine.is_model_loaded());
    }

    #[test]
    fn test_model_loads_once_across_threads() {
        let (engine, counters) = stub_engine();
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || engine.answer("Which language?", "Rust").unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let lazy = LazyModel::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(InsightError::Model("download interrupted".to_string()))
            } else {
                Ok(Arc::new(StubModel {
                    calls: Arc::new(AtomicUsize::new(0)),
                }) as Arc<dyn QaModel>)
            }
        });

        assert!(matches!(lazy.get(), Err(InsightError::Model(_))));
        assert!(!lazy.is_loaded());
        assert!(lazy.get().is_ok());
        assert!(lazy.get().is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_char_slice_unicode() {
        let context = "라이선스: MIT 입니다";
        assert_eq!(char_slice(context, 6, 9), "MIT");
        assert_eq!(char_slice(context, 3, 3), "");
        assert_eq!(char_slice(context, 100, 120), "");
    }
}
