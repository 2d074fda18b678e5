//! 로컬 ONNX 추출형 QA 모델 (distilbert-base-cased-distilled-squad)
//!
//! tract-onnx로 추론하고 tokenizers로 토큰화합니다.
//! 모델 파일은 `$INSIGHT_AGENT_MODEL_DIR`에서 읽거나, 없으면
//! Hugging Face Hub에서 캐시 디렉토리로 한 번 내려받습니다.
//!
//! source: https://huggingface.co/Xenova/distilbert-base-cased-distilled-squad

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokenizers::Tokenizer;
use tract_onnx::prelude::*;

use super::{char_slice, Answer, QaModel};
use crate::connector::USER_AGENT;
use crate::error::{InsightError, Result};

/// 모델 디렉토리 환경변수
pub const MODEL_DIR_ENV: &str = "INSIGHT_AGENT_MODEL_DIR";

/// Hugging Face 모델 저장소
pub const MODEL_REPO: &str = "Xenova/distilbert-base-cased-distilled-squad";

/// Hugging Face Hub 기본 URL
const HF_HUB_URL: &str = "https://huggingface.co";
/// 다운로드 연결 타임아웃 (본문 수신 시간은 제한하지 않음)
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const MODEL_FILE: &str = "onnx/model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// 입력 시퀀스 길이 (고정, 패딩)
const MAX_SEQ_LEN: usize = 384;
/// 윈도우 간 겹치는 토큰 수
const DOC_STRIDE: usize = 128;
/// 질문 최대 토큰 수
const MAX_QUESTION_TOKENS: usize = 64;
/// 답 구간 최대 토큰 수
const MAX_ANSWER_TOKENS: usize = 30;

type RunFn = Box<dyn Fn(TVec<TValue>) -> TractResult<TVec<TValue>> + Send + Sync>;

/// 모델 파일 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLocation {
    pub dir: PathBuf,
    /// 없는 파일을 Hub에서 받아도 되는지 (명시한 디렉토리는 받지 않음)
    pub allow_download: bool,
}

impl ModelLocation {
    /// 우선순위: `$INSIGHT_AGENT_MODEL_DIR` > `<cache dir>/insight-agent/models/<repo>`
    pub fn from_env() -> Self {
        Self::resolve(std::env::var(MODEL_DIR_ENV).ok().as_deref(), dirs::cache_dir())
    }

    fn resolve(explicit_dir: Option<&str>, cache_dir: Option<PathBuf>) -> Self {
        match explicit_dir.map(str::trim).filter(|d| !d.is_empty()) {
            Some(dir) => Self {
                dir: PathBuf::from(dir),
                allow_download: false,
            },
            None => Self {
                dir: cache_dir
                    .unwrap_or_else(std::env::temp_dir)
                    .join("insight-agent")
                    .join("models")
                    .join(MODEL_REPO.replace('/', "--")),
                allow_download: true,
            },
        }
    }
}

/// 모델 디렉토리
pub fn get_model_dir() -> PathBuf {
    ModelLocation::from_env().dir
}

/// ONNX QA 모델
pub struct OnnxQaModel {
    tokenizer: Tokenizer,
    run: RunFn,
    /// token_type_ids 입력 필요 여부
    with_token_types: bool,
    cls_id: u32,
    sep_id: u32,
    pad_id: u32,
}

impl OnnxQaModel {
    /// 모델 로드 (`allow_download`이면 없는 파일을 내려받음)
    pub fn load(model_dir: &Path, allow_download: bool) -> Result<Self> {
        let model_path = model_dir.join(MODEL_FILE);
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);

        for (relative, path) in [(MODEL_FILE, &model_path), (TOKENIZER_FILE, &tokenizer_path)] {
            if path.exists() {
                continue;
            }
            if !allow_download {
                return Err(InsightError::Model(format!(
                    "{} not found (set by {})",
                    path.display(),
                    MODEL_DIR_ENV
                )));
            }
            download_file(HF_HUB_URL, relative, path)?;
        }

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| InsightError::Model(format!("failed to load tokenizer: {}", e)))?;
        tokenizer
            .with_truncation(None)
            .map_err(|e| InsightError::Model(format!("failed to configure tokenizer: {}", e)))?;
        tokenizer.with_padding(None);

        let special = |token: &str| {
            tokenizer.token_to_id(token).ok_or_else(|| {
                InsightError::Model(format!("tokenizer has no {} token", token))
            })
        };
        let cls_id = special("[CLS]")?;
        let sep_id = special("[SEP]")?;
        let pad_id = special("[PAD]").unwrap_or(0);

        let (run, with_token_types) = load_plan(&model_path).map_err(|e| {
            InsightError::Model(format!("failed to load {}: {}", model_path.display(), e))
        })?;

        tracing::debug!("Loaded ONNX model from {}", model_path.display());

        Ok(Self {
            tokenizer,
            run,
            with_token_types,
            cls_id,
            sep_id,
            pad_id,
        })
    }

    /// 윈도우 하나에 대한 start/end logits
    fn infer(&self, ids: &[u32]) -> TractResult<(Vec<f32>, Vec<f32>)> {
        let mut input_ids = vec![self.pad_id as i64; MAX_SEQ_LEN];
        let mut attention_mask = vec![0i64; MAX_SEQ_LEN];
        for (i, &id) in ids.iter().take(MAX_SEQ_LEN).enumerate() {
            input_ids[i] = id as i64;
            attention_mask[i] = 1;
        }

        let mut inputs: TVec<TValue> = tvec!(
            Tensor::from_shape(&[1, MAX_SEQ_LEN], &input_ids)?.into(),
            Tensor::from_shape(&[1, MAX_SEQ_LEN], &attention_mask)?.into()
        );
        if self.with_token_types {
            inputs.push(Tensor::from_shape(&[1, MAX_SEQ_LEN], &vec![0i64; MAX_SEQ_LEN])?.into());
        }

        let outputs = (self.run)(inputs)?;
        if outputs.len() < 2 {
            anyhow::bail!("expected start/end logits, got {} outputs", outputs.len());
        }

        let start = outputs[0].as_slice::<f32>()?.to_vec();
        let end = outputs[1].as_slice::<f32>()?.to_vec();
        Ok((start, end))
    }
}

impl QaModel for OnnxQaModel {
    fn answer(&self, question: &str, context: &str) -> Result<Answer> {
        let question_enc = self
            .tokenizer
            .encode(question, false)
            .map_err(|e| InsightError::Model(format!("failed to tokenize question: {}", e)))?;
        let context_enc = self
            .tokenizer
            .encode_char_offsets(context, false)
            .map_err(|e| InsightError::Model(format!("failed to tokenize context: {}", e)))?;

        let question_ids: Vec<u32> = question_enc
            .get_ids()
            .iter()
            .copied()
            .take(MAX_QUESTION_TOKENS)
            .collect();
        let context_ids = context_enc.get_ids();
        let offsets = context_enc.get_offsets();

        if context_ids.is_empty() {
            return Ok(Answer::empty());
        }

        // [CLS] question [SEP] window [SEP]
        let prefix_len = question_ids.len() + 2;
        let window_len = MAX_SEQ_LEN - prefix_len - 1;

        let mut best: Option<Answer> = None;

        for (win_start, win_end) in windows(context_ids.len(), window_len, DOC_STRIDE) {
            let mut ids = Vec::with_capacity(MAX_SEQ_LEN);
            ids.push(self.cls_id);
            ids.extend_from_slice(&question_ids);
            ids.push(self.sep_id);
            ids.extend_from_slice(&context_ids[win_start..win_end]);
            ids.push(self.sep_id);

            let (start_logits, end_logits) = self
                .infer(&ids)
                .map_err(|e| InsightError::Model(format!("inference failed: {}", e)))?;

            let span = prefix_len..prefix_len + (win_end - win_start);
            let (Some(start_slice), Some(end_slice)) =
                (start_logits.get(span.clone()), end_logits.get(span))
            else {
                continue;
            };

            let start_probs = softmax(start_slice);
            let end_probs = softmax(end_slice);

            if let Some((s, e, score)) = best_span(&start_probs, &end_probs, MAX_ANSWER_TOKENS) {
                if best.as_ref().map_or(true, |b| score > b.confidence) {
                    let start_offset = offsets[win_start + s].0;
                    let end_offset = offsets[win_start + e].1;
                    best = Some(Answer {
                        text: char_slice(context, start_offset, end_offset),
                        confidence: score,
                        start_offset,
                        end_offset,
                    });
                }
            }
        }

        Ok(best.unwrap_or_else(Answer::empty))
    }

    fn name(&self) -> &str {
        MODEL_REPO
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// ONNX 그래프를 고정 입력 shape로 최적화해 실행 클로저로 만듦
fn load_plan(model_path: &Path) -> TractResult<(RunFn, bool)> {
    let mut model = tract_onnx::onnx().model_for_path(model_path)?;

    let input_count = model.input_outlets()?.len();
    for index in 0..input_count {
        model = model.with_input_fact(index, i64::fact([1, MAX_SEQ_LEN]).into())?;
    }

    let plan = model.into_optimized()?.into_runnable()?;
    let run: RunFn = Box::new(move |inputs| plan.run(inputs));

    Ok((run, input_count > 2))
}

/// Hugging Face Hub에서 파일 하나 다운로드
///
/// 수백 MB 모델 파일이므로 본문을 임시 파일로 스트리밍한 뒤 최종 이름으로 옮깁니다.
fn download_file(hub_url: &str, relative: &str, dest: &Path) -> Result<()> {
    let url = format!(
        "{}/{}/resolve/main/{}",
        hub_url.trim_end_matches('/'),
        MODEL_REPO,
        relative
    );
    tracing::info!("Downloading {} -> {}", url, dest.display());

    let parent = dest
        .parent()
        .ok_or_else(|| InsightError::Model(format!("invalid model path {}", dest.display())))?;
    fs::create_dir_all(parent)?;

    let download_err = |e: reqwest::Error| {
        InsightError::Model(format!("failed to download {}: {}", relative, e))
    };

    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
        .timeout(None::<Duration>)
        .build()
        .map_err(|e| InsightError::Model(format!("failed to create HTTP client: {}", e)))?;

    let mut response = client
        .get(&url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(download_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    let written = response.copy_to(tmp.as_file_mut()).map_err(download_err)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;

    tracing::info!("Downloaded {} ({} bytes)", relative, written);
    Ok(())
}

/// context 토큰을 겹치는 윈도우로 분할 ([start, end) 목록)
fn windows(total: usize, window_len: usize, stride: usize) -> Vec<(usize, usize)> {
    let window_len = window_len.max(1);
    let step = window_len.saturating_sub(stride).max(1);

    let mut result = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window_len).min(total);
        result.push((start, end));
        if end >= total {
            break;
        }
        start += step;
    }
    result
}

/// 수치 안정 softmax
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|&x| x / sum).collect()
    } else {
        exps
    }
}

/// `p_start * p_end`가 최대인 구간 (start <= end, 길이 <= max_len 토큰)
fn best_span(start_probs: &[f32], end_probs: &[f32], max_len: usize) -> Option<(usize, usize, f32)> {
    let mut best: Option<(usize, usize, f32)> = None;

    for (s, &ps) in start_probs.iter().enumerate() {
        let last = (s + max_len).min(end_probs.len());
        for (e, &pe) in end_probs.iter().enumerate().take(last).skip(s) {
            let score = ps * pe;
            if best.map_or(true, |(_, _, b)| score > b) {
                best = Some((s, e, score));
            }
        }
    }

    best
}

// ============================================================================
// Tests
// ============================================================================
