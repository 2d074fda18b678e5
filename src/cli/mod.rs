//! CLI 모듈
//!
//! insight-agent CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};

use crate::analysis::{count_mentions, rank_by_mentions, top_by_metric};
use crate::connector::{
    has_github_token, validate_limit, Connector, RedditCredentials, SearchOrder, SearchSort,
    TimeFilter,
};
use crate::knowledge::{get_data_dir, Document, DocumentStore, FetchResult, Source};
use crate::qa::{get_model_dir, QaEngine};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "insight-agent")]
#[command(version, about = "GitHub/Reddit 토픽 수집 + 추출형 QA", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 외부 소스에서 문서를 수집해 저장
    Fetch {
        /// 소스 (github | reddit)
        source: Source,

        /// 검색 쿼리
        query: String,

        /// 수집 개수
        #[arg(short, long, default_value = "10", allow_negative_numbers = true)]
        limit: i64,

        /// 검색할 서브레딧 (reddit 필수)
        #[arg(short, long)]
        subreddit: Option<String>,

        /// 정렬 기준 (reddit)
        #[arg(long, value_enum, default_value_t = SearchSort::Relevance)]
        sort: SearchSort,

        /// 검색 기간 (reddit, top/comments 정렬에서 사용)
        #[arg(long, value_enum, default_value_t = TimeFilter::All)]
        time: TimeFilter,
    },

    /// 저장된 수집 결과 집계
    Analyze {
        /// 아티팩트 경로 또는 파일 이름
        location: PathBuf,

        /// 언급 횟수를 셀 검색어
        term: Option<String>,

        /// 상위 N개
        #[arg(short, long, default_value = "5")]
        top: usize,
    },

    /// 저장된 문서 본문에 질문
    Ask {
        /// 질문
        question: String,

        /// 아티팩트 경로 또는 파일 이름
        location: PathBuf,

        /// 문서 인덱스 (0부터)
        #[arg(short, long, default_value = "0")]
        index: usize,
    },

    /// 저장된 아티팩트 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Fetch {
            source,
            query,
            limit,
            subreddit,
            sort,
            time,
        } => cmd_fetch(source, &query, limit, subreddit, SearchOrder { sort, time }).await,
        Commands::Analyze {
            location,
            term,
            top,
        } => cmd_analyze(&location, term.as_deref(), top),
        Commands::Ask {
            question,
            location,
            index,
        } => cmd_ask(question, &location, index).await,
        Commands::List { limit } => cmd_list(limit),
        Commands::Status => cmd_status(),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (fetch)
///
/// 검색 결과를 Document로 정규화해 새 아티팩트로 저장합니다.
/// 실패 시 부분 결과는 저장하지 않습니다.
async fn cmd_fetch(
    source: Source,
    query: &str,
    limit: i64,
    subreddit: Option<String>,
    order: SearchOrder,
) -> Result<()> {
    let limit = validate_limit(limit)?;
    let connector = Connector::from_env(source, subreddit.as_deref(), order)?;

    match subreddit.as_deref() {
        Some(sub) if source == Source::ForumPost => println!(
            "[*] r/{} 검색 중: \"{}\" (최대 {} 건, sort: {}, time: {})",
            sub,
            query,
            limit,
            order.sort.as_str(),
            order.time.as_str()
        ),
        _ => println!("[*] {} 검색 중: \"{}\" (최대 {} 건)", source, query, limit),
    }

    let result = connector
        .fetch(query, limit)
        .await
        .with_context(|| format!("{} 수집 실패", source))?;

    if result.documents.is_empty() {
        println!("[!] 검색 결과가 없습니다.");
    }

    let store = DocumentStore::open_default();
    let path = store.write(&result).context("아티팩트 저장 실패")?;

    println!("[OK] {} 건 수집 완료", result.documents.len());
    println!("     저장 위치: {}", path.display());

    Ok(())
}

/// 집계 명령어 (analyze)
fn cmd_analyze(location: &Path, term: Option<&str>, top: usize) -> Result<()> {
    let store = DocumentStore::open_default();
    let path = resolve_location(&store, location);
    let result = store.read(&path)?;

    print_summary(&result);

    let ranked = top_by_metric(&result.documents, top);
    if ranked.is_empty() {
        println!("[!] 문서가 없습니다.");
    } else {
        let metric_name = match result.source {
            Source::Repository => "stars",
            Source::ForumPost => "score",
        };
        println!("[OK] {} 상위 {} 건:\n", metric_name, ranked.len());
        for (rank, doc) in ranked.iter().enumerate() {
            println!(
                "  {:>2}. {} ({} {})",
                rank + 1,
                truncate_text(&doc.title, 60),
                doc.metric,
                metric_name
            );
            if let Some(summary) = summary_line(doc) {
                println!("      {}", summary);
            }
            if let Some(url) = doc.url() {
                println!("      {}", url);
            }
        }
        println!();
    }

    if let Some(term) = term {
        let counts = count_mentions(&result.documents, term)?;
        println!("[OK] \"{}\" 언급 횟수", term);
        println!("     제목: {}", counts.title);
        println!("     본문: {}", counts.body);
        println!("     합계: {}", counts.total);

        let mentions = rank_by_mentions(&result.documents, term, top)?;
        if !mentions.is_empty() {
            println!();
            println!("[OK] 언급이 많은 문서:");
            for (doc, count) in mentions {
                println!("  {:>4}회  {}", count, truncate_text(&doc.title, 60));
            }
        }
    }

    Ok(())
}

/// 질의응답 명령어 (ask)
///
/// 모델 로드와 추론은 블로킹이므로 별도 스레드에서 실행합니다.
async fn cmd_ask(question: String, location: &Path, index: usize) -> Result<()> {
    let store = DocumentStore::open_default();
    let path = resolve_location(&store, location);

    println!("[*] 질문: {}", question);
    println!("[*] 문서: {} #{}", path.display(), index);

    let answer = tokio::task::spawn_blocking(move || {
        let engine = QaEngine::onnx_default();
        engine.ask(&question, &store, &path, index)
    })
    .await
    .context("QA 작업 실행 실패")??;

    if answer.text.is_empty() {
        println!("\n[!] 답을 찾지 못했습니다 (신뢰도 {:.4})", answer.confidence);
    } else {
        println!("\n[OK] 답: {}", answer.text);
        println!("     신뢰도: {:.4}", answer.confidence);
        println!(
            "     위치: {}..{} (문자)",
            answer.start_offset, answer.end_offset
        );
    }

    Ok(())
}

/// 아티팩트 목록 명령어 (list)
fn cmd_list(limit: usize) -> Result<()> {
    let store = DocumentStore::open_default();
    let artifacts = store.list()?;

    if artifacts.is_empty() {
        println!("[!] 저장된 아티팩트가 없습니다.");
        println!("    저장 위치: {}", store.root().display());
        return Ok(());
    }

    println!("[OK] 저장된 아티팩트 ({} 건):\n", artifacts.len());

    for info in artifacts.iter().take(limit) {
        let modified = info
            .modified_at
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {:>10}  {}",
            modified,
            format_bytes(info.size as usize),
            info.name
        );
    }

    if artifacts.len() > limit {
        println!("\n  ... 외 {} 건", artifacts.len() - limit);
    }

    Ok(())
}

/// 상태 확인 명령어 (status)
fn cmd_status() -> Result<()> {
    println!("insight-agent v{}", env!("CARGO_PKG_VERSION"));
    println!();

    // 데이터 디렉토리
    let data_dir = get_data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    // 자격 증명
    if has_github_token() {
        println!("[OK] GitHub 토큰: 설정됨");
    } else {
        println!("[!] GitHub 토큰: 미설정 (비인증 요청, 낮은 쿼터)");
        println!("    설정: export GITHUB_TOKEN=your-token");
    }

    if RedditCredentials::is_configured() {
        println!("[OK] Reddit 자격 증명: 설정됨");
    } else {
        println!("[!] Reddit 자격 증명: 미설정");
        println!("    설정: {}", RedditCredentials::ENV_VARS.join(", "));
    }

    // 저장된 아티팩트
    match DocumentStore::open(&data_dir).list() {
        Ok(artifacts) => {
            let total: u64 = artifacts.iter().map(|a| a.size).sum();
            println!(
                "[OK] 저장된 아티팩트: {} 건 ({})",
                artifacts.len(),
                format_bytes(total as usize)
            );
        }
        Err(e) => println!("[!] 아티팩트 조회 실패: {}", e),
    }

    // QA 모델
    let model_dir = get_model_dir();
    if model_dir.join("onnx").join("model.onnx").exists() {
        println!("[OK] QA 모델: {}", model_dir.display());
    } else {
        println!("[!] QA 모델: 미설치 (첫 ask 실행 시 다운로드)");
        println!("    위치: {}", model_dir.display());
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

const SUMMARY_CHARS: usize = 100;

/// 아티팩트 위치 해석
///
/// 그대로 존재하지 않는 단순 파일 이름은 저장소 디렉토리 기준으로 찾습니다.
fn resolve_location(store: &DocumentStore, location: &Path) -> PathBuf {
    let is_bare_name = location.parent().map_or(true, |p| p.as_os_str().is_empty());
    if !location.exists() && is_bare_name {
        store.root().join(location)
    } else {
        location.to_path_buf()
    }
}

/// 문서 요약 (설명, 없으면 본문 앞 100자)
fn summary_line(doc: &Document) -> Option<String> {
    let text = doc.description().unwrap_or(&doc.body);
    let summary = truncate_text(text, SUMMARY_CHARS);
    (!summary.is_empty()).then_some(summary)
}

/// 수집 결과 요약 출력
fn print_summary(result: &FetchResult) {
    println!("[*] 쿼리: \"{}\"", result.query);
    match result.community {
        Some(ref community) => println!("    소스: {} (r/{})", result.source, community),
        None => println!("    소스: {}", result.source),
    }
    println!(
        "    수집: {} ({} / {} 건)",
        result.fetched_at.format("%Y-%m-%d %H:%M:%S UTC"),
        result.documents.len(),
        result.limit
    );
    println!();
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
