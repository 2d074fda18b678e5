//! insight-agent CLI 진입점

use std::process::ExitCode;

use clap::Parser;
use insight_agent::InsightError;

fn main() -> ExitCode {
    // 로깅 초기화 (stdout은 결과 출력용)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // CLI 실행
    let cli = insight_agent::cli::Cli::parse();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(insight_agent::cli::run(cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("[!] 오류: {:#}", err);
            let code = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<InsightError>())
                .map(InsightError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
