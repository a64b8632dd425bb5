//! Command-line analysis: prints one JSON report per video path.

use std::process::ExitCode;

use serde_json::json;
use tracing::{error, info};

use dfd_engine::{init_tracing, DeepfakeAnalyzer, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: dfd-analyze <video>...");
        return Ok(ExitCode::from(2));
    }

    let config = EngineConfig::from_env()?;
    info!("Engine config: {:?}", config);

    let analyzer = DeepfakeAnalyzer::from_config(config)?;

    let mut failures = 0u8;
    for path in &paths {
        let line = match analyzer.analyze_report(path).await {
            Ok(report) => json!({ "path": path, "report": report }),
            Err(e) => {
                failures = failures.saturating_add(1);
                if e.is_fault() {
                    error!(path = %path, "Analysis fault: {}", e);
                }
                json!({
                    "path": path,
                    "error": { "code": e.code(), "message": e.public_message() },
                })
            }
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    analyzer.shutdown().await;

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
