use std::path::Path;
use std::process::Command;

use dfd_engine::EngineConfig;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = EngineConfig::from_env()?;

    println!(
        "dfd-selfcheck: starting with model={} face_model={}",
        config.analysis.model_location.display(),
        config.analysis.face_model_location.display()
    );
    ensure_tool("ffmpeg")?;
    ensure_tool("ffprobe")?;
    ensure_model(&config.analysis.model_location)?;
    ensure_model(&config.analysis.face_model_location)?;

    println!("dfd-selfcheck: ok");
    Ok(())
}

fn ensure_tool(name: &str) -> anyhow::Result<()> {
    let binary = which::which(name).map_err(|e| anyhow::anyhow!("{} not in PATH: {}", name, e))?;
    let output = Command::new(&binary)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", name, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("{} -version failed: {:?}", name, output.status));
    }
    Ok(())
}

fn ensure_model(path: &Path) -> anyhow::Result<()> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("model {} not readable: {}", path.display(), e))?;
    if metadata.len() == 0 {
        return Err(anyhow::anyhow!("model {} is empty", path.display()));
    }
    Ok(())
}
