use std::path::Path;

use vsplit_media::{check_ffmpeg, check_ffprobe};
use vsplit_pipeline::PipelineConfig;
use vsplit_storage::S3Client;
use vsplit_worker_client::HttpChunkWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();

    let config = PipelineConfig::from_env()?;
    let work_dir = config
        .work_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir);

    println!(
        "vsplit-selfcheck: starting with work_dir={} policy={} mode={}",
        work_dir.display(),
        config.split_policy,
        config.merge_mode
    );
    ensure_workdir(&work_dir).await?;
    check_ffmpeg().map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    check_ffprobe().map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    ensure_env_present(&["S3_BUCKET"])?;

    HttpChunkWorker::new(config.worker_config())?;
    S3Client::from_env().await?.check_connectivity().await?;

    println!("vsplit-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
