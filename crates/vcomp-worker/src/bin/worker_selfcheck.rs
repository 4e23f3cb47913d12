//! Startup probe: exits non-zero when the worker could not do its job.

use std::path::Path;

use vcomp_models::SystemClock;
use vcomp_queue::RedisWorkQueue;
use vcomp_state::{RedisJobStore, StateConfig};
use vcomp_storage::{ArtifactStore, R2Client};
use vcomp_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();

    println!("worker-selfcheck: starting with work_dir={}", config.work_dir);
    ensure_workdir(&config.work_dir).await?;
    ensure_media_tools()?;
    ensure_env_present(&["REDIS_URL", "R2_BUCKET_NAME"])?;
    ensure_redis().await?;
    ensure_storage().await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let probe = tempfile::NamedTempFile::new_in(path)
        .map_err(|e| anyhow::anyhow!("work dir {} not writable: {}", path.display(), e))?;
    drop(probe);
    Ok(())
}

fn ensure_media_tools() -> anyhow::Result<()> {
    let ffmpeg = vcomp_media::check_ffmpeg().map_err(|e| anyhow::anyhow!("{}", e))?;
    let ffprobe = vcomp_media::check_ffprobe().map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("worker-selfcheck: ffmpeg={} ffprobe={}", ffmpeg.display(), ffprobe.display());
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

async fn ensure_redis() -> anyhow::Result<()> {
    let queue = RedisWorkQueue::from_env()?;
    queue.ping().await?;
    let store = RedisJobStore::new(StateConfig::from_env(), SystemClock::shared())?;
    store.ping().await?;
    println!("worker-selfcheck: redis reachable");
    Ok(())
}

async fn ensure_storage() -> anyhow::Result<()> {
    let storage = R2Client::from_env()?;
    storage.check_connectivity().await?;
    println!("worker-selfcheck: storage reachable");
    Ok(())
}
