use std::process::ExitCode;
use std::sync::Arc;

use lofi_core::api::{self, AppState};
use lofi_core::codec::{AudioCodec, FfmpegCodec, ToolLocator};
use lofi_core::logging::init_logging;
use lofi_core::source::{MediaSource, YtDlpSource};
use lofi_core::{ArtifactManager, ConversionOrchestrator, Settings, SourceResolver, TransformEngine};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!(target: "lofi::server", "{}", e);
            return ExitCode::FAILURE;
        }
    };
    log::debug!(target: "lofi::server", "Settings: {:?}", settings);

    let artifacts = ArtifactManager::new(settings.temp_root.clone());
    let swept = artifacts.cleanup_stale(settings.stale_artifact_age);
    if swept > 0 {
        log::info!(target: "lofi::server", "Removed {} stale request areas", swept);
    }

    let ffmpeg = Arc::new(ToolLocator::ffmpeg(settings.ffmpeg_path.clone()));
    let ytdlp = Arc::new(ToolLocator::ytdlp(settings.ytdlp_path.clone()));
    for locator in [&ffmpeg, &ytdlp] {
        if let Err(e) = locator.locate() {
            log::warn!(target: "lofi::server", "{}; conversions will fail until it is installed", e);
        }
    }

    let codec: Arc<dyn AudioCodec> = Arc::new(
        FfmpegCodec::new(Arc::clone(&ffmpeg))
            .with_timeout(settings.codec_timeout)
            .with_bitrate_kbps(settings.mp3_bitrate_kbps),
    );
    let source: Arc<dyn MediaSource> = Arc::new(
        YtDlpSource::new(Arc::clone(&ytdlp))
            .with_ffmpeg(Arc::clone(&ffmpeg))
            .with_timeout(settings.fetch_timeout),
    );
    let resolver = SourceResolver::new(source, Arc::clone(&codec), settings.max_duration_secs);
    let engine = TransformEngine::new().with_timeout(settings.transform_timeout);
    let orchestrator = Arc::new(ConversionOrchestrator::new(resolver, engine, codec, artifacts));

    let app = api::router(
        AppState::new(orchestrator, ffmpeg, ytdlp),
        &settings.allowed_origins,
    );

    let listener = match tokio::net::TcpListener::bind(settings.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!(target: "lofi::server", "Failed to bind {}: {}", settings.bind_addr, e);
            return ExitCode::FAILURE;
        }
    };
    log::info!(target: "lofi::server", "Listening on {}", settings.bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        log::error!(target: "lofi::server", "Server error: {}", e);
        return ExitCode::FAILURE;
    }
    log::info!(target: "lofi::server", "Shut down");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!(target: "lofi::server", "Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!(target: "lofi::server", "Shutdown requested");
}
