use anyhow::Result;
use avatar_runtime::audio::playback::{AudioOutput, CpalOutput, SilentOutput};
use avatar_runtime::config::load_config;
use avatar_runtime::{App, AudioCapture, Backends, ControlServer, HeadlessSurface, LogChatView, WsConnector};
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    info!("avatar runtime (avatard) starting...");

    let config = load_config()?;

    let capture = match AudioCapture::new(config.audio.sample_rate, config.audio.channels) {
        Ok(capture) => Some(capture),
        Err(e) => {
            warn!("Microphone unavailable, recording disabled: {}", e);
            None
        }
    };

    let output: Arc<dyn AudioOutput> = match CpalOutput::new() {
        Ok(output) => Arc::new(output),
        Err(e) => {
            warn!("No audio output device, speech will be silent: {}", e);
            Arc::new(SilentOutput)
        }
    };

    let ws_url = config.server.ws_url()?;
    info!("Session endpoint: {}", ws_url);

    let backends = Backends {
        surface: Arc::new(HeadlessSurface::new(
            config.avatar.container_width,
            config.avatar.container_height,
        )),
        output,
        connector: WsConnector::new(ws_url),
        capture,
    };

    let app = Arc::new(App::start(&config, backends, Arc::new(LogChatView)).await?);
    let server = ControlServer::new(config.control.socket_path.clone(), app);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
