//! Stream decode demo: synthetic sensor → decode worker → shared frame buffer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use stream_decode::sensor::SyntheticSensor;
use stream_decode::{Codec, Config, StreamDecoder};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stream_decode=debug"));

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()))
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }

    #[cfg(not(feature = "profiling"))]
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Stream decode launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    stream_decode::CONFIG.store(Arc::new(config.clone()));

    if !matches!(config.pipeline.codec, Codec::Rgb24) {
        return Err(eyre!(
            "synthetic sensor emits rgb24 frames, but pipeline codec is {:?}",
            config.pipeline.codec
        ));
    }

    let (width, height) = (config.stream.width, config.stream.height);
    let sensor = SyntheticSensor::new(width, height, &config.sensor);

    let mut decoder = StreamDecoder::create(sensor, width, height)?;
    info!("Frame buffer: {}", decoder.frame_handle().path().display());
    decoder.start()?;

    let run = async {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = decoder.stats();
            let surface = decoder.latest_surface();
            info!(
                "decoded={} pending={} failed={} queued={} dropped={} surface={:?}",
                stats.worker.chunks_decoded,
                stats.worker.chunks_pending,
                stats.worker.decode_failures,
                decoder.queue_len(),
                stats.queue.dropped,
                surface.as_ref().map(|s| (s.sequence, s.pixel(0, 0)))
            );
        }
    };

    let limit = async {
        match config.sensor.run_for_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = run => {}
        _ = limit => info!("Run time elapsed"),
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Interrupted");
        }
    }

    decoder.stop()?;
    decoder.destroy()?;

    info!("Stream decode shutting down");
    Ok(())
}
