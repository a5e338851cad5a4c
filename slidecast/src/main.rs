use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use slidecast::{
    CameraSelection, DebugLogger, RelayConfig, Resolution, Session, SessionEvent, DEFAULT_ENDPOINT,
};
use std::path::PathBuf;
use tracing::{debug, info};

/// Slidecast
///
/// Streams a camera to a gesture-driven slide processing service and shows
/// the annotated frames and slide counters it sends back.
#[derive(Parser, Debug)]
#[clap(name = "slidecast", version)]
struct Opt {
    /// Log filter directive, e.g. `debug` or `slidecast_core=trace`
    #[clap(long = "log-level", global = true)]
    log_level: Option<String>,

    #[clap(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Upload a presentation and stream the camera.
    Stream(Stream),

    /// List available cameras.
    Cameras,
}

#[derive(Args, Debug, Clone)]
struct Stream {
    /// Processing service URL.
    #[clap(long = "endpoint", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Presentation to upload before streaming. Without it the service keeps
    /// whatever document it already has.
    #[clap(long = "upload")]
    upload: Option<PathBuf>,

    /// Maximum frames sent per second.
    #[clap(long = "max-fps", default_value_t = 30)]
    max_fps: u32,

    /// Transmit width in pixels.
    #[clap(long = "width", default_value_t = 800)]
    width: u32,

    /// Transmit height in pixels.
    #[clap(long = "height", default_value_t = 600)]
    height: u32,

    /// JPEG quality between 0 and 1.
    #[clap(long = "quality", default_value_t = 0.85)]
    quality: f32,

    /// Write each rendered frame to this image file.
    #[clap(long = "snapshot")]
    snapshot: Option<PathBuf>,

    /// Camera to open: `synthetic` or a device index.
    #[clap(long = "camera", default_value = "synthetic")]
    camera: CameraSelection,
}

impl Stream {
    fn config(&self) -> RelayConfig {
        let mut config = RelayConfig::for_endpoint(self.endpoint.clone());
        config.capture.max_fps = self.max_fps;
        config.capture.target_resolution = Resolution::new(self.width, self.height);
        config.capture.jpeg_quality = self.quality;
        config.camera_selection = self.camera;
        config.output.snapshot_path = self.snapshot.clone();
        config
    }
}

async fn stream(args: Stream) -> anyhow::Result<()> {
    let config = args.config();
    config.validate().context("invalid configuration")?;

    let (session, mut events) = Session::connect(config)?;
    info!(session = %session.id(), "Connecting to {}", args.endpoint);

    match &args.upload {
        Some(path) => {
            let receipt = session
                .upload_and_start(path)
                .await
                .with_context(|| format!("cannot stream {}", path.display()))?;
            info!("{}", receipt.message);
        }
        None => session.start_streaming().await?,
    }

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::Notification { message, blocking } => {
                        if blocking {
                            eprintln!("error: {}", message);
                        } else {
                            eprintln!("{}", message);
                        }
                    }
                    SessionEvent::SlidesChanged { slides } => {
                        println!("Slide {}", slides);
                    }
                    SessionEvent::ServiceError { message } => {
                        eprintln!("service: {}", message);
                    }
                    SessionEvent::StreamingStopped { reason } => {
                        info!("Streaming stopped: {}", reason);
                        break;
                    }
                    other => debug!(event = other.event_type(), "{:?}", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.close().await;
    println!("{}", session.stats());
    Ok(())
}

fn cameras() -> anyhow::Result<()> {
    let cameras = slidecast_media::list_cameras()?;
    for camera in cameras {
        println!(
            "{}: {} ({})",
            camera.selection, camera.name, camera.description
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    DebugLogger::init_logging(opt.log_level.as_deref())?;

    match opt.mode {
        Mode::Stream(args) => stream(args).await,
        Mode::Cameras => cameras(),
    }
}
