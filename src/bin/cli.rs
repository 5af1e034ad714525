//! CLI binary for lookout.
//!
//! Runs the turn controller against console speech ports: type to "speak"
//! while the assistant is listening, and answers are printed as they would be
//! spoken.

use clap::{Parser, Subcommand};
use lookout::camera::FileFrameSource;
use lookout::console::{ConsoleMic, ConsoleSpeechInput, ConsoleSpeechOutput};
use lookout::scene::HttpSceneService;
use lookout::{
    AssistantConfig, ControlCommand, ControllerHandle, Ports, RuntimeEvent, TurnController,
    event_channels,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Lookout: ask out loud what the camera sees.
#[derive(Parser)]
#[command(name = "lookout", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Image file holding the latest camera frame (overrides config).
    #[arg(short, long)]
    frame: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start the assistant.
    Run,

    /// Print the effective configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the spoken output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lookout=info,reqwest=warn,hyper=warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AssistantConfig::from_file(path)?,
        None => {
            let path = AssistantConfig::default_config_path();
            if path.exists() {
                AssistantConfig::from_file(&path)?
            } else {
                AssistantConfig::default()
            }
        }
    };
    if let Some(frame) = cli.frame {
        config.camera.frame_path = Some(frame);
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config: AssistantConfig) -> anyhow::Result<()> {
    println!("Lookout v{}", env!("CARGO_PKG_VERSION"));
    if config.scene.effective_api_key().is_none() {
        warn!("no API key configured; set scene.api_key or LOOKOUT_API_KEY");
    }
    if config.camera.frame_path.is_none() {
        warn!("no camera frame configured; every query will report the camera as not ready");
    }

    let (port_events, inbox) = event_channels();
    let (input, mic) = ConsoleSpeechInput::new(&config.console, port_events.input.clone());
    let output = ConsoleSpeechOutput::new(&config.console, port_events.playback.clone());
    let ports = Ports {
        input: Box::new(input),
        output: Box::new(output),
        scene: Arc::new(HttpSceneService::new(config.scene.clone())),
        frames: Arc::new(FileFrameSource::new(&config.camera)),
    };

    let (runtime_tx, runtime_rx) = broadcast::channel(64);
    let continuous = config.turn.continuous;
    let controller = TurnController::new(config, ports, inbox).with_runtime_events(runtime_tx);
    let handle = controller.handle();

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            ctrl_c.shutdown();
        }
    });
    tokio::spawn(log_runtime_events(runtime_rx));
    tokio::spawn(read_stdin(handle, mic));

    if continuous {
        println!("\nListening. Type a question and press Enter.");
    } else {
        println!("\nType /once to ask a question.");
    }
    println!("Commands: /stop /start /once /interrupt /describe /quit\n");

    controller.run().await?;
    Ok(())
}

/// Route typed lines: `/` commands to the controller, anything else to the mic.
async fn read_stdin(handle: ControllerHandle, mic: ConsoleMic) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed");
                handle.shutdown();
                return;
            }
            Err(e) => {
                warn!("stdin read failed: {e}");
                handle.shutdown();
                return;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(command) = line.strip_prefix('/') {
            let command = match command {
                "stop" => ControlCommand::StopListening,
                "start" => ControlCommand::StartListening,
                "once" => ControlCommand::ListenOnce,
                "interrupt" => ControlCommand::Interrupt,
                "describe" => ControlCommand::DescribeScene,
                "quit" => ControlCommand::Shutdown,
                other => {
                    eprintln!("unknown command: /{other}");
                    continue;
                }
            };
            if handle.send(command).is_err() {
                return;
            }
        } else if !mic.hear(line) {
            eprintln!("(not listening right now, currently {})", handle.state());
        }
    }
}

async fn log_runtime_events(mut rx: broadcast::Receiver<RuntimeEvent>) {
    loop {
        match rx.recv().await {
            Ok(RuntimeEvent::Transcript { text, verdict }) if !verdict.is_accepted() => {
                info!(%text, ?verdict, "ignored");
            }
            Ok(RuntimeEvent::ListeningUnavailable { reason }) => {
                eprintln!("speech input unavailable: {reason}");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "runtime events lagged"),
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
