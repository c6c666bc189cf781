//! Quiz client binary entry point
//!
//! Connects to the signaling relay, logs in and runs one quiz session,
//! logging everything the presentation layer would show.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quizlink -- \
//!   --signaling-url ws://localhost:8000/ws/rtc/ \
//!   --username u1 --passcode 1234 \
//!   --video ./camera.ivf --auto-start
//!
//! # Configure STUN/TURN servers
//! cargo run --bin quizlink -- \
//!   --stun-servers stun:stun.l.google.com:19302 \
//!   --turn-servers turn:turn.example.com:3478:user:secret
//! ```

use clap::Parser;
use quizlink_client::{
    ConsumerEvent, IvfFileSource, QuizClient, QuizLinkConfig, QuizStage,
    SignalingClosePolicy, TurnServerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Quiz session client
///
/// Logs in over a WebSocket relay and streams local video to the quiz peer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket signaling URL
    #[arg(
        long,
        default_value = "ws://localhost:8000/ws/rtc/",
        env = "QUIZLINK_SIGNALING_URL"
    )]
    signaling_url: String,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302,stun:stun1.l.google.com:19302",
        env = "QUIZLINK_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "QUIZLINK_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Login username
    #[arg(short, long, env = "QUIZLINK_USERNAME")]
    username: String,

    /// Login passcode
    #[arg(short, long, env = "QUIZLINK_PASSCODE")]
    passcode: String,

    /// IVF file (VP8 or VP9) streamed as the local camera
    #[arg(long, default_value = "./camera.ivf", env = "QUIZLINK_VIDEO")]
    video: PathBuf,

    /// Control channel label
    #[arg(long, default_value = "signal", env = "QUIZLINK_CONTROL_LABEL")]
    control_label: String,

    /// What to do with the session when the relay closes: keep, teardown
    #[arg(long, default_value = "keep", env = "QUIZLINK_ON_SIGNALING_CLOSE")]
    on_signaling_close: ClosePolicyArg,

    /// Send the quiz start command as soon as the control channel opens
    #[arg(long, default_value_t = false, env = "QUIZLINK_AUTO_START")]
    auto_start: bool,
}

/// Signaling close policy CLI argument wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ClosePolicyArg {
    Keep,
    Teardown,
}

impl From<ClosePolicyArg> for SignalingClosePolicy {
    fn from(arg: ClosePolicyArg) -> Self {
        match arg {
            ClosePolicyArg::Keep => SignalingClosePolicy::KeepSession,
            ClosePolicyArg::Teardown => SignalingClosePolicy::TeardownSession,
        }
    }
}

/// Parse TURN server string (format: turn:host:port:username:password or turns:host:port:username:password)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    // Password may contain colons
    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        credential: parts[4..].join(":"),
    })
}

fn build_config_from_args(args: &Args) -> anyhow::Result<QuizLinkConfig> {
    let turn_servers = args
        .turn_servers
        .iter()
        .map(|s| parse_turn_server(s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(anyhow::Error::msg)?;

    let mut config = QuizLinkConfig::new(&args.signaling_url)
        .with_turn_servers(turn_servers)
        .with_signaling_close_policy(args.on_signaling_close.into());
    config.stun_servers = args.stun_servers.clone();
    config.control_channel_label = args.control_label.clone();

    config.validate()?;
    Ok(config)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = build_config_from_args(&args)?;

    info!("Quiz client v{}", quizlink_client::version());
    info!("  Signaling URL: {}", config.signaling_url);
    info!("  STUN servers: {:?}", config.stun_servers);
    info!("  TURN servers: {}", config.turn_servers.len());
    info!("  Video file: {}", args.video.display());

    let media = Arc::new(IvfFileSource::new(&args.video));
    let (client, handle, mut events) = QuizClient::with_webrtc(config, media)?;
    let client_task = tokio::spawn(client.run());

    handle.connect().await?;
    handle.login(&args.username, &args.passcode).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ConsumerEvent::SignalingConnected => info!("Connected to relay"),
                    ConsumerEvent::SignalingClosed => warn!("Relay connection closed"),
                    ConsumerEvent::LoginAccepted => info!("Login accepted"),
                    ConsumerEvent::LoginRejected => {
                        error!("Login rejected, check username and passcode");
                        break;
                    }
                    ConsumerEvent::MediaUnavailable(reason) => {
                        error!("Camera unavailable: {}", reason);
                        break;
                    }
                    ConsumerEvent::NegotiationFailed(reason) => {
                        error!("Session negotiation failed: {}", reason);
                        break;
                    }
                    ConsumerEvent::StageChanged(QuizStage::Complete) => {
                        info!("Stage: {:?}", QuizStage::Complete);
                        break;
                    }
                    ConsumerEvent::StageChanged(stage) => info!("Stage: {:?}", stage),
                    ConsumerEvent::ControlChannelReady => {
                        info!("Control channel ready");
                        if args.auto_start && !handle.start_quiz().await? {
                            warn!("Quiz start was not delivered");
                        }
                    }
                    ConsumerEvent::ControlChannelClosed => warn!("Control channel closed"),
                    ConsumerEvent::InfoBar(status) => {
                        info!(color = %status.color, "Info: {}", status.text)
                    }
                    ConsumerEvent::Question(question) => {
                        info!(
                            label = question.label.as_deref().unwrap_or(""),
                            image = question.image.is_some(),
                            "Question: {}",
                            question.text
                        );
                        for (position, choice) in question.choices() {
                            info!("  {}. {}", position, choice);
                        }
                    }
                    ConsumerEvent::Finished(result) => {
                        info!(
                            "Quiz finished: score {} with hands down for {} seconds",
                            result.score, result.hands_down
                        );
                    }
                    ConsumerEvent::RemoteTrack(track) => {
                        info!("Remote {} track {}", track.kind(), track.id())
                    }
                }
            }
        }
    }

    handle.shutdown()?;
    client_task.await?;
    info!("Quiz client shut down");
    Ok(())
}
