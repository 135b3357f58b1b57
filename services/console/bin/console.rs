//! Main Entrypoint for the Parlance Voice Console
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Resolving the API credential (env, cache, or interactive prompt).
//! 3. Opening the audio devices and the external collaborators.
//! 4. Wiring everything into a `SessionManager` and registering the tools.
//! 5. Running the interactive command loop until shutdown.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use parlance_console::{
    config::Config,
    credentials::CredentialStore,
    devices::{CpalCapture, CpalPlayback, NullCapture, NullPlayback},
    view::ConsoleView,
    wallet::{RpcWallet, UnconfiguredWallet, load_address_book},
};
use parlance_core::{
    ConsoleState, SessionConfigUpdate, SessionManager, SessionOptions, ToolContext,
    TurnDetectionMode,
    audio::{AudioCapture, AudioPlayback},
    events::SessionEvent,
    register_builtin_tools,
    tools::ToolRegistry,
    wallet::Wallet,
    weather::OpenMeteo,
};
use parlance_realtime::{ConnectError, Connector, Credential, Endpoint, EventSink, EventStream, WsConnector};
use std::io::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const DEFAULT_INSTRUCTIONS: &str = "\
You are a helpful, witty assistant. Respond with voice via audio. Be kind and \
courteous, and keep answers short. You may call the provided tools freely; \
use them whenever the user asks about the weather, their wallet, or asks you \
to remember something. Speak quickly as if excited.";

#[derive(Parser)]
#[command(name = "console", about = "Realtime voice assistant console")]
struct Cli {
    /// Use server-side voice activity detection instead of push-to-talk.
    #[arg(long)]
    vad: bool,
    /// Forget the cached API credential before starting.
    #[arg(long)]
    reset_key: bool,
    /// Run without audio hardware (transcript-only session).
    #[arg(long)]
    no_audio: bool,
}

/// Stands in for a real connector when no credential could be resolved, so
/// `connect()` surfaces the authentication failure instead of dialing out.
struct UnauthenticatedConnector;

#[async_trait]
impl Connector for UnauthenticatedConnector {
    async fn connect(&self) -> Result<(Box<dyn EventSink>, Box<dyn EventStream>), ConnectError> {
        Err(ConnectError::MissingCredential)
    }
}

/// Resolves the API credential: environment first, then the on-disk cache,
/// then an interactive prompt (cached for next time). Relay mode needs none.
fn resolve_credential(config: &Config, store: &CredentialStore) -> Option<String> {
    if let Some(key) = &config.api_key {
        return Some(key.clone());
    }
    if let Some(key) = store.load() {
        info!("using cached API credential");
        return Some(key);
    }
    if config.relay_url.is_some() {
        return None;
    }

    print!("Enter API key (blank to abort): ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return None;
    }
    let key = line.trim().to_string();
    if key.is_empty() {
        return None;
    }
    if let Err(e) = store.store(&key) {
        warn!(error = %e, "could not cache credential");
    }
    Some(key)
}

fn open_devices(no_audio: bool) -> (Arc<dyn AudioCapture>, Arc<dyn AudioPlayback>) {
    if no_audio {
        return (Arc::new(NullCapture), Arc::new(NullPlayback::default()));
    }
    let capture: Arc<dyn AudioCapture> = match CpalCapture::spawn() {
        Ok(capture) => Arc::new(capture),
        Err(e) => {
            warn!(error = %e, "microphone unavailable; input disabled");
            Arc::new(NullCapture)
        }
    };
    let playback: Arc<dyn AudioPlayback> = match CpalPlayback::spawn() {
        Ok(playback) => Arc::new(playback),
        Err(e) => {
            warn!(error = %e, "speakers unavailable; output disabled");
            Arc::new(NullPlayback::default())
        }
    };
    (capture, playback)
}

fn print_help() {
    println!("commands:");
    println!("  connect | disconnect     open or close the session");
    println!("  talk | done              start / stop a push-to-talk segment");
    println!("  say <text>               send a text message");
    println!("  vad on|off               switch turn detection mode");
    println!("  delete <item-id>         remove a conversation item");
    println!("  status                   session + tool state summary");
    println!("  log                      toggle protocol event log echo");
    println!("  focus                    simulate regaining foreground focus");
    println!("  quit                     disconnect and exit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    // --- 3. Resolve credential and endpoint ---
    let store = CredentialStore::new(&config.credential_cache_path);
    if cli.reset_key {
        store.clear().context("Failed to reset credential cache")?;
        info!("credential cache cleared");
    }
    let credential = resolve_credential(&config, &store);
    let connector: Arc<dyn Connector> = match (&config.relay_url, credential) {
        (Some(relay), _) => Arc::new(WsConnector::new(
            Endpoint::relay(relay.clone()),
            config.model.as_str(),
        )),
        (None, Some(key)) => Arc::new(WsConnector::new(
            Endpoint::direct(Credential::new(key)),
            config.model.as_str(),
        )),
        (None, None) => Arc::new(UnauthenticatedConnector),
    };

    // --- 4. Devices and collaborators ---
    let (capture, playback) = open_devices(cli.no_audio);
    let wallet: Arc<dyn Wallet> = match (&config.rpc_url, &config.wallet_address) {
        (Some(url), Some(address)) => Arc::new(RpcWallet::new(url.clone(), address.clone())),
        _ => Arc::new(UnconfiguredWallet),
    };
    let address_book = load_address_book(config.address_book_path.as_deref())
        .context("Failed to load address book")?;

    // --- 5. Session manager and tools ---
    let state = Arc::new(ConsoleState::new());
    let registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(
        &registry,
        Arc::new(ToolContext {
            state: state.clone(),
            weather: Arc::new(OpenMeteo::new(config.weather_base_url.clone())),
            wallet,
            address_book,
        }),
    );
    let manager = SessionManager::new(
        connector,
        capture,
        playback,
        registry,
        state.clone(),
        SessionOptions {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            turn_detection: if cli.vad {
                TurnDetectionMode::ServerVad
            } else {
                TurnDetectionMode::Manual
            },
            ..Default::default()
        },
    );

    // --- 6. Render session events as they arrive ---
    let show_events = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let (_subscription, mut events) = manager.subscribe();
    let render_manager = manager.clone();
    let render_show_events = show_events.clone();
    tokio::spawn(async move {
        let mut view = ConsoleView::new();
        let mut stdout = std::io::stdout();
        while let Some(event) = events.recv().await {
            if let SessionEvent::Error { message } = &event {
                eprintln!("! {message}");
            }
            view.show_events = render_show_events.load(std::sync::atomic::Ordering::Relaxed);
            if let Err(e) = view.render(&render_manager, &mut stdout) {
                warn!(error = %e, "render failed");
            }
        }
    });

    println!("parlance console ready; type `help` for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let view = ConsoleView::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                let (command, rest) = match line.trim().split_once(' ') {
                    Some((command, rest)) => (command, rest.trim()),
                    None => (line.trim(), ""),
                };
                match command {
                    "" => {}
                    "help" => print_help(),
                    "connect" => {
                        if let Err(e) = manager.connect().await {
                            eprintln!("! connect failed: {e}");
                        }
                    }
                    "disconnect" => manager.disconnect().await,
                    "talk" => {
                        if manager.is_recording() {
                            eprintln!("! already recording; `done` first");
                        } else if let Err(e) = manager.start_recording().await {
                            eprintln!("! cannot record: {e}");
                        }
                    }
                    "done" => {
                        if !manager.is_recording() {
                            eprintln!("! not recording");
                        } else if let Err(e) = manager.stop_recording().await {
                            eprintln!("! stop failed: {e}");
                        }
                    }
                    "say" => {
                        if rest.is_empty() {
                            eprintln!("! usage: say <text>");
                        } else if let Err(e) = manager.send_user_text(rest).await {
                            eprintln!("! send failed: {e}");
                        }
                    }
                    "vad" => {
                        let mode = match rest {
                            "on" => Some(TurnDetectionMode::ServerVad),
                            "off" => Some(TurnDetectionMode::Manual),
                            _ => {
                                eprintln!("! usage: vad on|off");
                                None
                            }
                        };
                        if let Some(mode) = mode
                            && let Err(e) = manager
                                .update_session_config(SessionConfigUpdate {
                                    turn_detection: Some(mode),
                                    ..Default::default()
                                })
                                .await
                        {
                            eprintln!("! config update failed: {e}");
                        }
                    }
                    "delete" => {
                        if rest.is_empty() {
                            eprintln!("! usage: delete <item-id>");
                        } else if !manager.delete_item(rest).await {
                            eprintln!("! no item '{rest}'");
                        }
                    }
                    "status" => {
                        let mut stdout = std::io::stdout();
                        if let Err(e) = view.render_status(&manager, &state, &mut stdout) {
                            warn!(error = %e, "status render failed");
                        }
                    }
                    "log" => {
                        let was = show_events.fetch_xor(true, std::sync::atomic::Ordering::Relaxed);
                        println!(
                            "protocol log echo {} ({} entries so far)",
                            if was { "off" } else { "on" },
                            manager.event_log_snapshot().len()
                        );
                    }
                    "focus" => manager.handle_focus_regained().await,
                    "quit" | "exit" => break,
                    other => eprintln!("! unknown command '{other}'; try `help`"),
                }
            }
        }
    }

    manager.disconnect().await;
    info!("console stopped");
    Ok(())
}
