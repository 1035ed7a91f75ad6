use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::{ColoredString, Colorize};
use log::{debug, info};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, oneshot, watch};

use tomato_client::{
    Credentials, HttpBridge, Indicator, PlaybackQueueController, QueueState, QueueStatus,
    RodioPlayer, Session, SessionCommand, SessionNotice, SessionOptions, SyncBridge, UserDir,
};

#[derive(Parser)]
#[command(name = "tomato")]
#[command(about = "Playout client for the Tomato radio automation server")]
#[command(version)]
struct Cli {
    /// Directory holding config, catalog and downloaded media
    #[arg(long, global = true)]
    user_dir: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to a Tomato server
    Login {
        hostname: String,
        username: String,
        #[arg(long, default_value = "https")]
        protocol: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored auth token
    Logout,
    /// Show login, connection and sync status
    Status,
    /// Download the catalog and media from the server
    Sync,
    /// Generate an asset block from the local catalog and print it
    Block,
    /// Read or change settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    /// Start the interactive playout session
    Run,
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    /// Values are parsed as JSON, falling back to plain text
    Set { key: String, value: String },
    Show,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn paint(indicator: Indicator) -> ColoredString {
    let dot = "●";
    match indicator {
        Indicator::Online => dot.green(),
        Indicator::Pending => dot.yellow(),
        Indicator::Offline => dot.red(),
    }
}

/// A block of `#rrggbb` colour for the terminal.
fn swatch(color: &str) -> ColoredString {
    let hex = color.trim_start_matches('#');
    let channel = |i: usize| {
        hex.get(i * 2..i * 2 + 2)
            .and_then(|c| u8::from_str_radix(c, 16).ok())
            .unwrap_or(0)
    };
    "██".truecolor(channel(0), channel(1), channel(2))
}

fn print_status(status: &QueueStatus) {
    let title = status.title.as_deref().unwrap_or("-");
    let time = status.track_time.as_deref().unwrap_or("");
    println!(
        "{} {} | {:?} {}/{} | {} {}",
        paint(status.indicator),
        status.message,
        status.state,
        (status.position + 1).min(status.block_len),
        status.block_len,
        title.bold(),
        time
    );
}

struct TomatoClient {
    bridge: Arc<HttpBridge>,
}

impl TomatoClient {
    fn new(user_dir: UserDir) -> Result<Self> {
        info!("Using user directory {}", user_dir.root().display());
        let bridge = HttpBridge::new(user_dir)?;
        Ok(Self {
            bridge: Arc::new(bridge),
        })
    }

    async fn handle_login(&self, credentials: Credentials) -> Result<()> {
        let protocol = credentials.protocol.clone();
        let hostname = credentials.hostname.clone();
        self.bridge
            .login(credentials)
            .await
            .map_err(|e| anyhow!(e.login_message(&protocol)))?;
        println!("{} Logged in to {}", paint(Indicator::Online), hostname);
        Ok(())
    }

    async fn handle_logout(&self) -> Result<()> {
        self.bridge.logout().await?;
        println!("Logged out");
        Ok(())
    }

    async fn handle_status(&self) -> Result<()> {
        let status = self.bridge.check_authorization().await?;
        let config = self.bridge.config();

        let indicator = match (status.logged_in, status.connected) {
            (true, true) => Indicator::Online,
            (true, false) => Indicator::Offline,
            (false, _) => Indicator::Pending,
        };

        println!("=== Tomato Status ===");
        println!("{} {}", paint(indicator), config.hostname.as_deref().unwrap_or("no server configured"));
        println!("Logged in: {}", status.logged_in);
        println!("Connected: {}", status.connected);
        println!("Last sync: {}", config.last_sync.as_deref().unwrap_or("never"));
        println!("=====================");
        Ok(())
    }

    async fn handle_sync(&self) -> Result<()> {
        println!("Syncing with {}...", self.bridge.config().hostname.as_deref().unwrap_or("server"));
        self.bridge.sync().await.context("Sync failed")?;
        println!("{} Sync complete", paint(Indicator::Online));
        Ok(())
    }

    async fn handle_block(&self) -> Result<()> {
        let block = self
            .bridge
            .load_asset_block()
            .await
            .context("Could not generate an asset block")?;
        print!("{}", block.display_block(None));
        for asset in &block.assets {
            let (wave, progress) = asset.waveform_colors();
            println!("  {}{} {}", swatch(&wave), swatch(&progress), asset.name);
        }
        Ok(())
    }

    fn handle_config(&self, action: Option<ConfigAction>) -> Result<()> {
        match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Get { key } => {
                println!("{}", self.bridge.config().get(&key)?);
            }
            ConfigAction::Set { key, value } => {
                self.bridge.update_config(|config| config.set_from_str(&key, &value))?;
                println!("{} = {}", key, self.bridge.config().get(&key)?);
            }
            ConfigAction::Show => {
                let mut map = self.bridge.config().to_map()?;
                if let Some(token) = map.get_mut("auth_token") {
                    if !token.is_null() {
                        *token = Value::String("<hidden>".to_string());
                    }
                }
                let text = serde_json::to_string_pretty(&map).context("Failed to format config")?;
                println!("{}", text);
            }
        }
        Ok(())
    }

    async fn handle_run(&self) -> Result<()> {
        let config = self.bridge.config();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let player = RodioPlayer::new(event_tx)?;
        let controller = PlaybackQueueController::new(player).with_autoplay(config.autoplay_blocks);

        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_updates(controller.subscribe(), notice_rx));
        let reader = tokio::spawn(read_commands(command_tx, controller.subscribe(), config.protocol.clone()));

        println!("🍅 Tomato v{}", tomato_client::VERSION);
        println!("Commands: next, jump <n>, play, pause, sync, status, list, login, logout, quit");

        let mut session = Session::new(
            Arc::clone(&self.bridge),
            controller,
            notice_tx,
            SessionOptions::from(&config),
        );
        let result = session.run(&mut command_rx, &mut event_rx).await;

        printer.abort();
        reader.abort();
        result
    }
}

/// Prints status lines on meaningful changes (not every progress tick) and session notices.
async fn print_updates(
    mut status: watch::Receiver<QueueStatus>,
    mut notices: mpsc::UnboundedReceiver<SessionNotice>,
) {
    let mut last: Option<(QueueState, Indicator, String, Option<String>)> = None;

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                let key = (current.state, current.indicator, current.message.clone(), current.title.clone());
                if last.as_ref() != Some(&key) {
                    print_status(&current);
                    last = Some(key);
                }
            }
            Some(notice) = notices.recv() => match notice {
                SessionNotice::LoginRequired { error } => {
                    if let Some(error) = error {
                        println!("{}", error.red());
                    }
                    println!("{}", "Login required, type 'login'".yellow());
                }
                SessionNotice::LoggedIn => println!("{} Logged in", paint(Indicator::Online)),
                SessionNotice::FirstSync => {
                    println!("{}", "Performing first sync, this may take a while...".yellow())
                }
                SessionNotice::FirstSyncDone => println!("First sync finished"),
                SessionNotice::VersionMismatch { ours, server } => {
                    println!("{}", "Incompatible Tomato version on the server.".red());
                    println!("Our version: {}", ours);
                    println!("Server version: {}", server);
                }
            },
        }
    }
}

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<Option<String>> {
    print!("{}", label);
    std::io::stdout().flush().context("Failed to flush stdout")?;
    let line = lines.next_line().await.context("Failed to read stdin")?;
    Ok(line.map(|l| l.trim().to_string()))
}

async fn read_credentials(lines: &mut Lines<BufReader<Stdin>>, protocol: &str) -> Result<Option<Credentials>> {
    let Some(hostname) = prompt(lines, "Hostname: ").await? else {
        return Ok(None);
    };
    let Some(username) = prompt(lines, "Username: ").await? else {
        return Ok(None);
    };
    let Some(password) = prompt(lines, "Password: ").await? else {
        return Ok(None);
    };
    Ok(Some(Credentials {
        protocol: protocol.to_string(),
        hostname,
        username,
        password,
    }))
}

/// Turns stdin lines into session commands until `quit` or EOF.
async fn read_commands(
    commands: mpsc::UnboundedSender<SessionCommand>,
    status: watch::Receiver<QueueStatus>,
    protocol: String,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let Some(line) = prompt(&mut lines, "tomato> ").await? else {
            break;
        };

        let mut parts = line.split_whitespace();
        let command = match (parts.next(), parts.next()) {
            (None, _) => continue,
            (Some("next"), _) => SessionCommand::Next,
            (Some("play" | "pause"), _) => SessionCommand::TogglePlay,
            (Some("sync"), _) => SessionCommand::Sync,
            (Some("logout"), _) => SessionCommand::Logout,
            (Some("quit" | "exit"), _) => break,
            (Some("jump"), Some(n)) => match n.parse::<usize>() {
                Ok(n) if n > 0 => SessionCommand::Jump(n - 1),
                _ => {
                    eprintln!("Usage: jump <1-based position>");
                    continue;
                }
            },
            (Some("status"), _) => {
                let current = status.borrow().clone();
                print_status(&current);
                continue;
            }
            (Some("list"), _) => {
                let (reply, listing) = oneshot::channel();
                if commands.send(SessionCommand::ListBlock(reply)).is_err() {
                    break;
                }
                match listing.await {
                    Ok(Some(listing)) => print!("{}", listing),
                    Ok(None) => println!("No block loaded"),
                    Err(_) => break,
                }
                continue;
            }
            (Some("login"), _) => match read_credentials(&mut lines, &protocol).await? {
                Some(credentials) => SessionCommand::Login(credentials),
                None => break,
            },
            (Some(other), _) => {
                eprintln!("Unknown command: {}", other);
                continue;
            }
        };

        debug!("Sending {:?}", command);
        if commands.send(command).is_err() {
            break;
        }
    }

    println!("Goodbye!");
    // Ignored if the session already stopped.
    let _ = commands.send(SessionCommand::Quit);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let client = TomatoClient::new(UserDir::resolve(cli.user_dir))?;

    match cli.command {
        Commands::Login {
            hostname,
            username,
            protocol,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => {
                    let mut lines = BufReader::new(tokio::io::stdin()).lines();
                    prompt(&mut lines, "Password: ")
                        .await?
                        .ok_or_else(|| anyhow!("No password given"))?
                }
            };
            client
                .handle_login(Credentials {
                    protocol,
                    hostname,
                    username,
                    password,
                })
                .await?;
        }
        Commands::Logout => {
            client.handle_logout().await?;
        }
        Commands::Status => {
            client.handle_status().await?;
        }
        Commands::Sync => {
            client.handle_sync().await?;
        }
        Commands::Block => {
            client.handle_block().await?;
        }
        Commands::Config { action } => {
            client.handle_config(action)?;
        }
        Commands::Run => {
            client.handle_run().await?;
        }
    }

    Ok(())
}
