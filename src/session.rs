use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

use crate::asset_block::AssetBlock;
use crate::bridge::{Credentials, SyncBridge, SyncError};
use crate::config::{Config, MAX_WAIT_SECS};
use crate::player::{Player, PlayerEvent};
use crate::queue_controller::{Indicator, PlaybackQueueController, QueueState};

/// Floor for re-trying after the queue ran dry and no block could be produced.
const MIN_RETRY_SECS: f64 = 30.0;

const SYNC_FAILED_LOGIN: &str =
    "An error occurred while synchronizing with the server. Please try logging in again.";

#[derive(Debug)]
pub enum SessionCommand {
    /// Skip to the next asset, keeping the play/pause state.
    Next,
    Jump(usize),
    TogglePlay,
    Sync,
    Login(Credentials),
    Logout,
    /// Replies with a listing of the loaded block, if any.
    ListBlock(oneshot::Sender<Option<String>>),
    Quit,
}

/// Things the UI must interrupt the operator for.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    LoginRequired { error: Option<String> },
    LoggedIn,
    /// A sync with no prior history started; show a blocking progress indicator.
    FirstSync,
    FirstSyncDone,
    /// The server runs a release this client cannot talk to.
    VersionMismatch { ours: String, server: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub interrupt_wait_on_sync: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            interrupt_wait_on_sync: true,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            interrupt_wait_on_sync: config.interrupt_wait_on_sync,
        }
    }
}

type LocalFuture<T> = Pin<Box<dyn Future<Output = T>>>;

struct PendingSync {
    generation: u64,
    /// Controller block identity when the sync was issued.
    block_id: u64,
    first: bool,
    future: LocalFuture<Result<AssetBlock, SyncError>>,
}

struct PendingLogin {
    protocol: String,
    future: LocalFuture<Result<(), SyncError>>,
}

struct SyncOutcome {
    generation: u64,
    block_id: u64,
    first: bool,
    result: Result<AssetBlock, SyncError>,
}

/// Drives a [`PlaybackQueueController`] from operator commands, player events,
/// bridge results and the post-block wait, all on one task.
pub struct Session<B: SyncBridge + 'static, P: Player> {
    bridge: Arc<B>,
    controller: PlaybackQueueController<P>,
    notices: UnboundedSender<SessionNotice>,
    options: SessionOptions,
    logged_in: bool,
    sync_generation: u64,
    pending_sync: Option<PendingSync>,
    pending_login: Option<PendingLogin>,
    wait_deadline: Option<Instant>,
    /// Block id whose wait has already been scheduled.
    waited_block: Option<u64>,
    held_block: Option<AssetBlock>,
}

impl<B: SyncBridge + 'static, P: Player> Session<B, P> {
    pub fn new(
        bridge: Arc<B>,
        controller: PlaybackQueueController<P>,
        notices: UnboundedSender<SessionNotice>,
        options: SessionOptions,
    ) -> Self {
        Self {
            bridge,
            controller,
            notices,
            options,
            logged_in: false,
            sync_generation: 0,
            pending_sync: None,
            pending_login: None,
            wait_deadline: None,
            waited_block: None,
            held_block: None,
        }
    }

    pub fn controller(&self) -> &PlaybackQueueController<P> {
        &self.controller
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn is_syncing(&self) -> bool {
        self.pending_sync.is_some()
    }

    pub fn wait_deadline(&self) -> Option<Instant> {
        self.wait_deadline
    }

    fn notify(&self, notice: SessionNotice) {
        if self.notices.send(notice).is_err() {
            debug!("No one is listening for session notices");
        }
    }

    /// Checks the stored login and gets a first block going.
    pub async fn start(&mut self) {
        match self.bridge.check_authorization().await {
            Ok(status) if status.logged_in => {
                self.logged_in = true;
                let indicator = if status.connected { Indicator::Online } else { Indicator::Offline };
                self.controller.set_indicator(indicator, "Checked authorization");

                if status.has_synced {
                    self.load_cached().await;
                } else {
                    self.start_sync();
                }
            }
            Ok(_) => self.require_login(None),
            Err(SyncError::VersionMismatch(server)) => {
                error!("Incompatible server {}", server);
                self.notify(SessionNotice::VersionMismatch {
                    ours: crate::VERSION.to_string(),
                    server,
                });
                self.require_login(None);
            }
            Err(e) => {
                error!("Authorization check failed: {}", e);
                self.require_login(Some(e.to_string()));
            }
        }
    }

    /// Runs until `Quit` or the command channel closes.
    pub async fn run(
        &mut self,
        commands: &mut UnboundedReceiver<SessionCommand>,
        player_events: &mut UnboundedReceiver<PlayerEvent>,
    ) -> Result<()> {
        self.start().await;
        while self.step(commands, player_events).await {}

        info!("Session ending");
        self.pending_sync = None;
        self.pending_login = None;
        self.controller.teardown();
        Ok(())
    }

    /// Waits for and handles one event. Returns `false` once the session should stop.
    pub async fn step(
        &mut self,
        commands: &mut UnboundedReceiver<SessionCommand>,
        player_events: &mut UnboundedReceiver<PlayerEvent>,
    ) -> bool {
        let deadline = self.wait_deadline;

        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => return self.handle_command(command).await,
                None => return false,
            },
            Some(event) = player_events.recv() => {
                self.controller.handle_player_event(event);
                self.after_transition();
            }
            outcome = poll_sync(&mut self.pending_sync) => {
                self.pending_sync = None;
                self.apply_sync(outcome).await;
            }
            (protocol, result) = poll_login(&mut self.pending_login) => {
                self.pending_login = None;
                self.apply_login(&protocol, result);
            }
            _ = sleep_until(deadline) => {
                self.wait_deadline = None;
                self.on_wait_elapsed();
            }
        }

        true
    }

    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        debug!("Command: {:?}", command);
        match command {
            SessionCommand::Next => {
                let auto_play = self.controller.wants_play();
                self.controller.advance(auto_play);
            }
            SessionCommand::Jump(index) => {
                let auto_play = self.controller.wants_play();
                self.controller.jump_to(index, auto_play);
            }
            SessionCommand::TogglePlay => match self.controller.toggle_play() {
                Ok(true) => info!("Playing"),
                Ok(false) => info!("Paused"),
                Err(e) => warn!("Cannot toggle playback: {}", e),
            },
            SessionCommand::Sync => self.start_sync(),
            SessionCommand::Login(credentials) => self.start_login(credentials),
            SessionCommand::Logout => self.logout().await,
            SessionCommand::ListBlock(reply) => {
                let current = (self.controller.state() == QueueState::Playing).then(|| self.controller.position());
                let listing = self.controller.block().map(|b| b.display_block(current));
                if reply.send(listing).is_err() {
                    debug!("Block listing dropped");
                }
            }
            SessionCommand::Quit => return false,
        }

        self.after_transition();
        true
    }

    /// Issues a sync. Any sync still in flight is dropped in favour of this one.
    pub fn start_sync(&mut self) {
        if !self.logged_in {
            warn!("Not syncing, not logged in");
            return;
        }

        let first = self.bridge.last_sync().is_none();
        if first {
            self.notify(SessionNotice::FirstSync);
            self.controller.set_indicator(Indicator::Pending, "Performing first sync...");
        } else {
            self.controller.set_indicator(Indicator::Pending, "Syncing");
        }

        if let Some(previous) = &self.pending_sync {
            debug!("Sync {} superseded", previous.generation);
        }
        self.sync_generation += 1;
        info!("Sync {} started", self.sync_generation);

        let bridge = Arc::clone(&self.bridge);
        self.pending_sync = Some(PendingSync {
            generation: self.sync_generation,
            block_id: self.controller.block_id(),
            first,
            future: Box::pin(async move {
                bridge.sync().await?;
                bridge.load_asset_block().await
            }),
        });
    }

    async fn apply_sync(&mut self, outcome: SyncOutcome) {
        if outcome.generation != self.sync_generation {
            debug!("Ignoring result of superseded sync {}", outcome.generation);
            return;
        }
        if outcome.first {
            self.notify(SessionNotice::FirstSyncDone);
        }

        match outcome.result {
            Ok(block) if outcome.block_id != self.controller.block_id() => {
                debug!(
                    "Ignoring synced block of {} assets, queue moved on since the sync began",
                    block.len()
                );
            }
            Ok(block) => self.deliver_block(block),
            Err(e) => self.handle_sync_error(e, outcome.first).await,
        }

        self.after_transition();
    }

    fn deliver_block(&mut self, block: AssetBlock) {
        let counting_down = self.controller.state() == QueueState::Waiting && self.wait_deadline.is_some();
        if counting_down && !self.options.interrupt_wait_on_sync {
            info!("Holding synced block until the wait is over");
            self.held_block = Some(block);
            self.controller.set_indicator(Indicator::Online, "Next block ready");
            return;
        }

        self.held_block = None;
        self.controller.load_block(block);
    }

    async fn handle_sync_error(&mut self, error: SyncError, first: bool) {
        error!("Sync failed: {}", error);

        if error == SyncError::AccessDenied || first {
            self.pending_sync = None;
            if let Err(e) = self.bridge.logout().await {
                warn!("Logout after failed sync: {}", e);
            }
            self.require_login(Some(SYNC_FAILED_LOGIN.to_string()));
            return;
        }

        self.controller.set_indicator(Indicator::Offline, "Error syncing");
        if self.controller.state() != QueueState::Playing {
            self.load_cached().await;
        }
    }

    /// Loads a block from the bridge's local catalog without going to the server.
    async fn load_cached(&mut self) {
        match self.bridge.load_asset_block().await {
            Ok(block) => self.controller.load_block(block),
            Err(e) => {
                warn!("Could not load asset block: {}", e);
                self.controller.set_indicator(Indicator::Offline, format!("No asset block: {}", e));
                if self.controller.state() != QueueState::Playing {
                    let wait = self.controller.wait_seconds().unwrap_or(0.0).max(MIN_RETRY_SECS);
                    info!("Trying again in {:.0}s", wait);
                    self.wait_deadline = Some(deadline_after(wait));
                }
            }
        }
        self.after_transition();
    }

    fn on_wait_elapsed(&mut self) {
        info!("Wait is over");
        if let Some(block) = self.held_block.take() {
            self.controller.load_block(block);
        } else if self.logged_in {
            self.start_sync();
        } else {
            info!("Not logged in, next block comes after login");
        }
        self.after_transition();
    }

    fn start_login(&mut self, credentials: Credentials) {
        self.controller.set_indicator(Indicator::Pending, "Logging in...");
        let protocol = credentials.protocol.clone();
        let bridge = Arc::clone(&self.bridge);
        self.pending_login = Some(PendingLogin {
            protocol,
            future: Box::pin(async move { bridge.login(credentials).await }),
        });
    }

    fn apply_login(&mut self, protocol: &str, result: Result<(), SyncError>) {
        match result {
            Ok(()) => {
                self.logged_in = true;
                self.controller.set_indicator(Indicator::Online, "Logged in!");
                self.notify(SessionNotice::LoggedIn);
                self.start_sync();
            }
            Err(e) => {
                warn!("Login failed: {}", e);
                self.require_login(Some(e.login_message(protocol)));
            }
        }
    }

    async fn logout(&mut self) {
        self.pending_sync = None;
        self.pending_login = None;
        self.held_block = None;
        self.wait_deadline = None;
        if let Err(e) = self.bridge.logout().await {
            warn!("Logout failed: {}", e);
        }
        self.controller.teardown();
        self.require_login(None);
    }

    fn require_login(&mut self, error: Option<String>) {
        self.logged_in = false;
        self.controller.set_indicator(Indicator::Pending, "Logging in...");
        self.notify(SessionNotice::LoginRequired { error });
    }

    /// Schedules the post-block wait on entering `Waiting`, clears it once playing.
    fn after_transition(&mut self) {
        match self.controller.state() {
            QueueState::Waiting => {
                let block_id = self.controller.block_id();
                if self.waited_block != Some(block_id) {
                    let wait = self.controller.wait_seconds().unwrap_or(0.0);
                    info!("Next block in {:.0}s", wait);
                    self.waited_block = Some(block_id);
                    self.wait_deadline = Some(deadline_after(wait));
                }
            }
            QueueState::Playing => {
                self.waited_block = None;
                self.wait_deadline = None;
            }
            // A pending retry survives; logout clears it.
            QueueState::Empty => self.waited_block = None,
        }
    }
}

async fn poll_sync(pending: &mut Option<PendingSync>) -> SyncOutcome {
    match pending {
        Some(sync) => {
            let result = sync.future.as_mut().await;
            SyncOutcome {
                generation: sync.generation,
                block_id: sync.block_id,
                first: sync.first,
                result,
            }
        }
        None => std::future::pending().await,
    }
}

async fn poll_login(pending: &mut Option<PendingLogin>) -> (String, Result<(), SyncError>) {
    match pending {
        Some(login) => {
            let result = login.future.as_mut().await;
            (login.protocol.clone(), result)
        }
        None => std::future::pending().await,
    }
}

/// Capped at [`MAX_WAIT_SECS`]; negative and NaN waits count as zero.
fn deadline_after(secs: f64) -> Instant {
    Instant::now() + Duration::from_secs_f64(secs.max(0.0).min(MAX_WAIT_SECS))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
