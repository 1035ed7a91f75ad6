use std::fmt;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::asset_block::{format_duration, Asset, AssetBlock};
use crate::player::{Player, PlayerEvent, PlayerEventKind, PlayerHandle};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueueState {
    Empty,
    Playing,
    Waiting,
}

/// Three-state connection/health light shown next to the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Indicator {
    Offline,
    Pending,
    Online,
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indicator::Offline => write!(f, "offline"),
            Indicator::Pending => write!(f, "pending"),
            Indicator::Online => write!(f, "online"),
        }
    }
}

/// Snapshot published to the UI after every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueStatus {
    pub state: QueueState,
    pub indicator: Indicator,
    pub message: String,
    /// Name of the loaded asset, or "Waiting..." once the block is exhausted.
    pub title: Option<String>,
    /// `elapsed/total`, e.g. `0:12/2:05`.
    pub track_time: Option<String>,
    pub position: usize,
    pub block_len: usize,
    pub block_id: u64,
}

impl Default for QueueStatus {
    fn default() -> Self {
        Self {
            state: QueueState::Empty,
            indicator: Indicator::Pending,
            message: "No block loaded".to_string(),
            title: None,
            track_time: None,
            position: 0,
            block_len: 0,
            block_id: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ActivePlayer {
    handle: PlayerHandle,
    play_on_ready: bool,
    ready: bool,
}

/// Owns the current asset block, the cursor into it and the single live player.
pub struct PlaybackQueueController<P: Player> {
    player: P,
    block: Option<AssetBlock>,
    block_id: u64,
    position: usize,
    state: QueueState,
    active: Option<ActivePlayer>,
    next_handle: u64,
    autoplay_blocks: bool,
    status: watch::Sender<QueueStatus>,
}

impl<P: Player> PlaybackQueueController<P> {
    pub fn new(player: P) -> Self {
        let (status, _) = watch::channel(QueueStatus::default());
        Self {
            player,
            block: None,
            block_id: 0,
            position: 0,
            state: QueueState::Empty,
            active: None,
            next_handle: 0,
            autoplay_blocks: false,
            status,
        }
    }

    /// Start the first asset of every new block without waiting for the operator.
    pub fn with_autoplay(mut self, autoplay_blocks: bool) -> Self {
        self.autoplay_blocks = autoplay_blocks;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> QueueStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn block(&self) -> Option<&AssetBlock> {
        self.block.as_ref()
    }

    /// Changes every time a block is loaded or torn down.
    pub fn block_id(&self) -> u64 {
        self.block_id
    }

    pub fn active_handle(&self) -> Option<PlayerHandle> {
        self.active.map(|a| a.handle)
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn current_asset(&self) -> Option<&Asset> {
        match self.state {
            QueueState::Playing => self.block.as_ref().and_then(|b| b.get(self.position)),
            QueueState::Empty | QueueState::Waiting => None,
        }
    }

    /// Seconds the block asks to wait once exhausted.
    pub fn wait_seconds(&self) -> Option<f64> {
        self.block.as_ref().map(|b| b.wait)
    }

    pub fn is_playing(&self) -> bool {
        self.active
            .map(|a| self.player.is_playing(a.handle))
            .unwrap_or(false)
    }

    /// Replaces the active block and loads its first asset.
    pub fn load_block(&mut self, block: AssetBlock) {
        self.release_player();
        self.block_id += 1;
        self.position = 0;
        info!(
            "Loaded block {} with {} assets, wait {}",
            self.block_id,
            block.len(),
            format_duration(block.wait)
        );
        self.block = Some(block);
        self.state = QueueState::Playing;

        self.publish(|status| {
            status.indicator = Indicator::Online;
            status.message = "Asset block loaded".to_string();
        });

        let auto_play = self.autoplay_blocks;
        self.load_from(0, auto_play);
    }

    /// Moves the cursor forward one asset.
    pub fn advance(&mut self, auto_play: bool) {
        match self.state {
            QueueState::Empty => debug!("advance ignored, no block loaded"),
            QueueState::Waiting => debug!("advance ignored, block already exhausted"),
            QueueState::Playing => {
                let next = self.position + 1;
                self.load_from(next, auto_play);
            }
        }
    }

    /// Jumps to `index`. Out-of-range indexes exhaust the block rather than fail.
    pub fn jump_to(&mut self, index: usize, auto_play: bool) {
        let Some(len) = self.block.as_ref().map(|b| b.len()) else {
            debug!("jump_to({}) ignored, no block loaded", index);
            return;
        };

        if index >= len {
            warn!("jump_to({}) out of range for {} assets, clamping to end", index, len);
        }
        self.load_from(index.min(len), auto_play);
    }

    /// Plays or pauses the loaded asset.
    pub fn toggle_play(&mut self) -> Result<bool> {
        let active = self.active.ok_or_else(|| anyhow!("No asset is loaded"))?;

        if self.player.is_playing(active.handle) {
            self.player.pause(active.handle)?;
            Ok(false)
        } else if active.ready {
            self.player.play(active.handle)?;
            Ok(true)
        } else {
            // Not decoded yet; start as soon as it is.
            let wanted = !active.play_on_ready;
            if let Some(a) = self.active.as_mut() {
                a.play_on_ready = wanted;
            }
            Ok(wanted)
        }
    }

    /// Playing, or asked to play once the live player is ready.
    pub fn wants_play(&self) -> bool {
        self.active
            .map(|a| a.play_on_ready || self.player.is_playing(a.handle))
            .unwrap_or(false)
    }

    /// Drops the block and the player, back to `Empty`.
    pub fn teardown(&mut self) {
        self.release_player();
        self.block = None;
        self.block_id += 1;
        self.position = 0;
        self.state = QueueState::Empty;
        info!("Queue torn down");

        self.publish(|status| {
            status.message = "No block loaded".to_string();
        });
    }

    /// Shows a status without touching queue state.
    pub fn set_indicator(&mut self, indicator: Indicator, message: impl Into<String>) {
        let message = message.into();
        self.publish(|status| {
            status.indicator = indicator;
            status.message = message;
        });
    }

    /// Reacts to a lifecycle event. Events from anything but the live player are dropped.
    pub fn handle_player_event(&mut self, event: PlayerEvent) {
        let Some(active) = self.active else {
            debug!("Dropping {:?} from {}, no live player", event.kind, event.handle);
            return;
        };
        if active.handle != event.handle {
            debug!("Dropping stale {:?} from {} (live: {})", event.kind, event.handle, active.handle);
            return;
        }

        match event.kind {
            PlayerEventKind::Ready => {
                if let Some(a) = self.active.as_mut() {
                    a.ready = true;
                    a.play_on_ready = false;
                }
                let length = self.current_asset().map(|a| a.length).unwrap_or(0.0);
                let track_time = format!("0:00/{}", format_duration(length));
                self.publish(|status| status.track_time = Some(track_time));

                if active.play_on_ready {
                    if let Err(e) = self.player.play(active.handle) {
                        self.skip_broken(&e.to_string());
                    }
                }
            }
            PlayerEventKind::Progress { elapsed, total } => {
                let track_time = format!("{}/{}", format_duration(elapsed), format_duration(total));
                self.publish(|status| status.track_time = Some(track_time));
            }
            PlayerEventKind::Finish => {
                debug!("{} finished", event.handle);
                self.advance(true);
            }
            PlayerEventKind::Error(message) => self.skip_broken(&message),
        }
    }

    fn skip_broken(&mut self, message: &str) {
        let name = self
            .current_asset()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "asset".to_string());
        warn!("Playback error on '{}': {}", name, message);

        let text = format!("Error playing {}: {}", name, message);
        self.publish(|status| {
            status.indicator = Indicator::Offline;
            status.message = text;
        });
        self.advance(true);
    }

    /// Loads the first playable asset at or after `index`, or enters `Waiting`.
    fn load_from(&mut self, index: usize, mut auto_play: bool) {
        let Some((len, wait)) = self.block.as_ref().map(|b| (b.len(), b.wait)) else {
            return;
        };

        let mut index = index;
        while let Some(asset) = self.block.as_ref().and_then(|b| b.get(index)).cloned() {
            self.release_player();
            self.position = index;
            self.state = QueueState::Playing;

            self.next_handle += 1;
            let handle = PlayerHandle(self.next_handle);

            match self.player.create(handle, &asset) {
                Ok(()) => {
                    self.active = Some(ActivePlayer {
                        handle,
                        play_on_ready: auto_play,
                        ready: false,
                    });
                    debug!("Loading '{}' at {} into {}", asset.name, index, handle);

                    let title = asset.name.clone();
                    let track_time = format!("0:00/{}", format_duration(asset.length));
                    self.publish(|status| {
                        status.title = Some(title);
                        status.track_time = Some(track_time);
                    });
                    return;
                }
                Err(e) => {
                    warn!("Could not load '{}': {:#}", asset.name, e);
                    let text = format!("Error playing {}: {}", asset.name, e);
                    self.publish(|status| {
                        status.indicator = Indicator::Offline;
                        status.message = text;
                    });
                    // A broken asset counts as played.
                    index += 1;
                    auto_play = true;
                }
            }
        }

        self.enter_waiting(len, wait);
    }

    fn enter_waiting(&mut self, len: usize, wait: f64) {
        self.release_player();
        self.position = len;
        self.state = QueueState::Waiting;
        info!("Block {} exhausted, waiting {}", self.block_id, format_duration(wait));

        let message = format!("Waiting, wait {}s", wait.max(0.0).round() as u64);
        let title = "Waiting...".to_string();
        self.publish(|status| {
            status.message = message;
            status.title = Some(title);
            status.track_time = None;
        });
    }

    fn release_player(&mut self) {
        if let Some(active) = self.active.take() {
            self.player.destroy(active.handle);
        }
    }

    fn publish(&mut self, change: impl FnOnce(&mut QueueStatus)) {
        let state = self.state;
        let position = self.position;
        let block_len = self.block.as_ref().map(|b| b.len()).unwrap_or(0);
        let block_id = self.block_id;
        let has_player = self.active.is_some();

        self.status.send_modify(|status| {
            change(status);
            status.state = state;
            status.position = position;
            status.block_len = block_len;
            status.block_id = block_id;
            if state != QueueState::Playing || !has_player {
                if state == QueueState::Empty {
                    status.title = None;
                }
                status.track_time = status.track_time.take().filter(|_| has_player);
            }
        });
    }
}

impl<P: Player> Drop for PlaybackQueueController<P> {
    fn drop(&mut self) {
        self.release_player();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::MockPlayer;
    use mockall::predicate::{always, eq};
    use mockall::Sequence;
    use std::collections::BTreeSet;

    /// Records every call and fails if two instances are ever alive together.
    #[derive(Default)]
    struct FakePlayer {
        live: BTreeSet<PlayerHandle>,
        created: Vec<(PlayerHandle, String)>,
        playing: BTreeSet<PlayerHandle>,
        max_live: usize,
        broken: Vec<String>,
    }

    impl Player for FakePlayer {
        fn create(&mut self, handle: PlayerHandle, asset: &Asset) -> Result<()> {
            if self.broken.contains(&asset.name) {
                return Err(anyhow!("cannot decode"));
            }
            self.live.insert(handle);
            self.max_live = self.max_live.max(self.live.len());
            self.created.push((handle, asset.name.clone()));
            Ok(())
        }

        fn play(&mut self, handle: PlayerHandle) -> Result<()> {
            if !self.live.contains(&handle) {
                return Err(anyhow!("not live"));
            }
            self.playing.insert(handle);
            Ok(())
        }

        fn pause(&mut self, handle: PlayerHandle) -> Result<()> {
            self.playing.remove(&handle);
            Ok(())
        }

        fn is_playing(&self, handle: PlayerHandle) -> bool {
            self.playing.contains(&handle)
        }

        fn destroy(&mut self, handle: PlayerHandle) {
            self.live.remove(&handle);
            self.playing.remove(&handle);
        }
    }

    fn asset(name: &str, length: f64) -> Asset {
        Asset::new(name, format!("{}.mp3", name), length, "red")
    }

    fn block(names: &[&str], wait: f64) -> AssetBlock {
        AssetBlock::new(names.iter().map(|n| asset(n, 30.0)).collect(), wait)
    }

    fn finish(controller: &mut PlaybackQueueController<FakePlayer>) {
        let handle = controller.active_handle().expect("live player");
        controller.handle_player_event(PlayerEvent::new(handle, PlayerEventKind::Finish));
    }

    #[test]
    fn test_new_controller_is_empty() {
        let controller = PlaybackQueueController::new(FakePlayer::default());
        assert_eq!(controller.state(), QueueState::Empty);
        assert!(controller.current_asset().is_none());
        assert_eq!(controller.status().state, QueueState::Empty);
    }

    #[test]
    fn test_two_asset_scenario() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        let block = AssetBlock::new(vec![asset("A", 30.0), asset("B", 45.0)], 10.0);

        controller.load_block(block);
        assert_eq!(controller.state(), QueueState::Playing);
        assert_eq!(controller.current_asset().unwrap().name, "A");
        assert_eq!(controller.status().message, "Asset block loaded");
        assert_eq!(controller.status().track_time.as_deref(), Some("0:00/0:30"));

        finish(&mut controller);
        assert_eq!(controller.current_asset().unwrap().name, "B");
        assert_eq!(controller.status().track_time.as_deref(), Some("0:00/0:45"));

        finish(&mut controller);
        assert_eq!(controller.state(), QueueState::Waiting);
        assert!(controller.current_asset().is_none());
        let status = controller.status();
        assert!(status.message.contains("wait 10s"), "{}", status.message);
        assert_eq!(status.title.as_deref(), Some("Waiting..."));
        assert!(status.track_time.is_none());
        assert!(controller.player().live.is_empty());
    }

    #[test]
    fn test_advance_n_times_reaches_waiting() {
        for n in 1..6 {
            let names: Vec<String> = (0..n).map(|i| format!("asset{}", i)).collect();
            let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
            let mut controller = PlaybackQueueController::new(FakePlayer::default());

            controller.load_block(block(&refs, 5.0));
            let mut states = vec![controller.state()];
            for _ in 0..n {
                controller.advance(false);
                states.push(controller.state());
            }

            let mut expected = vec![QueueState::Playing; n];
            expected.push(QueueState::Waiting);
            assert_eq!(states, expected);
            assert!(controller.current_asset().is_none());
            assert_eq!(controller.position(), n);
        }
    }

    #[test]
    fn test_empty_block_goes_straight_to_waiting() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.load_block(AssetBlock::new(Vec::new(), 3.0));
        assert_eq!(controller.state(), QueueState::Waiting);
        assert!(controller.player().created.is_empty());
    }

    #[test]
    fn test_jump_to_lands_or_clamps() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.load_block(block(&["A", "B", "C"], 1.0));

        for (k, name) in ["A", "B", "C"].iter().enumerate() {
            controller.jump_to(k, false);
            assert_eq!(controller.current_asset().unwrap().name, *name);
            assert_eq!(controller.position(), k);
        }

        controller.jump_to(99, true);
        assert_eq!(controller.state(), QueueState::Waiting);
        assert_eq!(controller.position(), 3);
        assert!(controller.current_asset().is_none());

        // Operator can pick an asset again after the block ran out.
        controller.jump_to(1, false);
        assert_eq!(controller.state(), QueueState::Playing);
        assert_eq!(controller.current_asset().unwrap().name, "B");
    }

    #[test]
    fn test_operations_on_empty_are_noops() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.advance(true);
        controller.jump_to(0, true);
        assert_eq!(controller.state(), QueueState::Empty);
        assert!(controller.toggle_play().is_err());
        assert!(controller.player().created.is_empty());
    }

    #[test]
    fn test_at_most_one_live_player() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.load_block(block(&["A", "B", "C", "D"], 1.0));

        controller.jump_to(3, true);
        controller.jump_to(0, false);
        controller.advance(true);
        controller.advance(true);
        controller.jump_to(2, true);
        finish(&mut controller);
        controller.load_block(block(&["E", "F"], 1.0));
        controller.advance(false);
        controller.advance(false);

        assert_eq!(controller.player().max_live, 1);
        assert!(controller.player().live.is_empty());

        controller.load_block(block(&["G"], 1.0));
        assert_eq!(controller.player().live.len(), 1);
        controller.teardown();
        assert!(controller.player().live.is_empty());
        assert_eq!(controller.state(), QueueState::Empty);
    }

    #[test]
    fn test_stale_finish_is_ignored() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.load_block(block(&["A", "B", "C", "D"], 1.0));

        let first = controller.active_handle().unwrap();
        controller.advance(false);
        controller.advance(false);
        assert_eq!(controller.current_asset().unwrap().name, "C");

        // The superseded player reports completion late.
        controller.handle_player_event(PlayerEvent::new(first, PlayerEventKind::Finish));
        controller.handle_player_event(PlayerEvent::new(
            first,
            PlayerEventKind::Error("late".into()),
        ));
        assert_eq!(controller.position(), 2);
        assert_eq!(controller.current_asset().unwrap().name, "C");
    }

    #[test]
    fn test_progress_updates_track_time() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.load_block(AssetBlock::new(vec![asset("A", 125.0)], 1.0));
        let handle = controller.active_handle().unwrap();

        controller.handle_player_event(PlayerEvent::new(
            handle,
            PlayerEventKind::Progress { elapsed: 12.4, total: 125.0 },
        ));
        assert_eq!(controller.status().track_time.as_deref(), Some("0:12/2:05"));
    }

    #[test]
    fn test_ready_starts_playback_only_when_requested() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.load_block(block(&["A", "B"], 1.0));
        let first = controller.active_handle().unwrap();

        controller.handle_player_event(PlayerEvent::new(first, PlayerEventKind::Ready));
        assert!(!controller.is_playing());

        finish(&mut controller);
        let second = controller.active_handle().unwrap();
        controller.handle_player_event(PlayerEvent::new(second, PlayerEventKind::Ready));
        assert!(controller.is_playing());
    }

    #[test]
    fn test_autoplay_blocks() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default()).with_autoplay(true);
        controller.load_block(block(&["A"], 1.0));
        let handle = controller.active_handle().unwrap();
        controller.handle_player_event(PlayerEvent::new(handle, PlayerEventKind::Ready));
        assert!(controller.is_playing());
    }

    #[test]
    fn test_toggle_play() -> Result<()> {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.load_block(block(&["A"], 1.0));
        let handle = controller.active_handle().unwrap();

        // Before ready: remembered and applied on ready.
        assert!(controller.toggle_play()?);
        assert!(!controller.is_playing());
        controller.handle_player_event(PlayerEvent::new(handle, PlayerEventKind::Ready));
        assert!(controller.is_playing());

        assert!(!controller.toggle_play()?);
        assert!(!controller.is_playing());
        assert!(controller.toggle_play()?);
        assert!(controller.is_playing());
        Ok(())
    }

    #[test]
    fn test_play_request_before_ready() -> Result<()> {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.load_block(block(&["A", "B"], 1.0));
        assert!(!controller.wants_play());

        assert!(controller.toggle_play()?);
        assert!(controller.wants_play());
        assert!(!controller.is_playing());

        // Pressed again before decoding finished: cancelled.
        assert!(!controller.toggle_play()?);
        assert!(!controller.wants_play());
        let handle = controller.active_handle().unwrap();
        controller.handle_player_event(PlayerEvent::new(handle, PlayerEventKind::Ready));
        assert!(!controller.is_playing());

        assert!(controller.toggle_play()?);
        assert!(controller.is_playing());
        assert!(!controller.toggle_play()?);
        assert!(!controller.wants_play());
        Ok(())
    }

    #[test]
    fn test_error_event_skips_asset() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.load_block(block(&["A", "B"], 1.0));
        let handle = controller.active_handle().unwrap();

        controller.handle_player_event(PlayerEvent::new(
            handle,
            PlayerEventKind::Error("network error".into()),
        ));
        assert_eq!(controller.current_asset().unwrap().name, "B");
        let status = controller.status();
        assert_eq!(status.indicator, Indicator::Offline);
        assert!(status.message.contains("Error playing A"));
    }

    #[test]
    fn test_create_failure_skips_to_next_playable() {
        let player = FakePlayer {
            broken: vec!["A".into(), "B".into()],
            ..FakePlayer::default()
        };
        let mut controller = PlaybackQueueController::new(player);
        controller.load_block(block(&["A", "B", "C"], 1.0));
        assert_eq!(controller.current_asset().unwrap().name, "C");
        assert_eq!(controller.player().created.len(), 1);

        let player = FakePlayer {
            broken: vec!["A".into()],
            ..FakePlayer::default()
        };
        let mut controller = PlaybackQueueController::new(player);
        controller.load_block(block(&["A"], 4.0));
        assert_eq!(controller.state(), QueueState::Waiting);
    }

    #[test]
    fn test_new_block_resets_cursor_and_identity() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        controller.load_block(block(&["A", "B"], 1.0));
        controller.advance(false);
        let first_id = controller.block_id();

        controller.load_block(block(&["C", "D"], 1.0));
        assert_eq!(controller.position(), 0);
        assert_eq!(controller.current_asset().unwrap().name, "C");
        assert_ne!(controller.block_id(), first_id);
    }

    #[test]
    fn test_status_subscription() {
        let mut controller = PlaybackQueueController::new(FakePlayer::default());
        let mut rx = controller.subscribe();

        controller.load_block(block(&["A"], 1.0));
        assert!(rx.has_changed().unwrap());
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.state, QueueState::Playing);
        assert_eq!(status.title.as_deref(), Some("A"));
        assert_eq!(status.block_len, 1);

        controller.set_indicator(Indicator::Offline, "Error syncing");
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.indicator, Indicator::Offline);
        assert_eq!(status.state, QueueState::Playing);
        assert_eq!(status.title.as_deref(), Some("A"));
    }

    #[test]
    fn test_mock_player_destroys_before_create() {
        let mut player = MockPlayer::new();
        let mut seq = Sequence::new();

        player
            .expect_create()
            .with(eq(PlayerHandle(1)), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        player
            .expect_destroy()
            .with(eq(PlayerHandle(1)))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        player
            .expect_create()
            .withf(|handle, asset| *handle == PlayerHandle(2) && asset.name == "B")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        player
            .expect_destroy()
            .with(eq(PlayerHandle(2)))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let mut controller = PlaybackQueueController::new(player);
        controller.load_block(block(&["A", "B"], 1.0));
        controller.advance(true);
        controller.advance(true);
        assert_eq!(controller.state(), QueueState::Waiting);
    }
}
