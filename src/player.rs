use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::asset_block::Asset;

/// Identity of one player instance. Events carry the handle they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerHandle(pub u64);

impl fmt::Display for PlayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEventKind {
    Ready,
    Finish,
    /// Seconds played and total seconds.
    Progress { elapsed: f64, total: f64 },
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEvent {
    pub handle: PlayerHandle,
    pub kind: PlayerEventKind,
}

impl PlayerEvent {
    pub fn new(handle: PlayerHandle, kind: PlayerEventKind) -> Self {
        Self { handle, kind }
    }
}

/// Decodes and plays one asset at a time.
///
/// `create` must not start audio on its own; the controller calls `play` once
/// the instance has reported `Ready`. Lifecycle events are delivered out of
/// band, tagged with the handle passed to `create`.
#[cfg_attr(test, mockall::automock)]
pub trait Player {
    fn create(&mut self, handle: PlayerHandle, asset: &Asset) -> Result<()>;
    fn play(&mut self, handle: PlayerHandle) -> Result<()>;
    fn pause(&mut self, handle: PlayerHandle) -> Result<()>;
    fn is_playing(&self, handle: PlayerHandle) -> bool;
    fn destroy(&mut self, handle: PlayerHandle);
}

/// Duration of an audio file according to its container, if it states one.
pub fn probe_duration<P: AsRef<Path>>(path: P) -> Result<Option<f64>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .with_context(|| format!("Unsupported audio file {}", path.display()))?;

    let duration = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .and_then(|t| match (t.codec_params.n_frames, t.codec_params.sample_rate) {
            (Some(frames), Some(rate)) if rate > 0 => Some(frames as f64 / rate as f64),
            _ => None,
        });

    Ok(duration)
}

struct Instance {
    sink: Arc<Sink>,
    watcher: JoinHandle<()>,
    clock: Arc<std::sync::Mutex<PlayClock>>,
}

/// Wall-clock play position that stops while paused.
#[derive(Debug, Default)]
struct PlayClock {
    played: Duration,
    resumed_at: Option<Instant>,
}

impl PlayClock {
    fn start(&mut self) {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
        }
    }

    fn stop(&mut self) {
        if let Some(at) = self.resumed_at.take() {
            self.played += at.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        self.played + self.resumed_at.map(|at| at.elapsed()).unwrap_or_default()
    }
}

/// [`Player`] backed by a rodio sink per asset.
///
/// Must be driven from inside a tokio runtime: each instance gets a watcher
/// task that reports progress and completion.
pub struct RodioPlayer {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
    events: UnboundedSender<PlayerEvent>,
    instances: HashMap<PlayerHandle, Instance>,
    tick: Duration,
}

impl RodioPlayer {
    pub fn new(events: UnboundedSender<PlayerEvent>) -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| anyhow!("Failed to create audio output stream: {}", e))?;

        info!("Audio stream initialized");

        Ok(Self {
            _stream: stream,
            stream_handle,
            events,
            instances: HashMap::new(),
            tick: Duration::from_millis(250),
        })
    }

    pub fn live_instances(&self) -> usize {
        self.instances.len()
    }
}

impl Player for RodioPlayer {
    fn create(&mut self, handle: PlayerHandle, asset: &Asset) -> Result<()> {
        let path = asset.local_path()?;
        let file = File::open(&path)
            .with_context(|| format!("Failed to open asset file {}", path.display()))?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|e| anyhow!("Failed to decode asset file {}: {}", path.display(), e))?;

        let total = source
            .total_duration()
            .map(|d| d.as_secs_f64())
            .or_else(|| probe_duration(&path).ok().flatten())
            .unwrap_or(asset.length);

        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| anyhow!("Failed to create audio sink: {}", e))?;
        sink.pause();
        sink.append(source);

        let sink = Arc::new(sink);
        let clock = Arc::new(std::sync::Mutex::new(PlayClock::default()));
        let watcher = tokio::spawn(watch_sink(
            handle,
            Arc::clone(&sink),
            Arc::clone(&clock),
            total,
            self.tick,
            self.events.clone(),
        ));

        debug!("Created {} for {}", handle, path.display());
        self.instances.insert(handle, Instance { sink, watcher, clock });
        Ok(())
    }

    fn play(&mut self, handle: PlayerHandle) -> Result<()> {
        let instance = self
            .instances
            .get(&handle)
            .ok_or_else(|| anyhow!("No live {}", handle))?;
        instance.sink.play();
        if let Ok(mut clock) = instance.clock.lock() {
            clock.start();
        }
        Ok(())
    }

    fn pause(&mut self, handle: PlayerHandle) -> Result<()> {
        let instance = self
            .instances
            .get(&handle)
            .ok_or_else(|| anyhow!("No live {}", handle))?;
        instance.sink.pause();
        if let Ok(mut clock) = instance.clock.lock() {
            clock.stop();
        }
        Ok(())
    }

    fn is_playing(&self, handle: PlayerHandle) -> bool {
        self.instances
            .get(&handle)
            .map(|i| !i.sink.is_paused() && !i.sink.empty())
            .unwrap_or(false)
    }

    fn destroy(&mut self, handle: PlayerHandle) {
        if let Some(instance) = self.instances.remove(&handle) {
            instance.watcher.abort();
            instance.sink.stop();
            debug!("Destroyed {}", handle);
        }
    }
}

impl Drop for RodioPlayer {
    fn drop(&mut self) {
        let handles: Vec<PlayerHandle> = self.instances.keys().copied().collect();
        for handle in handles {
            self.destroy(handle);
        }
    }
}

async fn watch_sink(
    handle: PlayerHandle,
    sink: Arc<Sink>,
    clock: Arc<std::sync::Mutex<PlayClock>>,
    total: f64,
    tick: Duration,
    events: UnboundedSender<PlayerEvent>,
) {
    if events.send(PlayerEvent::new(handle, PlayerEventKind::Ready)).is_err() {
        return;
    }

    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;

        if sink.empty() {
            let _ = events.send(PlayerEvent::new(handle, PlayerEventKind::Finish));
            break;
        }

        if sink.is_paused() {
            continue;
        }

        let elapsed = match clock.lock() {
            Ok(clock) => clock.elapsed().as_secs_f64().min(total),
            Err(_) => {
                warn!("{} clock poisoned", handle);
                break;
            }
        };

        let progress = PlayerEventKind::Progress { elapsed, total };
        if events.send(PlayerEvent::new(handle, progress)).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_clock_pauses() {
        let mut clock = PlayClock::default();
        assert_eq!(clock.elapsed(), Duration::ZERO);

        clock.start();
        std::thread::sleep(Duration::from_millis(20));
        clock.stop();
        let paused_at = clock.elapsed();
        assert!(paused_at >= Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.elapsed(), paused_at);
    }

    #[test]
    fn test_probe_duration_missing_file() {
        assert!(probe_duration("/definitely/not/here.mp3").is_err());
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(PlayerHandle(3).to_string(), "player#3");
    }

    #[tokio::test]
    async fn test_rodio_player_rejects_missing_file() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        // No audio device in CI is fine, there is nothing to test then.
        let Ok(mut player) = RodioPlayer::new(tx) else {
            return;
        };

        let asset = Asset::new("Missing", "/definitely/not/here.mp3", 5.0, "red");
        assert!(player.create(PlayerHandle(1), &asset).is_err());
        assert_eq!(player.live_instances(), 0);
        assert!(!player.is_playing(PlayerHandle(1)));
    }
}
