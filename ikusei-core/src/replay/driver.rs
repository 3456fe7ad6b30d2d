use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{PlaybackSpeed, PlayerState, ReplayPlayer};

/// Position published after every tick and control change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackFrame {
    pub virtual_ms: u64,
    pub state: PlayerState,
}

fn lock(player: &Mutex<ReplayPlayer>) -> MutexGuard<'_, ReplayPlayer> {
    player.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn frame_of(p: &ReplayPlayer) -> PlaybackFrame {
    PlaybackFrame {
        virtual_ms: p.virtual_ms(),
        state: p.state(),
    }
}

/// Drives a [`ReplayPlayer`] from a wall-clock interval.
///
/// At most one ticker task exists at a time. Pausing, seeking and dropping
/// cancel it while holding the player lock, so no tick lands after the call
/// returns.
pub struct PlaybackDriver {
    player: Arc<Mutex<ReplayPlayer>>,
    frames: Arc<watch::Sender<PlaybackFrame>>,
    ticker: Option<CancellationToken>,
}

impl PlaybackDriver {
    pub fn new(player: ReplayPlayer) -> Self {
        let (tx, _rx) = watch::channel(frame_of(&player));
        Self {
            player: Arc::new(Mutex::new(player)),
            frames: Arc::new(tx),
            ticker: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackFrame> {
        self.frames.subscribe()
    }

    pub fn frame(&self) -> PlaybackFrame {
        frame_of(&lock(&self.player))
    }

    /// Read the player under its lock.
    pub fn with_player<R>(&self, f: impl FnOnce(&ReplayPlayer) -> R) -> R {
        f(&lock(&self.player))
    }

    /// Start ticking. Must be called inside a tokio runtime.
    pub fn play(&mut self) {
        let mut guard = lock(&self.player);
        if let Some(old) = self.ticker.take() {
            old.cancel();
        }
        guard.play();
        let tick = Duration::from_millis(guard.tick_ms().max(1));
        self.frames.send_replace(frame_of(&guard));

        let token = CancellationToken::new();
        self.ticker = Some(token.clone());
        let player = Arc::clone(&self.player);
        let frames = Arc::clone(&self.frames);
        drop(guard);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let frame = {
                            let mut p = lock(&player);
                            if token.is_cancelled() {
                                break;
                            }
                            p.tick();
                            frame_of(&p)
                        };
                        frames.send_replace(frame);
                        if frame.state == PlayerState::Stopped {
                            debug!(virtual_ms = frame.virtual_ms, "Playback reached the end");
                            break;
                        }
                    }
                }
            }
        });
    }

    fn halt(&mut self, f: impl FnOnce(&mut ReplayPlayer)) {
        let mut guard = lock(&self.player);
        if let Some(token) = self.ticker.take() {
            token.cancel();
        }
        f(&mut guard);
        self.frames.send_replace(frame_of(&guard));
    }

    pub fn pause(&mut self) {
        self.halt(|p| p.pause());
    }

    pub fn seek(&mut self, target_ms: i64) {
        self.halt(|p| p.seek(target_ms));
    }

    /// Applies from the next tick without restarting the ticker.
    pub fn set_speed(&mut self, speed: PlaybackSpeed) {
        lock(&self.player).set_speed(speed);
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        if let Some(token) = self.ticker.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrainingSession;
    use chrono::Utc;

    fn player(duration_s: i64) -> ReplayPlayer {
        let mut s = TrainingSession::start("drv", None, Utc::now());
        s.duration_seconds = Some(duration_s);
        ReplayPlayer::new(s)
    }

    // ========================================================================
    // TEST 1: Ten wall-clock ticks advance one second at 1x
    // ========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_driver_ticks_on_interval() {
        let mut driver = PlaybackDriver::new(player(60));
        driver.play();
        tokio::time::sleep(Duration::from_millis(1050)).await;
        let frame = driver.frame();
        assert_eq!(frame.virtual_ms, 1000);
        assert_eq!(frame.state, PlayerState::Playing);
    }

    // ========================================================================
    // TEST 2: Pause stops ticking and keeps the position
    // ========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_driver_pause_freezes() {
        let mut driver = PlaybackDriver::new(player(60));
        driver.play();
        tokio::time::sleep(Duration::from_millis(350)).await;
        driver.pause();
        let at_pause = driver.frame();
        assert_eq!(at_pause.virtual_ms, 300);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(driver.frame(), at_pause);
        assert_eq!(at_pause.state, PlayerState::Stopped);
    }

    // ========================================================================
    // TEST 3: Seek cancels the ticker
    // ========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_driver_seek_cancels() {
        let mut driver = PlaybackDriver::new(player(60));
        driver.play();
        tokio::time::sleep(Duration::from_millis(250)).await;
        driver.seek(30_000);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(driver.frame().virtual_ms, 30_000);
        assert_eq!(driver.frame().state, PlayerState::Stopped);
    }

    // ========================================================================
    // TEST 4: Reaching the end stops and publishes the final frame
    // ========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_driver_auto_stops_at_end() {
        let mut driver = PlaybackDriver::new(player(1));
        let mut rx = driver.subscribe();
        driver.set_speed(PlaybackSpeed::Double);
        driver.play();
        tokio::time::sleep(Duration::from_millis(2000)).await;

        let frame = *rx.borrow_and_update();
        assert_eq!(frame.virtual_ms, 1000);
        assert_eq!(frame.state, PlayerState::Stopped);
    }

    // ========================================================================
    // TEST 5: Restarting play never runs two tickers
    // ========================================================================
    #[tokio::test(start_paused = true)]
    async fn test_driver_double_play_single_ticker() {
        let mut driver = PlaybackDriver::new(player(60));
        driver.play();
        driver.play();
        tokio::time::sleep(Duration::from_millis(550)).await;
        assert_eq!(driver.frame().virtual_ms, 500);
    }
}
