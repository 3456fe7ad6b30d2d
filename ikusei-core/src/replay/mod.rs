//! Timeline playback of a recorded training session.
//!
//! [`ReplayPlayer`] is a pure state machine advanced by explicit ticks.
//! [`PlaybackDriver`] feeds it from a tokio interval and [`ReplayViewer`]
//! owns the load lifecycle around it.

pub mod driver;
pub mod viewer;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{KpiSnapshot, OperationLog, TrainingSession};

pub use driver::{PlaybackDriver, PlaybackFrame};
pub use viewer::{LoadState, ReplayViewer};

pub const DEFAULT_TICK_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackSpeed {
    Half,
    #[default]
    Normal,
    OneAndHalf,
    Double,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported playback speed {0:?}; expected 0.5, 1, 1.5 or 2")]
pub struct ParseSpeedError(pub String);

impl PlaybackSpeed {
    pub const ALL: [PlaybackSpeed; 4] = [
        PlaybackSpeed::Half,
        PlaybackSpeed::Normal,
        PlaybackSpeed::OneAndHalf,
        PlaybackSpeed::Double,
    ];

    /// Multiplier in half steps, keeping tick arithmetic in integers.
    fn halves(&self) -> u64 {
        match self {
            PlaybackSpeed::Half => 1,
            PlaybackSpeed::Normal => 2,
            PlaybackSpeed::OneAndHalf => 3,
            PlaybackSpeed::Double => 4,
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.halves() as f64 / 2.0
    }
}

impl fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.as_f64())
    }
}

impl FromStr for PlaybackSpeed {
    type Err = ParseSpeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches(['x', 'X']);
        let value: f64 = trimmed
            .parse()
            .map_err(|_| ParseSpeedError(s.to_string()))?;
        PlaybackSpeed::try_from(value).map_err(|_| ParseSpeedError(s.to_string()))
    }
}

impl TryFrom<f64> for PlaybackSpeed {
    type Error = ParseSpeedError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        PlaybackSpeed::ALL
            .into_iter()
            .find(|s| s.as_f64() == value)
            .ok_or_else(|| ParseSpeedError(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Stopped,
    Playing,
}

/// Render milliseconds as `mm:ss`.
pub fn format_clock(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[derive(Debug, Clone)]
pub struct ReplayPlayer {
    session: TrainingSession,
    state: PlayerState,
    speed: PlaybackSpeed,
    virtual_ms: u64,
    tick_ms: u64,
}

impl ReplayPlayer {
    pub fn new(session: TrainingSession) -> Self {
        Self::with_tick(session, DEFAULT_TICK_MS)
    }

    pub fn with_tick(session: TrainingSession, tick_ms: u64) -> Self {
        Self {
            session,
            state: PlayerState::Stopped,
            speed: PlaybackSpeed::Normal,
            virtual_ms: 0,
            tick_ms,
        }
    }

    pub fn session(&self) -> &TrainingSession {
        &self.session
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.speed
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    pub fn virtual_ms(&self) -> u64 {
        self.virtual_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.session.duration_ms()
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    /// Resumes from the current position; there is no rewind at the end.
    pub fn play(&mut self) {
        self.state = PlayerState::Playing;
    }

    pub fn pause(&mut self) {
        self.state = PlayerState::Stopped;
    }

    /// Jump to `target_ms` clamped into the session and stop.
    pub fn seek(&mut self, target_ms: i64) {
        self.virtual_ms = (target_ms.max(0) as u64).min(self.duration_ms());
        self.state = PlayerState::Stopped;
    }

    pub fn set_speed(&mut self, speed: PlaybackSpeed) {
        self.speed = speed;
    }

    /// Advance one tick while playing. Reaching the end clamps and stops.
    pub fn tick(&mut self) -> PlayerState {
        if self.state != PlayerState::Playing {
            return self.state;
        }
        let step = self.tick_ms.saturating_mul(self.speed.halves()) / 2;
        let advanced = self.virtual_ms.saturating_add(step);
        let duration = self.duration_ms();
        if advanced >= duration {
            self.virtual_ms = duration;
            self.state = PlayerState::Stopped;
        } else {
            self.virtual_ms = advanced;
        }
        self.state
    }

    fn within(&self, ts: chrono::DateTime<chrono::Utc>, t_ms: u64) -> bool {
        self.session.offset_ms(ts) <= i64::try_from(t_ms).unwrap_or(i64::MAX)
    }

    /// Logs at or before `t_ms`, in recorded order.
    pub fn visible_logs_at(&self, t_ms: u64) -> Vec<&OperationLog> {
        self.session
            .operation_logs
            .iter()
            .filter(|l| self.within(l.timestamp, t_ms))
            .collect()
    }

    pub fn visible_logs(&self) -> Vec<&OperationLog> {
        self.visible_logs_at(self.virtual_ms)
    }

    /// Latest snapshot at or before `t_ms`; on equal timestamps the later entry wins.
    pub fn kpi_at(&self, t_ms: u64) -> Option<&KpiSnapshot> {
        self.session
            .kpi_timeline
            .iter()
            .filter(|k| self.within(k.timestamp, t_ms))
            .max_by_key(|k| k.timestamp)
    }

    pub fn current_kpi(&self) -> Option<&KpiSnapshot> {
        self.kpi_at(self.virtual_ms)
    }

    pub fn progress_percent(&self) -> f64 {
        match self.duration_ms() {
            0 => 0.0,
            d => self.virtual_ms as f64 / d as f64 * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    fn log(ms: i64, op: &str) -> OperationLog {
        OperationLog {
            timestamp: t0() + Duration::milliseconds(ms),
            operation_type: op.to_string(),
            operation_value: None,
            error_event: false,
            error_description: None,
            position: None,
            velocity: None,
            equipment_state: None,
        }
    }

    fn snap(ms: i64, overall: f64) -> KpiSnapshot {
        KpiSnapshot {
            timestamp: t0() + Duration::milliseconds(ms),
            safety_score: None,
            error_count: None,
            procedure_compliance_rate: None,
            achievement_rate: None,
            overall_score: Some(overall),
            error_event: false,
            error_description: None,
        }
    }

    fn session(duration_s: i64) -> TrainingSession {
        let mut s = TrainingSession::start("replay-1", Some(1), t0());
        s.duration_seconds = Some(duration_s);
        s.operation_logs = vec![log(0, "start"), log(500, "lever"), log(1500, "brake")];
        s.kpi_timeline = vec![snap(200, 50.0), snap(1200, 70.0), snap(1200, 72.0)];
        s
    }

    #[test]
    fn test_speed_parsing() {
        assert_eq!("1.5".parse::<PlaybackSpeed>(), Ok(PlaybackSpeed::OneAndHalf));
        assert_eq!("2x".parse::<PlaybackSpeed>(), Ok(PlaybackSpeed::Double));
        assert_eq!("0.5".parse::<PlaybackSpeed>(), Ok(PlaybackSpeed::Half));
        assert!("3".parse::<PlaybackSpeed>().is_err());
        assert!("fast".parse::<PlaybackSpeed>().is_err());
        assert_eq!(PlaybackSpeed::OneAndHalf.to_string(), "1.5x");
    }

    #[test]
    fn test_ticks_advance_by_speed_and_clamp() {
        for speed in PlaybackSpeed::ALL {
            let mut p = ReplayPlayer::new(session(2));
            p.set_speed(speed);
            p.play();
            let step = (100.0 * speed.as_f64()) as u64;
            for n in 1..=60u64 {
                let state = p.tick();
                let expected = (n * step).min(2000);
                assert_eq!(p.virtual_ms(), expected, "speed {speed} tick {n}");
                if expected == 2000 {
                    assert_eq!(state, PlayerState::Stopped);
                    break;
                }
                assert_eq!(state, PlayerState::Playing);
            }
            assert_eq!(p.virtual_ms(), 2000);
        }
    }

    #[test]
    fn test_huge_duration_plays_without_overflow() {
        let mut s = session(0);
        s.duration_seconds = Some(100_000_000_000_000_000);
        let mut p = ReplayPlayer::with_tick(s, u64::MAX);
        assert_eq!(p.duration_ms(), u64::MAX);

        p.play();
        assert_eq!(p.tick(), PlayerState::Playing);
        assert_eq!(p.virtual_ms(), u64::MAX / 2);
        assert_eq!(p.visible_logs().len(), 3);

        p.set_speed(PlaybackSpeed::Double);
        assert_eq!(p.tick(), PlayerState::Playing);
        assert_eq!(p.virtual_ms(), u64::MAX - 1);
        assert_eq!(p.tick(), PlayerState::Stopped);
        assert_eq!(p.virtual_ms(), u64::MAX);
        assert_eq!(p.visible_logs().len(), 3);
        assert_eq!(p.current_kpi().and_then(|k| k.overall_score), Some(72.0));
        assert_eq!(p.progress_percent(), 100.0);
    }

    #[test]
    fn test_tick_is_noop_when_stopped() {
        let mut p = ReplayPlayer::new(session(2));
        assert_eq!(p.tick(), PlayerState::Stopped);
        assert_eq!(p.virtual_ms(), 0);
    }

    #[test]
    fn test_pause_retains_position_and_play_resumes() {
        let mut p = ReplayPlayer::new(session(2));
        p.play();
        p.tick();
        p.tick();
        p.pause();
        p.tick();
        assert_eq!(p.virtual_ms(), 200);
        p.play();
        p.tick();
        assert_eq!(p.virtual_ms(), 300);
    }

    #[test]
    fn test_play_after_end_does_not_rewind() {
        let mut p = ReplayPlayer::new(session(1));
        p.seek(5000);
        assert_eq!(p.virtual_ms(), 1000);
        p.play();
        assert_eq!(p.tick(), PlayerState::Stopped);
        assert_eq!(p.virtual_ms(), 1000);
    }

    #[test]
    fn test_seek_clamps_and_stops() {
        let mut p = ReplayPlayer::new(session(2));
        p.play();
        p.seek(-10);
        assert_eq!(p.virtual_ms(), 0);
        assert_eq!(p.state(), PlayerState::Stopped);
        p.seek(1500);
        assert_eq!(p.virtual_ms(), 1500);
        assert_eq!(p.progress_percent(), 75.0);
    }

    #[test]
    fn test_visible_logs_monotonic() {
        let p = ReplayPlayer::new(session(2));
        let mut previous = 0;
        for t in (0..=2000).step_by(100) {
            let n = p.visible_logs_at(t).len();
            assert!(n >= previous);
            previous = n;
        }
        assert_eq!(p.visible_logs_at(0).len(), 1);
        assert_eq!(p.visible_logs_at(500).len(), 2);
        let ops: Vec<&str> = p
            .visible_logs_at(2000)
            .iter()
            .map(|l| l.operation_type.as_str())
            .collect();
        assert_eq!(ops, vec!["start", "lever", "brake"]);
    }

    #[test]
    fn test_current_kpi_most_recent_wins() {
        let p = ReplayPlayer::new(session(2));
        assert!(p.kpi_at(100).is_none());
        assert_eq!(p.kpi_at(1000).and_then(|k| k.overall_score), Some(50.0));
        // equal timestamps resolve to the later entry
        assert_eq!(p.kpi_at(1300).and_then(|k| k.overall_score), Some(72.0));
    }

    #[test]
    fn test_zero_duration() {
        let mut p = ReplayPlayer::new(session(0));
        assert_eq!(p.progress_percent(), 0.0);
        p.play();
        assert_eq!(p.tick(), PlayerState::Stopped);
        assert_eq!(p.virtual_ms(), 0);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(65_400), "01:05");
        assert_eq!(format_clock(3_600_000), "60:00");
    }
}
