use crate::models::TrainingSession;
use crate::sequence::{RequestSequencer, Ticket};

use super::ReplayPlayer;

#[derive(Debug, Clone)]
pub enum LoadState {
    Loading,
    Ready(ReplayPlayer),
    Failed(String),
}

/// Owns the fetch lifecycle of a replay. Only the most recently started load
/// may change the state.
#[derive(Debug)]
pub struct ReplayViewer {
    sequencer: RequestSequencer,
    state: LoadState,
    tick_ms: u64,
}

impl Default for ReplayViewer {
    fn default() -> Self {
        Self::new(super::DEFAULT_TICK_MS)
    }
}

impl ReplayViewer {
    pub fn new(tick_ms: u64) -> Self {
        Self {
            sequencer: RequestSequencer::new(),
            state: LoadState::Loading,
            tick_ms,
        }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Start a load; any earlier outstanding load is superseded.
    pub fn begin_load(&mut self) -> Ticket {
        self.state = LoadState::Loading;
        self.sequencer.issue()
    }

    /// Apply a load result. Returns false when `ticket` was superseded.
    pub fn complete_load(
        &mut self,
        ticket: Ticket,
        result: Result<TrainingSession, String>,
    ) -> bool {
        if !self.sequencer.is_current(ticket) {
            return false;
        }
        self.state = match result {
            Ok(session) => LoadState::Ready(ReplayPlayer::with_tick(session, self.tick_ms)),
            Err(message) => LoadState::Failed(message),
        };
        true
    }

    /// Playback controls, available only once a session is loaded.
    pub fn controls(&mut self) -> Option<&mut ReplayPlayer> {
        match &mut self.state {
            LoadState::Ready(player) => Some(player),
            _ => None,
        }
    }

    /// Take the loaded player out of the viewer.
    pub fn into_player(self) -> Option<ReplayPlayer> {
        match self.state {
            LoadState::Ready(player) => Some(player),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            LoadState::Failed(msg) => Some(msg),
            _ => None,
        }
    }
}
