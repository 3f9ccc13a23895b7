//! Video playback ↔ detection timestamp synchronization.
//!
//! While a video plays, the shell is asked for one display-frame callback at
//! a time. Each callback carries the chain it belongs to; starting, pausing,
//! or stopping playback moves to a new chain (or none), so callbacks already
//! queued by the shell for an older chain are recognized and dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::detection::Detection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(u64);

impl ChainId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing {
        chain: ChainId,
    },
    Paused,
}

/// Start/stop bookkeeping for the per-frame callback chain.
#[derive(Debug, Default)]
pub struct FrameSynchronizer {
    state: PlaybackState,
    last_chain: u64,
    last_time: Option<f64>,
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh chain. Returns it together with the chain it replaces,
    /// which the caller must cancel.
    pub fn play(&mut self) -> (ChainId, Option<ChainId>) {
        let previous = self.current_chain();
        self.last_chain += 1;
        let chain = ChainId(self.last_chain);
        self.state = PlaybackState::Playing { chain };
        debug!(%chain, ?previous, "playback chain started");
        (chain, previous)
    }

    /// Ends the chain but keeps the last playback time for repaints.
    /// Only a running chain can be paused.
    pub fn pause(&mut self) -> Option<ChainId> {
        let previous = self.current_chain();
        if previous.is_some() {
            self.state = PlaybackState::Paused;
        }
        previous
    }

    /// Ends the chain and forgets the playback position.
    pub fn stop(&mut self) -> Option<ChainId> {
        let previous = self.current_chain();
        self.state = PlaybackState::Idle;
        self.last_time = None;
        previous
    }

    pub fn accepts(&self, chain: ChainId) -> bool {
        self.current_chain() == Some(chain)
    }

    pub fn current_chain(&self) -> Option<ChainId> {
        match self.state {
            PlaybackState::Playing { chain } => Some(chain),
            PlaybackState::Idle | PlaybackState::Paused => None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing { .. })
    }

    pub fn record_time(&mut self, playback_time: f64) {
        if playback_time.is_finite() && playback_time >= 0.0 {
            self.last_time = Some(playback_time);
        }
    }

    pub fn last_time(&self) -> Option<f64> {
        self.last_time
    }
}

/// Whether `detection` belongs on the frame shown at `playback_time`.
///
/// Active means `timestamp <= t < timestamp + window`. Detections without a
/// timestamp never are.
pub fn is_active(detection: &Detection, playback_time: f64, window: f64) -> bool {
    detection
        .timestamp
        .is_some_and(|ts| playback_time >= ts && playback_time < ts + window)
}

pub fn active_detections<'a>(
    detections: &'a [Detection],
    playback_time: f64,
    window: f64,
) -> impl Iterator<Item = &'a Detection> + 'a {
    detections
        .iter()
        .filter(move |d| is_active(d, playback_time, window))
}
