use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::GeoPoint;

pub const DEFAULT_FIX_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub maximum_age_ms: u64,
    pub timeout_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            maximum_age_ms: 0,
            timeout_ms: DEFAULT_FIX_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationOperation {
    /// Resolve with the next fix of the shell's position watch, starting the
    /// watch if it is not running. The core re-arms after every fix.
    Watch(WatchOptions),
    ClearWatch,
}

impl Operation for LocationOperation {
    type Output = LocationResult;
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("no position fix within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("invalid coordinates: {reason}")]
    InvalidCoordinates { reason: String },
}

impl LocationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LocationError::Unavailable { .. } | LocationError::Timeout { .. }
        )
    }
}

pub type LocationResult = Result<GeoPoint, LocationError>;

pub struct Location<Ev> {
    context: CapabilityContext<LocationOperation, Ev>,
}

impl<Ev> Capability<Ev> for Location<Ev> {
    type Operation = LocationOperation;
    type MappedSelf<MappedEv> = Location<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Location::new(self.context.map_event(f))
    }
}

impl<Ev> Location<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<LocationOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn watch<F>(&self, options: WatchOptions, callback: F)
    where
        F: FnOnce(LocationResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx
                .request_from_shell(LocationOperation::Watch(options))
                .await;
            ctx.update_app(callback(result));
        });
    }

    pub fn clear_watch(&self) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(LocationOperation::ClearWatch).await;
        });
    }
}
