use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::geometry::DisplayGeometry;
use crate::sync::ChainId;

/// Playback position and element size sampled on the next display frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    /// Seconds from the start of the video.
    pub playback_time: f64,
    pub geometry: DisplayGeometry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramesOperation {
    /// Resolve on the next display frame (`requestAnimationFrame`).
    Request { chain: ChainId },
    /// Drop any pending callback for the chain.
    Cancel { chain: ChainId },
}

impl Operation for FramesOperation {
    type Output = FrameSample;
}

pub struct Frames<Ev> {
    context: CapabilityContext<FramesOperation, Ev>,
}

impl<Ev> Capability<Ev> for Frames<Ev> {
    type Operation = FramesOperation;
    type MappedSelf<MappedEv> = Frames<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Frames::new(self.context.map_event(f))
    }
}

impl<Ev> Frames<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<FramesOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn next_frame<F>(&self, chain: ChainId, callback: F)
    where
        F: FnOnce(FrameSample) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let sample = ctx
                .request_from_shell(FramesOperation::Request { chain })
                .await;
            ctx.update_app(callback(sample));
        });
    }

    pub fn cancel(&self, chain: ChainId) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(FramesOperation::Cancel { chain }).await;
        });
    }
}
