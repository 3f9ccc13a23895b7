use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::geometry::DisplayGeometry;
use crate::overlay::DisplayList;

/// The overlay surface stacked on top of the media element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CanvasOperation {
    /// Report the media element's current rendered size.
    Measure,
    /// Replace the surface contents with the recorded commands.
    Present(DisplayList),
}

impl Operation for CanvasOperation {
    type Output = DisplayGeometry;
}

pub struct Canvas<Ev> {
    context: CapabilityContext<CanvasOperation, Ev>,
}

impl<Ev> Capability<Ev> for Canvas<Ev> {
    type Operation = CanvasOperation;
    type MappedSelf<MappedEv> = Canvas<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Canvas::new(self.context.map_event(f))
    }
}

impl<Ev> Canvas<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<CanvasOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn measure<F>(&self, callback: F)
    where
        F: FnOnce(DisplayGeometry) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let geometry = ctx.request_from_shell(CanvasOperation::Measure).await;
            ctx.update_app(callback(geometry));
        });
    }

    pub fn present(&self, list: DisplayList) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(CanvasOperation::Present(list)).await;
        });
    }
}
