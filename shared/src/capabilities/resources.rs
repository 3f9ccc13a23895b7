use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::{ResourceHandles, ResourceUri};

pub const RESOURCE_SCHEME: &str = "media";

/// Object-URL style references the shell binds to the bytes of the selected
/// file. The core names the reference; the shell creates and revokes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceOperation {
    Create { uri: ResourceUri, mime_type: String },
    Release { uri: ResourceUri },
}

impl Operation for ResourceOperation {
    type Output = ();
}

pub struct Resources<Ev> {
    context: CapabilityContext<ResourceOperation, Ev>,
}

impl<Ev> Capability<Ev> for Resources<Ev> {
    type Operation = ResourceOperation;
    type MappedSelf<MappedEv> = Resources<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Resources::new(self.context.map_event(f))
    }
}

impl<Ev> Resources<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<ResourceOperation, Ev>) -> Self {
        Self { context }
    }

    fn notify(&self, operation: ResourceOperation) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(operation).await;
        });
    }
}

impl<Ev> ResourceHandles for Resources<Ev>
where
    Ev: 'static,
{
    fn create(&self, mime_type: &str) -> ResourceUri {
        let uri = ResourceUri::new(format!("{RESOURCE_SCHEME}://{}", Uuid::new_v4()));
        self.notify(ResourceOperation::Create {
            uri: uri.clone(),
            mime_type: mime_type.to_string(),
        });
        uri
    }

    fn release(&self, uri: &ResourceUri) {
        self.notify(ResourceOperation::Release { uri: uri.clone() });
    }
}
