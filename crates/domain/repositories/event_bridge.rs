use mockall::automock;

use crate::domain::value_objects::engine_events::EngineEvent;

/// One-way sink for engine lifecycle events. Implementations must never block the caller.
#[automock]
pub trait EventBridge {
    fn emit(&self, event: EngineEvent);
}
