//! Activity orchestration, button mappings and the hub facade.
//!
//! ```text
//! Hub
//!  ├── ActivityOrchestrator ──┐
//!  ├── ButtonMappingExecutor ─┼──> Dispatcher ──> ConnectionManager ──> ProtocolAdapter
//!  └── LivenessMonitor        │
//!                             └──> HubStore, EventBus
//! ```

pub mod buttons;
pub mod error;
pub mod hub;
pub mod orchestrator;

pub use buttons::{ButtonMappingExecutor, MappingExecution};
pub use error::{AutomationError, HubError};
pub use hub::{Hub, HubBuilder};
pub use orchestrator::{ActivityOrchestrator, ActivityRunReport, RunOutcome, StepReport};
