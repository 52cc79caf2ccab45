//! Device side of remotehub.
//!
//! - [`adapter`]: the protocol adapter contract and registry
//! - [`mapping`]: neutral command to native action tables
//! - [`connection`]: single-flight session cache per address
//! - [`dispatcher`]: routes one command to one adapter
//! - [`liveness`] and [`probe`]: background reachability polling

pub mod adapter;
pub mod connection;
pub mod dispatcher;
pub mod liveness;
pub mod mapping;
pub mod probe;

pub use adapter::{
    AdapterError, AdapterRegistry, AdapterResult, AdapterSession, MockAdapter, ProtocolAdapter,
    RegistryError, SentAction,
};
pub use connection::{ConnectionError, ConnectionHandle, ConnectionManager, ConnectionState};
pub use dispatcher::{CommandSelector, DispatchError, DispatchReport, Dispatcher};
pub use liveness::{LivenessEntry, LivenessHandle, LivenessMonitor, LivenessPoller, LivenessSnapshot, TickSummary};
pub use mapping::{CommandMapper, CommandParams, DeviceFamily, FamilyTable, MappingError, NativeAction, PayloadPolicy};
pub use probe::{ReachabilityProbe, TcpProbe};
