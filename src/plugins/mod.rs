//! Plugin discovery and the observer contract.
//!
//! Manifests on disk are turned into plugins by [`discovery`]; everything the
//! runner does is reported through the callbacks in [`events`].

pub mod discovery;
pub mod events;

// Re-export main types
pub use discovery::{Discovery, DiscoveryIssue, PluginDiscovery, PluginSummary};
pub use events::{
    BatchReport, FailureKind, FailureRecord, FanOut, LogLevel, NullObserver, Observer,
    PluginState, TracingObserver,
};
