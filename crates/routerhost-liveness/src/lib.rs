//! routerhost-liveness — hosting device reachability and dead-device detection.
//!
//! # Architecture
//!
//! ```text
//! LivenessMonitor (periodic task)
//!   └── LivenessTracker
//!         ├── ReachabilityProbe (ping or TCP connect)
//!         └── backlog: device → first-flagged time + waiting routers
//! ```
//!
//! Devices enter the backlog when found unreachable while their routers
//! are handed to agents. The monitor re-probes them after booting and
//! reports each as reachable again or dead once the dead timeout has
//! elapsed since it was first flagged.

pub mod monitor;
pub mod probe;
pub mod tracker;

pub use monitor::{BoxFuture, LivenessCallback, LivenessMonitor};
pub use probe::{
    DEFAULT_TCP_PORT, LivenessError, PingProbe, ReachabilityProbe, TcpProbe, probe_from_config,
};
pub use tracker::{LivenessReport, LivenessTracker, TrackedDevice};
