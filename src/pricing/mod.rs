//! Dynamic pricing pipeline: competitor filtering, floor derivation, target
//! selection, per-listing orchestration and the probe protocol.

pub mod floor;
pub mod orchestrator;
pub mod outliers;
pub mod probe;
pub mod target;

pub use floor::{compute_floor, FloorInputs};
pub use orchestrator::{dispatch_priority, RepriceSummary, RepricingOrchestrator};
pub use outliers::OutlierFilter;
pub use probe::{ProbeProtocol, ProbeReport};
pub use target::{select_target, PricingStrategy, TargetQuote};
