//! Multi-bucket, priority-aware traffic control for the marketplace API.

pub mod bucket;
pub mod controller;
pub mod queue;

pub use bucket::TokenBucket;
pub use controller::{
    ApiResponse, BucketClass, DispatchLog, DispatchOutcome, LogSink, OutboundRequest,
    ReqwestTransport, RouteTable, TrafficController, Transport,
};
pub use queue::{Priority, PriorityQueue};
