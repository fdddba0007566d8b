//! Health Reporting and Aggregation
//!
//! Workers report health transitions locally and push heartbeats; the
//! supervisor-side aggregator turns heartbeats into one liveness verdict.

pub mod reporter;
pub mod server;

pub use reporter::{HealthCode, HealthReport, HealthReporter, HeartbeatClient, ReportHealth};
pub use server::{
    router, HealthResponse, HealthServer, HealthState, HealthVerdict, HeartbeatRequest,
    HeartbeatTable,
};
