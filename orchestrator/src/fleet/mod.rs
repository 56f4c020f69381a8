//! Fleet-wide coordination and reporting

pub mod aggregator;
pub mod orchestrator;
