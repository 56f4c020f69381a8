//! Per-instance pipeline: create, wait for readiness, deploy

pub mod docker;
pub mod fsm;
pub mod health;
pub mod provisioner;
pub mod readiness;
pub mod startup;
pub mod workload;
