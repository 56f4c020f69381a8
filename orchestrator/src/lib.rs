//! fleetdeploy library
//!
//! Provisions, readies and deploys a fleet of Compute Engine instances.

pub mod app;
pub mod authn;
pub mod cloud;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod fleet;
pub mod logs;
pub mod models;
pub mod remote;
pub mod storage;
pub mod utils;
