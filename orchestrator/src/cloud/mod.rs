//! Cloud control plane

pub mod compute;
pub mod firewall;
pub mod gcloud;
pub mod provider;
