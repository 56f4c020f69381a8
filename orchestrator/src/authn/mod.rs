//! Credential resolution and storage

pub mod broker;
pub mod credential;
pub mod secret_store;
