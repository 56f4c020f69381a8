//! Data models

pub mod instance;
pub mod manifest;
pub mod spec;
