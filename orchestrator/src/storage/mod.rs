//! Settings and output layout

pub mod layout;
pub mod settings;
