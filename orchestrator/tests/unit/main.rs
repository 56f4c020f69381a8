//! Integration tests

mod common;
mod test_fleet;
mod test_fsm;
mod test_provisioner;
mod test_readiness;
