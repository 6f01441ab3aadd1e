//! rollout Update Agent
//!
//! Runs once per node and drives that node's own state record through the
//! update lifecycle. The agent:
//!
//! - Registers its record (idle) when the node first comes up
//! - Asks the local update API whether a newer version exists
//! - Requests an admission slot and waits for the coordinator
//! - Stages the update, rides out the reboot, and verifies health
//!
//! The agent never writes a phase outside its rows of the transition table
//! and never touches another node's record.

pub mod config;
pub mod health;
pub mod reconciler;
pub mod updater;
