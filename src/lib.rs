//! Fleet Saga - compensating-action coordination for worker fleets
//!
//! Keeps a fleet of independently running pipeline workers consistent while
//! their configuration changes. Inside one worker, every configuration edit
//! returns the action that reverses it; across the fleet, a coordinator
//! drives the targeted workers through begin, apply, then commit or roll
//! back, tracks their liveness by heartbeat and excludes the ones that have
//! silently gone away.

pub mod compensation;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod registry;
pub mod storage;
pub mod transfer;
pub mod utils;
pub mod worker;
