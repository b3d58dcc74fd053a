//! fleetrun - Fleet-wide remote script execution and artifact retrieval over SSH

pub mod cli;
pub mod error;
pub mod executor;
pub mod fleet;
pub mod logging;
pub mod models;
pub mod observer;
pub mod parser;
pub mod session;
pub mod templates;
