pub mod checks;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod poll;
pub mod report;
pub mod resources;
