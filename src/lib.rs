pub mod config;
pub mod discord;
pub mod identity;
pub mod telemetry;
