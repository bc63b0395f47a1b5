pub mod config;
pub mod cp;
