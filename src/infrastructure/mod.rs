//! Infrastructure layer: configuration, logging, persistence, HTTP.

pub mod config;
pub mod database;
pub mod http;
pub mod logging;
