//! DDoS mitigation service.
//!
//! A streaming detection and mitigation engine with an HTTP adapter,
//! background monitoring and report storage.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;
