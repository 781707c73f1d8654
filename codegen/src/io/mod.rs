//! I/O helpers for the session engine.

pub mod apply;
pub mod config;
pub mod http;
pub mod service;
pub mod sink;
pub mod snapshot;
