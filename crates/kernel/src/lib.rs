//! Navscope Kernel Library
//!
//! Permission-scoped navigation menus with a two-tier result cache and
//! event-driven invalidation. The `navscope` binary is a thin CLI over it.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod invalidator;
pub mod metrics;
pub mod models;
pub mod navigation;
pub mod state;

pub use error::{NavError, NavResult};
