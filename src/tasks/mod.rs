//! Background Tasks Module
//!
//! Contains background tasks that run periodically against a cache.
//!
//! # Tasks
//! - Maintenance: Keeps the cache within its byte budget at configured intervals

mod maintenance;

pub use maintenance::{spawn_configured_maintenance, spawn_maintenance_task};
