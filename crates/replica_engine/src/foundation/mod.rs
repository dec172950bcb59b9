//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used by the replication layer:
//! - Math types for node transforms
//! - Slot-map keys for scene nodes
//! - Logging setup

pub mod math;
pub mod collections;
pub mod logging;
