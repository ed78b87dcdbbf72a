//! System utilities
//!
//! This module provides GPU detection, process resource sampling and the
//! memory watchdog.

pub mod gpu;
pub mod resources;
pub mod watchdog;
