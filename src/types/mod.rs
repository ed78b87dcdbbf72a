//! Shared type definitions
//!
//! This module contains all shared data types used across both services.

pub mod chat;
pub mod config;
pub mod message;
