//! # AI Backend Integration
//!
//! Everything specific to the realtime voice API: the wire message types
//! and the per-call WebSocket connection task.

pub mod client;
pub mod messages;

pub use client::{AiHandle, AiLegEvent};
