//! Core module containing the execution engine
//!
//! This module provides:
//! - Transport layer (SSH executor, serial console)
//! - Serial console session with wake/login state machine
//! - Prompt and completion-marker matching
//! - Serial device discovery and holder cleanup
//! - Batch execution with per-command and overall deadlines
//! - Transport orchestration with SSH→serial fallback

pub mod batch;
pub mod deadline;
pub mod discovery;
pub mod error;
pub mod holders;
pub mod marker;
pub mod matcher;
pub mod orchestrator;
pub mod result;
pub mod session;
pub mod state_machine;
pub mod stream;
pub mod transcript;
pub mod transport;
