//! # Runtime
//!
//! Process lifecycle of the envoy manager: startup, the watch loop and
//! shutdown handling.

pub mod error_policy;
pub mod initialization;
pub mod shutdown;
pub mod watch_loop;
