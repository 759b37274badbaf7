//! # Runtime Configuration Module
//!
//! Environment-variable configuration for the coroutine runtime.
//!
//! ## `HOOKR_STACK_SIZE`
//!
//! Stack size for request-handling coroutines, in decimal (`16384`) or hex
//! (`0x4000`). Default: `0x4000` (16 KB).
//!
//! Larger stacks support deeper call chains in handlers; smaller stacks
//! reduce memory for many concurrent requests (total memory = stack size ×
//! concurrent coroutines). Tune to your handler complexity.
//!
//! ```bash
//! export HOOKR_STACK_SIZE=0x8000
//! ```

use std::env;

/// Runtime configuration loaded from environment variables.
///
/// Load at startup with [`RuntimeConfig::from_env()`] and apply via
/// `may::config().set_stack_size(..)` before serving.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes (default: 16 KB / 0x4000)
    pub stack_size: usize,
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let stack_size = match env::var("HOOKR_STACK_SIZE") {
            Ok(val) => {
                if let Some(hex) = val.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).unwrap_or(0x4000)
                } else {
                    val.parse().unwrap_or(0x4000)
                }
            }
            Err(_) => 0x4000,
        };
        RuntimeConfig { stack_size }
    }
}
