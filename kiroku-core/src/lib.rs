//! # Kiroku Core
//!
//! Fundamental building blocks shared by the Kiroku event buffer:
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  kiroku-core                    │
//! ├─────────────────────────────────────────────────┤
//! │  • error      - Error handling                  │
//! │  • config     - Buffer tuning knobs             │
//! │  • metrics    - Engine counters                 │
//! │  • time       - Event timestamps                │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod time;

// Re-export commonly used types
pub use config::BufferConfig;
pub use error::{Error, Result};
pub use time::{EventTime, Timestamp};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
