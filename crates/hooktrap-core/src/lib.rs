//! Core webhook capture, fan-out, and tunnel lifecycle for Hooktrap.

mod capture;
mod controller;
mod error;
mod registry;
mod scanner;
mod tunnel;

pub use capture::capture_router;
pub use controller::{ControllerConfig, WebhookController};
pub use error::HooktrapError;
pub use registry::SubscriberRegistry;
pub use scanner::{scan_line, ScanOutcome};
pub use tunnel::{SshLauncher, TunnelChild, TunnelConfig, TunnelLauncher, TunnelManager, TunnelProc};

/// Result type for Hooktrap operations.
pub type Result<T> = std::result::Result<T, HooktrapError>;
