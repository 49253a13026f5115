//! Shared types for the Hooktrap webhook capture server.

mod api;
mod event;

pub use api::*;
pub use event::*;
