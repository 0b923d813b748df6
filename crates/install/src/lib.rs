#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Install orchestration for nmx
//!
//! Runs one install end to end: reads what the previous run left behind,
//! prunes what is stale, imports and links packages, hoists, builds and
//! finally records the new state for the next run.

#[macro_use]
mod macros;
mod context;
mod installer;
pub mod link;
pub mod manifest;

pub use context::InstallContext;
pub use installer::{Installer, WANTED_LOCKFILE};
pub use link::DependencyLinker;
pub use manifest::{ModulesManifest, LAYOUT_VERSION, MODULES_MANIFEST};

// Re-export EventSender for use by macros and contexts
pub use nmx_events::EventSender;
