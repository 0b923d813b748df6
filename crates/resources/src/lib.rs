#![deny(clippy::pedantic, unsafe_code)]

//! Resource management utilities for nmx
//!
//! This crate provides the counting semaphores that bound concurrent
//! lifecycle builds, symlink creation and package fetches.

pub mod limits;
pub mod manager;
pub mod semaphore;

pub use limits::{IntoResourceLimits, ResourceAvailability, ResourceLimits};
pub use manager::ResourceManager;
pub use semaphore::{acquire_semaphore_permit, create_semaphore, try_acquire_semaphore_permit};
