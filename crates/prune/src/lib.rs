#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Pruning for nmx
//!
//! Compares what is installed with what is about to be installed and
//! removes the difference: importer links that changed, orphaned virtual
//! store entries with their hoisted links and commands, and store entries
//! left behind by earlier interrupted runs.

mod pruner;

pub use pruner::{find_orphans, PruneOptions, PruneResult, Pruner};
