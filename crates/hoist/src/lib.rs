#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Hoisting for nmx
//!
//! Makes transitive dependencies visible at shared levels of the module
//! tree: the public level is the root project's `node_modules`, the private
//! level is the virtual store's own `node_modules` that Node.js resolution
//! falls back to from inside any package.

pub mod bins;
mod hoister;
mod matcher;
mod placement;

pub use bins::{hoisted_bin_sources, BinLinker, BinSource, BIN_DIR};
pub use hoister::{hoist_graph, HoistResult, HoistedAliasAssignment, HoistedBin};
pub use matcher::{HoistMatchers, PatternMatcher};
pub use placement::{hoist_dir, HoistLinker, PlacementReport};
