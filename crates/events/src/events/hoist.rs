use nmx_types::HoistKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Events emitted while hoisting aliases into shared modules directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HoistEvent {
    /// An alias was linked into a hoist directory
    AliasHoisted {
        alias: String,
        kind: HoistKind,
        target: PathBuf,
    },

    /// An existing entry prevented placement
    PlacementSkipped { alias: String, path: PathBuf },

    /// An executable was linked into a `.bin` directory
    BinLinked { command: String, target: PathBuf },

    /// Hoisting finished
    Completed { public: usize, private: usize },
}
