// Player data ingest: prediction CSVs, gameweek history and the SQLite store.

pub mod db;
pub mod history;
pub mod import;
pub mod predictions;

use std::collections::BTreeMap;

use fpl_core::player::PlayerId;
use fpl_core::pool::RawPlayerRow;
use serde::{Deserialize, Serialize};

pub use predictions::ProjectionError;

/// Where per-player scores come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    /// Model output CSV with a `predicted_points` column.
    #[default]
    Predictions,
    /// Per-gameweek history CSV, recency weighted.
    History,
    /// Players and history tables in the SQLite database, recency weighted.
    Database,
}

impl ScoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreSource::Predictions => "predictions",
            ScoreSource::History => "history",
            ScoreSource::Database => "database",
        }
    }
}

/// Display fields kept alongside the optimizer rows for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerDetails {
    pub id: PlayerId,
    pub first_name: Option<String>,
    pub second_name: Option<String>,
    pub web_name: String,
    pub club: String,
}

impl PlayerDetails {
    /// "First Second" when both parts are known, otherwise the web name.
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.second_name) {
            (Some(first), Some(second)) if !first.is_empty() && !second.is_empty() => {
                format!("{first} {second}")
            }
            _ => self.web_name.clone(),
        }
    }
}

/// Rows ready for the candidate pool builder, plus their display details.
#[derive(Debug, Clone, Default)]
pub struct LoadedPlayers {
    pub rows: Vec<RawPlayerRow>,
    pub details: BTreeMap<PlayerId, PlayerDetails>,
}

impl LoadedPlayers {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn push(&mut self, row: RawPlayerRow, details: PlayerDetails) {
        self.details.insert(details.id, details);
        self.rows.push(row);
    }
}
