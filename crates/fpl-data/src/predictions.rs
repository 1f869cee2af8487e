// Prediction CSV loading.
//
// Model exports name their columns inconsistently (FPL API names, pandas
// defaults, hand-written headers). The raw struct accepts the common aliases
// and the conversion below decides how cost and name are read.

use std::io::Read;
use std::path::Path;

use fpl_core::player::PlayerId;
use fpl_core::pool::{RawCost, RawPlayerRow, RawPosition};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{LoadedPlayers, PlayerDetails};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Raw CSV row
// ---------------------------------------------------------------------------

/// One prediction row. Unknown columns are ignored by the CSV deserializer.
#[derive(Debug, Deserialize)]
struct RawPrediction {
    #[serde(default, alias = "element", alias = "player_id")]
    id: Option<PlayerId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    web_name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    second_name: Option<String>,
    #[serde(alias = "element_type", alias = "pos", alias = "elementType")]
    position: String,
    #[serde(default, alias = "team_name", alias = "team_id")]
    team: Option<String>,
    /// Price in tenths, as the FPL API reports it.
    #[serde(default, alias = "value")]
    now_cost: Option<f64>,
    /// Price in whole units.
    #[serde(default)]
    cost: Option<f64>,
    #[serde(alias = "predicted", alias = "xp")]
    predicted_points: f64,
}

impl RawPrediction {
    /// Full name used for lock matching and dedup: "first second" when both
    /// parts are present, then `name`, then `web_name`.
    fn full_name(&self) -> Option<String> {
        if let (Some(first), Some(second)) = (trimmed(&self.first_name), trimmed(&self.second_name)) {
            return Some(format!("{first} {second}"));
        }
        trimmed(&self.name)
            .or_else(|| trimmed(&self.web_name))
            .or_else(|| trimmed(&self.second_name))
            .or_else(|| trimmed(&self.first_name))
    }

    /// Short name for display only.
    fn short_name(&self) -> Option<String> {
        trimmed(&self.web_name).or_else(|| trimmed(&self.name))
    }

    fn raw_cost(&self) -> Option<RawCost> {
        match (self.now_cost, self.cost) {
            (Some(tenths), _) if tenths.is_finite() => Some(RawCost::Tenths(tenths.round() as i64)),
            (_, Some(units)) => Some(RawCost::Units(units)),
            _ => None,
        }
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

/// Read prediction rows from any reader. Rows that fail to deserialize or
/// have no name or price are skipped with a warning.
///
/// Rows without an id are numbered upward from one past the largest explicit
/// id, in file order, so they never collide with real ids.
pub fn load_predictions_from_reader<R: Read>(rdr: R) -> Result<LoadedPlayers, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut accepted = Vec::new();

    for (line, result) in reader.deserialize::<RawPrediction>().enumerate() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed prediction row {}: {}", line + 1, e);
                continue;
            }
        };
        let Some(name) = raw.full_name() else {
            warn!("skipping prediction row {}: no player name", line + 1);
            continue;
        };
        let Some(cost) = raw.raw_cost() else {
            warn!("skipping '{}': no now_cost/value/cost column", name);
            continue;
        };
        accepted.push((raw, name, cost));
    }

    let mut next_id = accepted
        .iter()
        .filter_map(|(raw, _, _)| raw.id)
        .max()
        .map_or(0, |max| max + 1);

    let mut loaded = LoadedPlayers::default();
    for (raw, name, cost) in accepted {
        let id = raw.id.unwrap_or_else(|| {
            let id = next_id;
            next_id += 1;
            id
        });
        let club = trimmed(&raw.team).unwrap_or_default();
        let details = PlayerDetails {
            id,
            first_name: trimmed(&raw.first_name),
            second_name: trimmed(&raw.second_name),
            web_name: raw.short_name().unwrap_or_else(|| name.clone()),
            club: club.clone(),
        };
        let row = RawPlayerRow {
            player_id: Some(id),
            name,
            position: RawPosition::Label(raw.position),
            club,
            cost,
            score: raw.predicted_points,
        };
        loaded.push(row, details);
    }

    Ok(loaded)
}

/// Load predictions from a CSV file.
pub fn load_predictions(path: &Path) -> Result<LoadedPlayers, ProjectionError> {
    let file = std::fs::File::open(path).map_err(|e| ProjectionError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let loaded = load_predictions_from_reader(file).map_err(|e| ProjectionError::Csv {
        path: path.display().to_string(),
        source: e,
    })?;
    if loaded.is_empty() {
        return Err(ProjectionError::Validation(format!(
            "{} produced zero valid prediction rows",
            path.display()
        )));
    }
    info!("loaded {} predictions from {}", loaded.len(), path.display());
    Ok(loaded)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
