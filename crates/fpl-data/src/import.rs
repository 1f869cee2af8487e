// Bulk import of FPL exports (players, teams, gameweek history) into SQLite.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use fpl_core::player::{PlayerId, Position};
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::{Database, PlayerRecord, TeamRecord};
use crate::history::load_history;

#[derive(Debug, Deserialize)]
struct RawPlayer {
    #[serde(alias = "element", alias = "player_id")]
    id: PlayerId,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    second_name: String,
    #[serde(default, alias = "name")]
    web_name: String,
    #[serde(alias = "team_id")]
    team: i64,
    #[serde(alias = "element_type", alias = "pos")]
    position: String,
    #[serde(alias = "value")]
    now_cost: f64,
}

#[derive(Debug, Deserialize)]
struct RawTeam {
    id: i64,
    name: String,
    #[serde(default)]
    short_name: String,
}

/// Counts from one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub teams: usize,
    pub players: usize,
    pub history_rows: usize,
    pub history_dropped: usize,
}

/// Parse a players export. Positions may be codes or labels; they are stored
/// as codes. Rows with an unknown position or non-finite price are skipped.
pub fn load_players_from_reader<R: Read>(rdr: R) -> Result<Vec<PlayerRecord>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut players = Vec::new();
    for result in reader.deserialize::<RawPlayer>() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed player row: {}", e);
                continue;
            }
        };
        let Some(position) = Position::parse(&raw.position) else {
            warn!("skipping player {}: unknown position '{}'", raw.id, raw.position);
            continue;
        };
        if !raw.now_cost.is_finite() || raw.now_cost < 0.0 {
            warn!("skipping player {}: invalid now_cost", raw.id);
            continue;
        }
        let web_name = if raw.web_name.trim().is_empty() {
            raw.second_name.trim().to_string()
        } else {
            raw.web_name.trim().to_string()
        };
        players.push(PlayerRecord {
            id: raw.id,
            first_name: raw.first_name.trim().to_string(),
            second_name: raw.second_name.trim().to_string(),
            web_name,
            team_id: raw.team,
            position: position.code() as i64,
            now_cost: raw.now_cost.round() as i64,
        });
    }
    Ok(players)
}

/// Parse a teams export.
pub fn load_teams_from_reader<R: Read>(rdr: R) -> Result<Vec<TeamRecord>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut teams = Vec::new();
    for result in reader.deserialize::<RawTeam>() {
        match result {
            Ok(raw) => {
                let short_name = if raw.short_name.trim().is_empty() {
                    raw.name.chars().take(3).collect::<String>().to_uppercase()
                } else {
                    raw.short_name.trim().to_string()
                };
                teams.push(TeamRecord {
                    id: raw.id,
                    name: raw.name.trim().to_string(),
                    short_name,
                });
            }
            Err(e) => warn!("skipping malformed team row: {}", e),
        }
    }
    Ok(teams)
}

fn open_csv(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))
}

/// Load the given exports into `db`: teams first, then players, then
/// history. History rows for players not in the database are dropped.
pub fn import_files(
    db: &Database,
    players_csv: &Path,
    teams_csv: Option<&Path>,
    history_csv: Option<&Path>,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    if let Some(path) = teams_csv {
        let teams = load_teams_from_reader(open_csv(path)?)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        db.upsert_teams(&teams)?;
        summary.teams = teams.len();
    }

    let players = load_players_from_reader(open_csv(players_csv)?)
        .with_context(|| format!("failed to parse {}", players_csv.display()))?;
    db.upsert_players(&players)?;
    summary.players = players.len();

    if let Some(path) = history_csv {
        let records = load_history(path)?;
        let result = db.insert_history(&records)?;
        summary.history_rows = result.inserted;
        summary.history_dropped = result.dropped_unknown_player;
    }

    info!(
        "import complete: {} teams, {} players, {} history rows ({} dropped)",
        summary.teams, summary.players, summary.history_rows, summary.history_dropped
    );
    Ok(summary)
}
