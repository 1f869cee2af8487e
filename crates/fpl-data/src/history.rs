// Gameweek history CSV and recency-weighted form.
//
// The history export has one row per player per fixture. A player's score is
// the weighted sum of their most recent gameweeks, newest first, with
// weights 1.0, 0.9, 0.8, ... Gameweeks the player has no row for count as 0.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use fpl_core::player::PlayerId;
use fpl_core::pool::{RawCost, RawPlayerRow, RawPosition};
use serde::Deserialize;
use tracing::{info, warn};

use crate::predictions::ProjectionError;
use crate::{LoadedPlayers, PlayerDetails};

/// Default number of gameweeks that contribute to form.
pub const DEFAULT_WINDOW: usize = 4;

/// Largest window with a positive weight for every gameweek.
pub const MAX_WINDOW: usize = 10;

// ---------------------------------------------------------------------------
// Weighting
// ---------------------------------------------------------------------------

/// Linear-decay weights, most recent gameweek first: 1.0, 0.9, 0.8, ...
pub fn recency_weights(window: usize) -> Vec<f64> {
    (0..window.min(MAX_WINDOW))
        .map(|i| (10 - i) as f64 / 10.0)
        .collect()
}

/// Weighted sum of per-gameweek scores ordered newest first. Scores beyond
/// the window are ignored; a short list is padded with zeros.
pub fn weighted_form(recent: &[f64], window: usize) -> f64 {
    recency_weights(window)
        .iter()
        .zip(recent)
        .map(|(w, s)| w * s)
        .sum()
}

// ---------------------------------------------------------------------------
// Raw CSV row
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawGameweek {
    #[serde(alias = "player_id", alias = "id")]
    element: PlayerId,
    #[serde(default)]
    name: String,
    #[serde(default)]
    position: String,
    #[serde(default, alias = "team_id")]
    team: String,
    /// Price in tenths at the time of the fixture.
    #[serde(default, alias = "player_value")]
    value: Option<f64>,
    #[serde(rename = "GW", alias = "gw", alias = "gameweek", alias = "round")]
    gameweek: u32,
    #[serde(default)]
    total_points: Option<f64>,
    #[serde(default, rename = "xP", alias = "xp", alias = "expected_points")]
    expected_points: Option<f64>,
    #[serde(default)]
    minutes: Option<f64>,
}

/// One player-fixture row from the history export.
#[derive(Debug, Clone, PartialEq)]
pub struct GameweekRecord {
    pub player_id: PlayerId,
    pub name: String,
    pub position: String,
    pub club: String,
    pub cost_tenths: Option<i64>,
    pub gameweek: u32,
    pub total_points: Option<f64>,
    pub expected_points: Option<f64>,
    pub minutes: Option<u32>,
}

impl GameweekRecord {
    /// Expected points when present, otherwise actual points, otherwise 0.
    pub fn points(&self) -> f64 {
        self.expected_points
            .filter(|p| p.is_finite())
            .or(self.total_points.filter(|p| p.is_finite()))
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

/// Read history rows from any reader, skipping malformed rows with a warning.
pub fn load_history_from_reader<R: Read>(rdr: R) -> Result<Vec<GameweekRecord>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut records = Vec::new();
    for (line, result) in reader.deserialize::<RawGameweek>().enumerate() {
        match result {
            Ok(raw) => records.push(GameweekRecord {
                player_id: raw.element,
                name: raw.name.trim().to_string(),
                position: raw.position.trim().to_string(),
                club: raw.team.trim().to_string(),
                cost_tenths: raw.value.filter(|v| v.is_finite()).map(|v| v.round() as i64),
                gameweek: raw.gameweek,
                total_points: raw.total_points,
                expected_points: raw.expected_points,
                minutes: raw.minutes.filter(|m| m.is_finite() && *m >= 0.0).map(|m| m as u32),
            }),
            Err(e) => warn!("skipping malformed history row {}: {}", line + 1, e),
        }
    }
    Ok(records)
}

/// Load the history CSV from a file.
pub fn load_history(path: &Path) -> Result<Vec<GameweekRecord>, ProjectionError> {
    let file = std::fs::File::open(path).map_err(|e| ProjectionError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let records = load_history_from_reader(file).map_err(|e| ProjectionError::Csv {
        path: path.display().to_string(),
        source: e,
    })?;
    if records.is_empty() {
        return Err(ProjectionError::Validation(format!(
            "{} produced zero valid history rows",
            path.display()
        )));
    }
    info!("loaded {} history rows from {}", records.len(), path.display());
    Ok(records)
}

// ---------------------------------------------------------------------------
// Form
// ---------------------------------------------------------------------------

/// Per-gameweek scores for one player, newest first. Fixtures in the same
/// gameweek are summed.
fn recent_scores(records: &[&GameweekRecord], window: usize) -> Vec<f64> {
    let mut by_gameweek: BTreeMap<u32, f64> = BTreeMap::new();
    for r in records {
        *by_gameweek.entry(r.gameweek).or_insert(0.0) += r.points();
    }
    by_gameweek.values().rev().take(window).copied().collect()
}

/// Collapse history into one optimizer row per player, scored by
/// recency-weighted form. Identity, position, club and price come from the
/// player's latest row.
pub fn form_from_history(records: &[GameweekRecord], window: usize) -> LoadedPlayers {
    let mut by_player: BTreeMap<PlayerId, Vec<&GameweekRecord>> = BTreeMap::new();
    for r in records {
        by_player.entry(r.player_id).or_default().push(r);
    }

    let mut loaded = LoadedPlayers::default();
    for (id, rows) in by_player {
        let Some(latest) = rows.iter().max_by_key(|r| r.gameweek) else {
            continue;
        };
        let Some(cost) = rows
            .iter()
            .filter(|r| r.cost_tenths.is_some())
            .max_by_key(|r| r.gameweek)
            .and_then(|r| r.cost_tenths)
        else {
            warn!("skipping player {} ('{}'): no price in history", id, latest.name);
            continue;
        };

        let score = weighted_form(&recent_scores(&rows, window), window);
        let details = PlayerDetails {
            id,
            first_name: None,
            second_name: None,
            web_name: latest.name.clone(),
            club: latest.club.clone(),
        };
        let row = RawPlayerRow {
            player_id: Some(id),
            name: latest.name.clone(),
            position: RawPosition::Label(latest.position.clone()),
            club: latest.club.clone(),
            cost: RawCost::Tenths(cost),
            score,
        };
        loaded.push(row, details);
    }

    info!(
        "computed {}-gameweek form for {} players",
        window,
        loaded.len()
    );
    loaded
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const HISTORY: &str = "\
name,position,team,xP,element,GW,total_points,value,minutes
Salah,MID,Liverpool,6.0,1,1,8,130,90
Salah,MID,Liverpool,,1,2,2,130,90
Salah,MID,Liverpool,5.0,1,3,12,131,90
Salah,MID,Liverpool,4.0,1,4,3,131,90
Salah,MID,Liverpool,7.0,1,5,10,132,90
Raya,GK,Arsenal,3.0,2,5,6,55,90
";

    #[test]
    fn weights_decay_linearly() {
        assert_eq!(recency_weights(4), vec![1.0, 0.9, 0.8, 0.7]);
        assert_eq!(recency_weights(0), Vec::<f64>::new());
        assert_eq!(recency_weights(50).len(), MAX_WINDOW);
    }

    #[test]
    fn weighted_form_pads_missing_gameweeks_with_zero() {
        let form = weighted_form(&[10.0, 5.0], 4);
        assert!((form - 14.5).abs() < 1e-9);
        let truncated = weighted_form(&[1.0, 1.0, 1.0, 1.0, 100.0], 4);
        assert!((truncated - 3.4).abs() < 1e-9);
    }

    #[test]
    fn points_prefers_expected_then_total() {
        let records = load_history_from_reader(HISTORY.as_bytes()).unwrap();
        assert_eq!(records.len(), 6);
        assert_eq!(records[0].points(), 6.0);
        assert_eq!(records[1].points(), 2.0);
        assert_eq!(records[0].minutes, Some(90));
    }

    #[test]
    fn form_uses_latest_four_gameweeks() {
        let records = load_history_from_reader(HISTORY.as_bytes()).unwrap();
        let loaded = form_from_history(&records, DEFAULT_WINDOW);
        assert_eq!(loaded.len(), 2);

        let salah = &loaded.rows[0];
        // GW5 7.0, GW4 4.0, GW3 5.0, GW2 2.0 (total points, no xP)
        let expected = 7.0 + 0.9 * 4.0 + 0.8 * 5.0 + 0.7 * 2.0;
        assert!((salah.score - expected).abs() < 1e-9);
        assert_eq!(salah.cost, RawCost::Tenths(132));
        assert_eq!(salah.club, "Liverpool");

        let raya = &loaded.rows[1];
        assert!((raya.score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn double_gameweek_fixtures_are_summed() {
        let csv = "\
element,name,position,team,value,GW,total_points
9,Watkins,FWD,Villa,90,7,5
9,Watkins,FWD,Villa,90,7,6
9,Watkins,FWD,Villa,90,6,2
";
        let records = load_history_from_reader(csv.as_bytes()).unwrap();
        let loaded = form_from_history(&records, 2);
        assert!((loaded.rows[0].score - (11.0 + 0.9 * 2.0)).abs() < 1e-9);
    }

    #[test]
    fn player_without_price_skipped() {
        let csv = "\
element,name,position,team,GW,total_points
3,Nobody,DEF,X,1,2
";
        let records = load_history_from_reader(csv.as_bytes()).unwrap();
        assert!(form_from_history(&records, 4).is_empty());
    }

    #[test]
    fn malformed_rows_skipped() {
        let csv = "\
element,name,position,team,value,GW,total_points
x,Broken,DEF,X,45,1,2
4,Fine,DEF,X,45,1,2
";
        let records = load_history_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].player_id, 4);
    }
}
