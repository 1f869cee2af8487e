// SQLite store for players, teams, gameweek history and saved squad runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use fpl_core::optimizer::Optimization;
use fpl_core::player::PlayerId;
use fpl_core::pool::{RawCost, RawPlayerRow, RawPosition};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::history::{weighted_form, GameweekRecord};
use crate::{LoadedPlayers, PlayerDetails};

/// A real-world club.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: i64,
    pub name: String,
    pub short_name: String,
}

/// A player as stored in the `players` table. `position` is the FPL
/// `element_type` code and `now_cost` is in tenths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub first_name: String,
    pub second_name: String,
    pub web_name: String,
    pub team_id: i64,
    pub position: i64,
    pub now_cost: i64,
}

/// Outcome of a history import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryImport {
    pub inserted: usize,
    /// Rows referencing a player id missing from `players`.
    pub dropped_unknown_player: usize,
}

/// One persisted optimizer result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadRun {
    pub id: Option<i64>,
    pub created_at: String,
    pub source: String,
    pub formation: String,
    pub squad_ids: Vec<PlayerId>,
    pub xi_ids: Vec<PlayerId>,
    pub captain_id: Option<PlayerId>,
    pub vice_captain_id: Option<PlayerId>,
    pub squad_score: f64,
    pub projected_points: f64,
}

impl SquadRun {
    /// Capture an optimizer result as a new, unsaved run stamped with the
    /// current UTC time.
    pub fn from_optimization(result: &Optimization, source: &str, formation: &str) -> Self {
        Self {
            id: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            source: source.to_string(),
            formation: formation.to_string(),
            squad_ids: result.squad_ids(),
            xi_ids: result.xi_ids(),
            captain_id: result.captain_id(),
            vice_captain_id: result.vice_captain_id(),
            squad_score: result.squad.total_score(),
            projected_points: result.projected_points(),
        }
    }
}

/// SQLite-backed store. All access goes through one mutex-guarded connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at `path` and ensure all tables exist.
    /// Pass `":memory:"` for an ephemeral database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS teams (
                id         INTEGER PRIMARY KEY,
                name       TEXT NOT NULL,
                short_name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS players (
                id          INTEGER PRIMARY KEY,
                first_name  TEXT NOT NULL,
                second_name TEXT NOT NULL,
                web_name    TEXT NOT NULL,
                team_id     INTEGER NOT NULL,
                position    INTEGER NOT NULL,
                now_cost    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS player_gameweek_history (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id       INTEGER NOT NULL REFERENCES players(id),
                gameweek        INTEGER NOT NULL,
                total_points    REAL,
                expected_points REAL,
                minutes         INTEGER,
                player_value    INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_history_player_gameweek
                ON player_gameweek_history(player_id, gameweek);

            CREATE TABLE IF NOT EXISTS squad_runs (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at       TEXT NOT NULL,
                source           TEXT NOT NULL,
                formation        TEXT NOT NULL,
                squad_ids        TEXT NOT NULL,
                xi_ids           TEXT NOT NULL,
                captain_id       INTEGER,
                vice_captain_id  INTEGER,
                squad_score      REAL NOT NULL,
                projected_points REAL NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------

    /// Insert or replace teams in one transaction.
    pub fn upsert_teams(&self, teams: &[TeamRecord]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin teams transaction")?;
        for t in teams {
            tx.execute(
                "INSERT INTO teams (id, name, short_name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    name       = excluded.name,
                    short_name = excluded.short_name",
                params![t.id, t.name, t.short_name],
            )
            .context("failed to upsert team")?;
        }
        tx.commit().context("failed to commit teams")?;
        Ok(())
    }

    /// Insert or update players in one transaction.
    pub fn upsert_players(&self, players: &[PlayerRecord]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin players transaction")?;
        for p in players {
            tx.execute(
                "INSERT INTO players (id, first_name, second_name, web_name, team_id, position, now_cost)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    first_name  = excluded.first_name,
                    second_name = excluded.second_name,
                    web_name    = excluded.web_name,
                    team_id     = excluded.team_id,
                    position    = excluded.position,
                    now_cost    = excluded.now_cost",
                params![
                    p.id,
                    p.first_name,
                    p.second_name,
                    p.web_name,
                    p.team_id,
                    p.position,
                    p.now_cost
                ],
            )
            .context("failed to upsert player")?;
        }
        tx.commit().context("failed to commit players")?;
        Ok(())
    }

    /// Append history rows. Rows for players not in `players` are dropped
    /// and counted instead of failing the whole import.
    pub fn insert_history(&self, records: &[GameweekRecord]) -> Result<HistoryImport> {
        let mut conn = self.conn();
        let known: HashSet<PlayerId> = {
            let mut stmt = conn
                .prepare("SELECT id FROM players")
                .context("failed to prepare player id query")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, PlayerId>(0))
                .context("failed to query player ids")?
                .collect::<std::result::Result<HashSet<_>, _>>()
                .context("failed to map player ids")?;
            ids
        };

        let mut summary = HistoryImport::default();
        let tx = conn.transaction().context("failed to begin history transaction")?;
        for r in records {
            if !known.contains(&r.player_id) {
                summary.dropped_unknown_player += 1;
                continue;
            }
            tx.execute(
                "INSERT INTO player_gameweek_history
                    (player_id, gameweek, total_points, expected_points, minutes, player_value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    r.player_id,
                    r.gameweek,
                    r.total_points,
                    r.expected_points,
                    r.minutes,
                    r.cost_tenths
                ],
            )
            .context("failed to insert history row")?;
            summary.inserted += 1;
        }
        tx.commit().context("failed to commit history")?;

        if summary.dropped_unknown_player > 0 {
            warn!(
                "dropped {} history rows referencing unknown players",
                summary.dropped_unknown_player
            );
        }
        Ok(summary)
    }

    pub fn player_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))
            .context("failed to count players")?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Optimizer input
    // ------------------------------------------------------------------

    /// Every player with recency-weighted form over their latest `window`
    /// gameweeks. Players with no history score 0.
    pub fn load_form(&self, window: usize) -> Result<LoadedPlayers> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "WITH ranked AS (
                    SELECT player_id,
                           COALESCE(expected_points, total_points, 0.0) AS ep,
                           ROW_NUMBER() OVER (PARTITION BY player_id ORDER BY gameweek DESC) AS rn
                    FROM player_gameweek_history
                 )
                 SELECT p.id, p.first_name, p.second_name, p.web_name, p.team_id,
                        t.short_name, p.position, p.now_cost, r.ep
                 FROM players p
                 LEFT JOIN teams t ON t.id = p.team_id
                 LEFT JOIN ranked r ON r.player_id = p.id AND r.rn <= ?1
                 ORDER BY p.id ASC, r.rn ASC",
            )
            .context("failed to prepare form query")?;

        struct FormRow {
            id: PlayerId,
            first_name: String,
            second_name: String,
            web_name: String,
            team_id: i64,
            team_short: Option<String>,
            position: i64,
            now_cost: i64,
            ep: Option<f64>,
        }

        let rows = stmt
            .query_map(params![window as i64], |row| {
                Ok(FormRow {
                    id: row.get(0)?,
                    first_name: row.get(1)?,
                    second_name: row.get(2)?,
                    web_name: row.get(3)?,
                    team_id: row.get(4)?,
                    team_short: row.get(5)?,
                    position: row.get(6)?,
                    now_cost: row.get(7)?,
                    ep: row.get(8)?,
                })
            })
            .context("failed to query form")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map form rows")?;

        // Rows arrive grouped by player, newest gameweek first.
        let mut grouped: BTreeMap<PlayerId, (FormRow, Vec<f64>)> = BTreeMap::new();
        for row in rows {
            let ep = row.ep;
            let entry = grouped.entry(row.id).or_insert_with(|| (row, Vec::new()));
            if let Some(ep) = ep {
                entry.1.push(ep);
            }
        }

        let mut loaded = LoadedPlayers::default();
        for (id, (p, recent)) in grouped {
            let club = p.team_id.to_string();
            let details = PlayerDetails {
                id,
                first_name: Some(p.first_name.clone()),
                second_name: Some(p.second_name.clone()),
                web_name: p.web_name.clone(),
                club: p.team_short.clone().unwrap_or_else(|| club.clone()),
            };
            let name = if p.first_name.is_empty() && p.second_name.is_empty() {
                p.web_name.clone()
            } else {
                format!("{} {}", p.first_name, p.second_name).trim().to_string()
            };
            let row = RawPlayerRow {
                player_id: Some(id),
                name,
                position: RawPosition::Code(p.position),
                club,
                cost: RawCost::Tenths(p.now_cost),
                score: weighted_form(&recent, window),
            };
            loaded.push(row, details);
        }

        info!("loaded {} players with {}-gameweek form", loaded.len(), window);
        Ok(loaded)
    }

    // ------------------------------------------------------------------
    // Saved runs
    // ------------------------------------------------------------------

    /// Persist a run and return its row id.
    pub fn save_run(&self, run: &SquadRun) -> Result<i64> {
        let conn = self.conn();
        let squad_json =
            serde_json::to_string(&run.squad_ids).context("failed to serialize squad ids")?;
        let xi_json = serde_json::to_string(&run.xi_ids).context("failed to serialize xi ids")?;
        conn.execute(
            "INSERT INTO squad_runs
                (created_at, source, formation, squad_ids, xi_ids, captain_id, vice_captain_id,
                 squad_score, projected_points)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.created_at,
                run.source,
                run.formation,
                squad_json,
                xi_json,
                run.captain_id,
                run.vice_captain_id,
                run.squad_score,
                run.projected_points
            ],
        )
        .context("failed to save squad run")?;
        Ok(conn.last_insert_rowid())
    }

    /// The most recently saved run, if any.
    pub fn last_run(&self) -> Result<Option<SquadRun>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT id, created_at, source, formation, squad_ids, xi_ids, captain_id,
                        vice_captain_id, squad_score, projected_points
                 FROM squad_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<PlayerId>>(6)?,
                        row.get::<_, Option<PlayerId>>(7)?,
                        row.get::<_, f64>(8)?,
                        row.get::<_, f64>(9)?,
                    ))
                },
            )
            .optional()
            .context("failed to query last squad run")?;

        let Some((id, created_at, source, formation, squad, xi, captain, vice, score, points)) =
            raw
        else {
            return Ok(None);
        };
        Ok(Some(SquadRun {
            id: Some(id),
            created_at,
            source,
            formation,
            squad_ids: serde_json::from_str(&squad).context("failed to parse saved squad ids")?,
            xi_ids: serde_json::from_str(&xi).context("failed to parse saved xi ids")?,
            captain_id: captain,
            vice_captain_id: vice,
            squad_score: score,
            projected_points: points,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn player(
        id: PlayerId,
        web_name: &str,
        team_id: i64,
        position: i64,
        now_cost: i64,
    ) -> PlayerRecord {
        PlayerRecord {
            id,
            first_name: format!("First{id}"),
            second_name: web_name.to_string(),
            web_name: web_name.to_string(),
            team_id,
            position,
            now_cost,
        }
    }

    fn gw(player_id: PlayerId, gameweek: u32, total: Option<f64>, xp: Option<f64>) -> GameweekRecord {
        GameweekRecord {
            player_id,
            name: String::new(),
            position: String::new(),
            club: String::new(),
            cost_tenths: Some(50),
            gameweek,
            total_points: total,
            expected_points: xp,
            minutes: Some(90),
        }
    }

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in ["player_gameweek_history", "players", "squad_runs", "teams"] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn upsert_players_updates_existing() {
        let db = test_db();
        db.upsert_players(&[player(1, "Saka", 1, 3, 100)]).unwrap();
        db.upsert_players(&[player(1, "Saka", 1, 3, 102)]).unwrap();
        assert_eq!(db.player_count().unwrap(), 1);
        let loaded = db.load_form(4).unwrap();
        assert_eq!(loaded.rows[0].cost, RawCost::Tenths(102));
    }

    #[test]
    fn history_for_unknown_players_dropped() {
        let db = test_db();
        db.upsert_players(&[player(1, "Saka", 1, 3, 100)]).unwrap();
        let summary = db
            .insert_history(&[gw(1, 1, Some(5.0), None), gw(99, 1, Some(3.0), None)])
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.dropped_unknown_player, 1);
    }

    #[test]
    fn load_form_weights_latest_gameweeks() {
        let db = test_db();
        db.upsert_teams(&[TeamRecord {
            id: 1,
            name: "Arsenal".into(),
            short_name: "ARS".into(),
        }])
        .unwrap();
        db.upsert_players(&[player(1, "Saka", 1, 3, 100), player(2, "Raya", 1, 1, 55)])
            .unwrap();
        db.insert_history(&[
            gw(1, 1, Some(20.0), None),
            gw(1, 2, Some(2.0), Some(4.0)),
            gw(1, 3, Some(6.0), None),
            gw(1, 4, None, None),
            gw(1, 5, Some(10.0), Some(8.0)),
        ])
        .unwrap();

        let loaded = db.load_form(4).unwrap();
        assert_eq!(loaded.len(), 2);

        let saka = &loaded.rows[0];
        // GW5 8.0 (xP), GW4 0, GW3 6.0, GW2 4.0 (xP); GW1 falls outside.
        let expected = 8.0 + 0.9 * 0.0 + 0.8 * 6.0 + 0.7 * 4.0;
        assert!((saka.score - expected).abs() < 1e-9);
        assert_eq!(saka.position, RawPosition::Code(3));
        assert_eq!(saka.club, "1");
        assert_eq!(saka.name, "First1 Saka");
        assert_eq!(loaded.details[&1].club, "ARS");

        let raya = &loaded.rows[1];
        assert_eq!(raya.score, 0.0);
    }

    #[test]
    fn saved_runs_round_trip_latest() {
        let db = test_db();
        assert!(db.last_run().unwrap().is_none());

        let first = SquadRun {
            id: None,
            created_at: "2025-08-15T18:00:00+00:00".to_string(),
            source: "predictions".to_string(),
            formation: "one-forward".to_string(),
            squad_ids: vec![1, 2],
            xi_ids: vec![1],
            captain_id: Some(1),
            vice_captain_id: None,
            squad_score: 9.0,
            projected_points: 12.0,
        };
        let mut second = first.clone();
        second.squad_ids = vec![3, 4];
        second.captain_id = Some(3);

        db.save_run(&first).unwrap();
        let id = db.save_run(&second).unwrap();

        let last = db.last_run().unwrap().unwrap();
        assert_eq!(last.id, Some(id));
        assert_eq!(last.squad_ids, vec![3, 4]);
        assert_eq!(last.captain_id, Some(3));
        assert_eq!(last.vice_captain_id, None);
    }

    #[test]
    fn foreign_keys_enforced() {
        let db = test_db();
        let conn = db.conn();
        let result = conn.execute(
            "INSERT INTO player_gameweek_history (player_id, gameweek) VALUES (42, 1)",
            [],
        );
        assert!(result.is_err());
    }
}
