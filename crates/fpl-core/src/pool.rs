// Candidate pool construction: position/cost normalization, dedup, lock tagging.
//
// Upstream rows come from CSV exports, model output or database projections
// and disagree on how positions and prices are encoded. Everything is folded
// into `PlayerCandidate` here so the solver only ever sees typed records.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::player::{normalize_name, units_to_tenths, PlayerCandidate, PlayerId, Position};

/// Maximum number of unresolved position labels kept for diagnostics.
const MAX_UNRESOLVED_SAMPLES: usize = 20;

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// Position field as it arrives from a source.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPosition {
    /// FPL `element_type` code, 1–4.
    Code(i64),
    /// Free-text label ("GKP", "Goalkeeper", "Striker", "3", ...).
    Label(String),
}

impl RawPosition {
    pub fn resolve(&self) -> Option<Position> {
        match self {
            RawPosition::Code(code) => Position::from_code(*code),
            RawPosition::Label(label) => Position::parse(label),
        }
    }

    fn describe(&self) -> String {
        match self {
            RawPosition::Code(code) => code.to_string(),
            RawPosition::Label(label) => label.clone(),
        }
    }
}

/// Cost field as it arrives from a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawCost {
    /// Already in tenths (FPL `now_cost` / `value`).
    Tenths(i64),
    /// Whole currency units (5.5).
    Units(f64),
}

impl RawCost {
    pub fn to_tenths(self) -> Option<u32> {
        match self {
            RawCost::Tenths(t) => u32::try_from(t).ok(),
            RawCost::Units(u) => units_to_tenths(u),
        }
    }
}

/// One upstream record before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPlayerRow {
    /// Source identifier; rows without one get their row index.
    pub player_id: Option<PlayerId>,
    pub name: String,
    pub position: RawPosition,
    pub club: String,
    pub cost: RawCost,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Diagnostics for rows that did not make it into the pool unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolReport {
    pub rows_seen: usize,
    pub unresolved_position: usize,
    /// Distinct raw labels that failed to map, capped for log output.
    pub unresolved_samples: Vec<String>,
    pub invalid_cost: usize,
    pub non_finite_score: usize,
    pub blank_name: usize,
    /// Rows folded into a higher-scoring row with the same name.
    pub duplicates_merged: usize,
    /// Lock names that matched no candidate (normalized form).
    pub unmatched_locks: Vec<String>,
}

impl PoolReport {
    pub fn rows_excluded(&self) -> usize {
        self.unresolved_position + self.invalid_cost + self.non_finite_score + self.blank_name
    }
}

/// Normalized candidates plus the report describing how they were built.
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    pub candidates: Vec<PlayerCandidate>,
    pub report: PoolReport,
}

impl CandidatePool {
    pub fn locked(&self) -> impl Iterator<Item = &PlayerCandidate> {
        self.candidates.iter().filter(|c| c.locked)
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerCandidate> {
        self.candidates.iter().find(|c| c.id == id)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Normalize a set of lock names into their matching form, dropping blanks.
pub fn normalize_lock_names<S: AsRef<str>>(names: &[S]) -> BTreeSet<String> {
    names
        .iter()
        .map(|n| normalize_name(n.as_ref()))
        .filter(|n| !n.is_empty())
        .collect()
}

/// Build the candidate pool from raw rows.
///
/// Rows with an unresolvable position, negative or non-finite cost,
/// non-finite score or a blank name are excluded and counted in the report.
/// Rows sharing a normalized name collapse into the highest-scoring one (the
/// first seen wins a tie); output order follows first appearance of each name.
///
/// Rows without an id are numbered upward from one past the largest explicit
/// id, in row order, so they never collide with real ids.
pub fn build_candidates<I, S>(rows: I, locked_names: &[S]) -> CandidatePool
where
    I: IntoIterator<Item = RawPlayerRow>,
    S: AsRef<str>,
{
    let locks = normalize_lock_names(locked_names);
    let mut report = PoolReport::default();
    let mut candidates: Vec<PlayerCandidate> = Vec::new();
    let mut slot_by_name: HashMap<String, usize> = HashMap::new();

    let rows: Vec<RawPlayerRow> = rows.into_iter().collect();
    let mut next_id = rows
        .iter()
        .filter_map(|r| r.player_id)
        .max()
        .map_or(0, |max| max + 1);

    for row in rows {
        report.rows_seen += 1;

        let name = row.name.trim();
        if name.is_empty() {
            report.blank_name += 1;
            continue;
        }

        let Some(position) = row.position.resolve() else {
            report.unresolved_position += 1;
            let raw = row.position.describe();
            if report.unresolved_samples.len() < MAX_UNRESOLVED_SAMPLES
                && !report.unresolved_samples.contains(&raw)
            {
                report.unresolved_samples.push(raw);
            }
            continue;
        };

        let Some(cost_tenths) = row.cost.to_tenths() else {
            warn!("excluding '{}': invalid cost {:?}", name, row.cost);
            report.invalid_cost += 1;
            continue;
        };

        if !row.score.is_finite() {
            warn!("excluding '{}': non-finite score", name);
            report.non_finite_score += 1;
            continue;
        }

        let id = row.player_id.unwrap_or_else(|| {
            let id = next_id;
            next_id += 1;
            id
        });
        let mut candidate =
            PlayerCandidate::new(id, name, position, row.club.trim(), cost_tenths, row.score);
        let key = candidate.normalized_name();
        candidate.locked = locks.contains(&key);

        match slot_by_name.get(&key) {
            Some(&slot) => {
                report.duplicates_merged += 1;
                if candidate.score > candidates[slot].score {
                    debug!(
                        "duplicate '{}': keeping score {:.2} over {:.2}",
                        name, candidate.score, candidates[slot].score
                    );
                    candidates[slot] = candidate;
                }
            }
            None => {
                slot_by_name.insert(key, candidates.len());
                candidates.push(candidate);
            }
        }
    }

    report.unmatched_locks = locks
        .iter()
        .filter(|lock| !slot_by_name.contains_key(*lock))
        .cloned()
        .collect();

    if report.unresolved_position > 0 {
        warn!(
            "{} rows excluded with unmapped positions (samples: {:?})",
            report.unresolved_position, report.unresolved_samples
        );
    }
    for lock in &report.unmatched_locks {
        warn!("lock '{}' matched no candidate", lock);
    }
    info!(
        "candidate pool built: {} candidates from {} rows ({} excluded, {} duplicates merged)",
        candidates.len(),
        report.rows_seen,
        report.rows_excluded(),
        report.duplicates_merged
    );

    CandidatePool { candidates, report }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
