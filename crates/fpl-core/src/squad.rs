// Squad selection as a 0/1 integer program.
//
// One binary variable per candidate. Quotas, budget and club caps are linear
// constraints; locks pin variables to 1; the transfer variant adds one binary
// change indicator per candidate tied to its prior membership.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use good_lp::{
    constraint, microlp, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{InputError, OptimizeError};
use crate::player::{normalize_name, PlayerCandidate, PlayerId, Position, PositionCounts};

/// FPL squad size.
pub const SQUAD_SIZE: usize = 15;

/// FPL squad quotas: 2 GK, 5 DEF, 5 MID, 3 FWD.
pub const SQUAD_QUOTAS: PositionCounts = PositionCounts::new(2, 5, 5, 3);

/// Default budget in tenths (100.0m).
pub const DEFAULT_BUDGET_TENTHS: u32 = 1000;

/// Default maximum players from one club.
pub const DEFAULT_CLUB_CAP: usize = 3;

// ---------------------------------------------------------------------------
// Rules and options
// ---------------------------------------------------------------------------

/// League rules the squad must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SquadRules {
    pub budget_tenths: u32,
    pub club_cap: usize,
}

impl Default for SquadRules {
    fn default() -> Self {
        Self {
            budget_tenths: DEFAULT_BUDGET_TENTHS,
            club_cap: DEFAULT_CLUB_CAP,
        }
    }
}

impl SquadRules {
    /// Check a finished selection against every rule. Returns the first
    /// violation found.
    pub fn check(&self, players: &[PlayerCandidate]) -> Result<(), String> {
        if players.len() != SQUAD_SIZE {
            return Err(format!(
                "squad has {} players, expected {}",
                players.len(),
                SQUAD_SIZE
            ));
        }
        let counts = PositionCounts::from_positions(players.iter().map(|p| p.position));
        if counts != SQUAD_QUOTAS {
            return Err(format!(
                "position counts {} do not match quotas {}",
                counts, SQUAD_QUOTAS
            ));
        }
        let cost: u64 = players.iter().map(|p| p.cost_tenths as u64).sum();
        if cost > self.budget_tenths as u64 {
            return Err(format!(
                "squad cost {} exceeds budget {}",
                cost, self.budget_tenths
            ));
        }
        for (club, n) in club_counts(players) {
            if n > self.club_cap {
                return Err(format!(
                    "{} players from club '{}' exceeds cap {}",
                    n, club, self.club_cap
                ));
            }
        }
        Ok(())
    }
}

/// Prior squad plus the exact number of transfers to make from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferState {
    pub prior_squad: Vec<PlayerId>,
    pub transfer_count: usize,
}

/// Per-call options for [`select_squad`]. The default applies no locks and
/// no transfer constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SquadOptions {
    /// Names forced into the squad, matched case-insensitively after trimming.
    pub locked_names: Vec<String>,
    pub transfer: Option<TransferState>,
}

// ---------------------------------------------------------------------------
// Squad
// ---------------------------------------------------------------------------

/// A legal 15-player squad, ordered by position then id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Squad {
    players: Vec<PlayerCandidate>,
}

impl Squad {
    /// Wrap an already-legal selection. Players are reordered by
    /// (position, id) so downstream enumeration is deterministic.
    pub fn new(mut players: Vec<PlayerCandidate>, rules: &SquadRules) -> Result<Self, String> {
        rules.check(&players)?;
        players.sort_by_key(|p| (p.position, p.id));
        Ok(Self { players })
    }

    pub fn players(&self) -> &[PlayerCandidate] {
        &self.players
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id).collect()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn total_cost_tenths(&self) -> u32 {
        self.players.iter().map(|p| p.cost_tenths).sum()
    }

    pub fn total_score(&self) -> f64 {
        self.players.iter().map(|p| p.score).sum()
    }

    pub fn position_counts(&self) -> PositionCounts {
        PositionCounts::from_positions(self.players.iter().map(|p| p.position))
    }

    pub fn club_counts(&self) -> BTreeMap<&str, usize> {
        club_counts(&self.players)
    }

    /// Ids in exactly one of `self` and `prior`.
    pub fn symmetric_difference(&self, prior: &[PlayerId]) -> BTreeSet<PlayerId> {
        let mine: BTreeSet<PlayerId> = self.players.iter().map(|p| p.id).collect();
        let theirs: BTreeSet<PlayerId> = prior.iter().copied().collect();
        mine.symmetric_difference(&theirs).copied().collect()
    }
}

fn club_counts(players: &[PlayerCandidate]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for p in players {
        *counts.entry(p.club.as_str()).or_insert(0) += 1;
    }
    counts
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

/// Structural checks run before any model is built.
pub fn validate_candidates(candidates: &[PlayerCandidate]) -> Result<(), InputError> {
    if candidates.is_empty() {
        return Err(InputError::EmptyPool);
    }
    let mut seen = HashSet::with_capacity(candidates.len());
    for c in candidates {
        if !seen.insert(c.id) {
            return Err(InputError::DuplicateId(c.id));
        }
        if !c.score.is_finite() {
            return Err(InputError::NonFiniteScore { id: c.id });
        }
    }
    Ok(())
}

fn validate_transfer(
    candidates: &[PlayerCandidate],
    transfer: &TransferState,
) -> Result<(), InputError> {
    if transfer.prior_squad.len() != SQUAD_SIZE {
        return Err(InputError::PriorSquadSize {
            expected: SQUAD_SIZE,
            found: transfer.prior_squad.len(),
        });
    }
    if transfer.transfer_count > SQUAD_SIZE {
        return Err(InputError::TransferCountOutOfRange {
            count: transfer.transfer_count,
            max: SQUAD_SIZE,
        });
    }
    let pool: HashSet<PlayerId> = candidates.iter().map(|c| c.id).collect();
    let mut seen = HashSet::with_capacity(SQUAD_SIZE);
    for &id in &transfer.prior_squad {
        if !seen.insert(id) {
            return Err(InputError::DuplicatePriorId(id));
        }
        if !pool.contains(&id) {
            return Err(InputError::UnknownPriorId(id));
        }
    }
    Ok(())
}

/// Indices of candidates that must be selected: tagged as locked by the pool
/// builder, or named in `locked_names`.
fn resolve_locks(
    candidates: &[PlayerCandidate],
    locked_names: &[String],
) -> Result<Vec<usize>, InputError> {
    let wanted: BTreeSet<String> = locked_names
        .iter()
        .map(|n| normalize_name(n))
        .filter(|n| !n.is_empty())
        .collect();

    let mut matched: HashSet<String> = HashSet::new();
    let mut forced = Vec::new();
    for (i, c) in candidates.iter().enumerate() {
        let key = c.normalized_name();
        let named = wanted.contains(&key);
        if named {
            matched.insert(key);
        }
        if named || c.locked {
            forced.push(i);
        }
    }

    if let Some(missing) = wanted.iter().find(|n| !matched.contains(*n)) {
        return Err(InputError::UnknownLockedName(missing.clone()));
    }
    Ok(forced)
}

// ---------------------------------------------------------------------------
// Pre-solve feasibility
// ---------------------------------------------------------------------------

/// Cheap checks that prove infeasibility without building a model. Each
/// returns a reason naming the violated rule.
fn precheck(
    candidates: &[PlayerCandidate],
    forced: &[usize],
    rules: &SquadRules,
) -> Result<(), OptimizeError> {
    let supply = PositionCounts::from_positions(candidates.iter().map(|c| c.position));
    for pos in Position::ALL {
        if supply.get(pos) < SQUAD_QUOTAS.get(pos) {
            return Err(OptimizeError::infeasible(format!(
                "pool has {} {} candidates, squad needs {}",
                supply.get(pos),
                pos,
                SQUAD_QUOTAS.get(pos)
            )));
        }
    }

    if forced.len() > SQUAD_SIZE {
        return Err(OptimizeError::infeasible(format!(
            "{} locked players exceed squad size {}",
            forced.len(),
            SQUAD_SIZE
        )));
    }

    let locked: Vec<PlayerCandidate> = forced.iter().map(|&i| candidates[i].clone()).collect();
    let locked_counts = PositionCounts::from_positions(locked.iter().map(|c| c.position));
    for pos in Position::ALL {
        if locked_counts.get(pos) > SQUAD_QUOTAS.get(pos) {
            return Err(OptimizeError::infeasible(format!(
                "{} locked {} players exceed quota {}",
                locked_counts.get(pos),
                pos,
                SQUAD_QUOTAS.get(pos)
            )));
        }
    }
    for (club, n) in club_counts(&locked) {
        if n > rules.club_cap {
            return Err(OptimizeError::infeasible(format!(
                "{} locked players from club '{}' exceed cap {}",
                n, club, rules.club_cap
            )));
        }
    }
    let locked_cost: u64 = locked.iter().map(|c| c.cost_tenths as u64).sum();
    if locked_cost > rules.budget_tenths as u64 {
        return Err(OptimizeError::infeasible(format!(
            "locked players cost {} which exceeds budget {}",
            locked_cost, rules.budget_tenths
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Solve
// ---------------------------------------------------------------------------

/// Choose the 15-player squad with maximum total score.
///
/// Input is validated first; malformed input never reaches the solver. A fresh
/// model is built on every call. The solver's answer is re-checked against
/// the rules, the locks and the transfer delta before it is returned.
pub fn select_squad(
    candidates: &[PlayerCandidate],
    options: &SquadOptions,
    rules: &SquadRules,
) -> Result<Squad, OptimizeError> {
    validate_candidates(candidates)?;
    if let Some(transfer) = &options.transfer {
        validate_transfer(candidates, transfer)?;
    }
    let forced = resolve_locks(candidates, &options.locked_names)?;
    precheck(candidates, &forced, rules)?;

    let mut vars = ProblemVariables::new();
    let picks: Vec<Variable> = candidates
        .iter()
        .map(|_| vars.add(variable().binary()))
        .collect();

    let objective: Expression = candidates
        .iter()
        .zip(&picks)
        .map(|(c, &x)| c.score * x)
        .sum();

    // Change indicators are added before the model is created since
    // ProblemVariables is consumed by `maximise`.
    let changes: Option<(Vec<Variable>, Vec<f64>, usize)> = options.transfer.as_ref().map(|t| {
        let prior: HashSet<PlayerId> = t.prior_squad.iter().copied().collect();
        let indicators = candidates
            .iter()
            .map(|_| vars.add(variable().binary()))
            .collect();
        let membership = candidates
            .iter()
            .map(|c| if prior.contains(&c.id) { 1.0 } else { 0.0 })
            .collect();
        (indicators, membership, t.transfer_count)
    });

    debug!(
        "building squad model: {} candidates, {} locked, transfer variant: {}",
        candidates.len(),
        forced.len(),
        changes.is_some()
    );

    let mut problem = vars.maximise(objective).using(microlp);

    let squad_size: Expression = picks.iter().copied().sum();
    problem.add_constraint(constraint!(squad_size == SQUAD_SIZE as f64));

    for pos in Position::ALL {
        let in_position: Expression = candidates
            .iter()
            .zip(&picks)
            .filter(|(c, _)| c.position == pos)
            .map(|(_, &x)| x)
            .sum();
        problem.add_constraint(constraint!(in_position == SQUAD_QUOTAS.get(pos) as f64));
    }

    let spend: Expression = candidates
        .iter()
        .zip(&picks)
        .map(|(c, &x)| c.cost_tenths as f64 * x)
        .sum();
    problem.add_constraint(constraint!(spend <= rules.budget_tenths as f64));

    let mut by_club: HashMap<&str, Vec<Variable>> = HashMap::new();
    for (c, &x) in candidates.iter().zip(&picks) {
        by_club.entry(c.club.as_str()).or_default().push(x);
    }
    for members in by_club.values() {
        if members.len() <= rules.club_cap {
            continue;
        }
        let from_club: Expression = members.iter().copied().sum();
        problem.add_constraint(constraint!(from_club <= rules.club_cap as f64));
    }

    for &i in &forced {
        let x = picks[i];
        problem.add_constraint(constraint!(x == 1.0));
    }

    if let Some((indicators, membership, transfer_count)) = &changes {
        // d = |x - s| for binary x and constant s.
        for ((&x, &d), &s) in picks.iter().zip(indicators).zip(membership) {
            problem.add_constraint(constraint!(x - d <= s));
            problem.add_constraint(constraint!(-1.0 * d - x <= -s));
            problem.add_constraint(constraint!(d - x <= s));
            problem.add_constraint(constraint!(d + x <= 2.0 - s));
        }
        let flips: Expression = indicators.iter().copied().sum();
        problem.add_constraint(constraint!(flips == (2 * transfer_count) as f64));
    }

    let solution = match problem.solve() {
        Ok(solution) => solution,
        Err(ResolutionError::Infeasible) => {
            info!("squad model infeasible");
            return Err(OptimizeError::infeasible(match &options.transfer {
                Some(t) => format!(
                    "no legal squad within budget, quotas, club caps and locks with exactly {} transfers",
                    t.transfer_count
                ),
                None => "no legal squad within budget, quotas, club caps and locks".to_string(),
            }));
        }
        Err(other) => {
            warn!("squad solver stopped without a solution: {}", other);
            return Err(OptimizeError::SolverInconclusive(other.to_string()));
        }
    };

    let chosen: Vec<PlayerCandidate> = candidates
        .iter()
        .zip(&picks)
        .filter(|(_, x)| solution.value(**x) > 0.5)
        .map(|(c, _)| c.clone())
        .collect();

    let squad = Squad::new(chosen, rules).map_err(|violation| {
        warn!("solver returned an illegal squad: {}", violation);
        OptimizeError::SolverInconclusive(format!("solver returned an illegal squad: {violation}"))
    })?;

    if let Some(missing) = forced.iter().find(|&&i| !squad.contains(candidates[i].id)) {
        return Err(OptimizeError::SolverInconclusive(format!(
            "solver dropped locked player {}",
            candidates[*missing].id
        )));
    }
    if let Some(t) = &options.transfer {
        let flips = squad.symmetric_difference(&t.prior_squad).len();
        if flips != 2 * t.transfer_count {
            return Err(OptimizeError::SolverInconclusive(format!(
                "solver returned {} membership changes, expected {}",
                flips,
                2 * t.transfer_count
            )));
        }
    }

    info!(
        "squad selected: score {:.2}, cost {}/{}",
        squad.total_score(),
        squad.total_cost_tenths(),
        rules.budget_tenths
    );
    Ok(squad)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
