// Pool -> squad -> lineup pipeline.

use serde::Serialize;
use tracing::info;

use crate::error::{InputError, OptimizeError};
use crate::lineup::{select_lineup, FormationRule, Lineup};
use crate::player::{PlayerCandidate, PlayerId};
use crate::pool::{build_candidates, CandidatePool, PoolReport, RawPlayerRow};
use crate::squad::{select_squad, Squad, SquadOptions, SquadRules, TransferState};

/// Everything one optimization call needs besides the player rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizeRequest {
    pub locked_names: Vec<String>,
    pub transfer: Option<TransferState>,
    pub rules: SquadRules,
    pub formation: FormationRule,
}

impl OptimizeRequest {
    fn squad_options(&self) -> SquadOptions {
        SquadOptions {
            locked_names: self.locked_names.clone(),
            transfer: self.transfer.clone(),
        }
    }
}

/// Result of a successful optimization.
#[derive(Debug, Clone, Serialize)]
pub struct Optimization {
    pub squad: Squad,
    pub lineup: Lineup,
    #[serde(skip)]
    pub pool_report: PoolReport,
}

impl Optimization {
    pub fn squad_ids(&self) -> Vec<PlayerId> {
        self.squad.ids()
    }

    pub fn xi_ids(&self) -> Vec<PlayerId> {
        self.lineup.starter_ids()
    }

    pub fn captain_id(&self) -> Option<PlayerId> {
        self.lineup.captain
    }

    pub fn vice_captain_id(&self) -> Option<PlayerId> {
        self.lineup.vice_captain
    }

    /// Projected lineup points with the captain counted twice.
    pub fn projected_points(&self) -> f64 {
        self.lineup.value
    }
}

/// Run the full pipeline on raw upstream rows.
///
/// Lock names that match no row are rejected as malformed input rather than
/// silently ignored.
pub fn optimize(
    rows: Vec<RawPlayerRow>,
    request: &OptimizeRequest,
) -> Result<Optimization, OptimizeError> {
    let CandidatePool { candidates, report } = build_candidates(rows, &request.locked_names);
    if let Some(missing) = report.unmatched_locks.first() {
        return Err(InputError::UnknownLockedName(missing.clone()).into());
    }
    let mut result = optimize_candidates(&candidates, request)?;
    result.pool_report = report;
    Ok(result)
}

/// Run squad and lineup selection on an already-built candidate list.
pub fn optimize_candidates(
    candidates: &[PlayerCandidate],
    request: &OptimizeRequest,
) -> Result<Optimization, OptimizeError> {
    let squad = select_squad(candidates, &request.squad_options(), &request.rules)?;
    let lineup = select_lineup(&squad, request.formation);
    if lineup.is_empty() {
        return Err(OptimizeError::NoValidLineup {
            rule: request.formation.to_string(),
        });
    }

    info!(
        "optimization complete: squad score {:.2}, lineup value {:.2}, captain {:?}",
        squad.total_score(),
        lineup.value,
        lineup.captain
    );

    Ok(Optimization {
        squad,
        lineup,
        pool_report: PoolReport::default(),
    })
}
