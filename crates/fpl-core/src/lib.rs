pub mod error;
pub mod lineup;
pub mod optimizer;
pub mod player;
pub mod pool;
pub mod squad;

pub use error::{InputError, OptimizeError};
pub use lineup::{select_lineup, FormationRule, Lineup};
pub use optimizer::{optimize, optimize_candidates, OptimizeRequest, Optimization};
pub use player::{PlayerCandidate, PlayerId, Position};
pub use pool::{build_candidates, CandidatePool, PoolReport, RawCost, RawPlayerRow, RawPosition};
pub use squad::{select_squad, Squad, SquadOptions, SquadRules, TransferState};
