// Starting eleven and captaincy by exhaustive enumeration.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::player::{PlayerCandidate, PlayerId, Position, PositionCounts};
use crate::squad::Squad;

/// Players in a starting lineup.
pub const LINEUP_SIZE: usize = 11;

/// Formation minimums a starting eleven must satisfy. Both rules require
/// exactly one goalkeeper and at least three defenders and three midfielders;
/// they differ in the forward minimum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormationRule {
    /// At least one forward. Used for predicted-score selection.
    #[default]
    OneForward,
    /// At least two forwards. Used for historical-score selection.
    TwoForwards,
}

impl FormationRule {
    pub fn min_forwards(&self) -> usize {
        match self {
            FormationRule::OneForward => 1,
            FormationRule::TwoForwards => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormationRule::OneForward => "one-forward",
            FormationRule::TwoForwards => "two-forwards",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "one-forward" => Some(FormationRule::OneForward),
            "two-forwards" => Some(FormationRule::TwoForwards),
            _ => None,
        }
    }

    pub fn accepts(&self, counts: &PositionCounts) -> bool {
        counts.get(Position::Goalkeeper) == 1
            && counts.get(Position::Defender) >= 3
            && counts.get(Position::Midfielder) >= 3
            && counts.get(Position::Forward) >= self.min_forwards()
    }
}

impl fmt::Display for FormationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The chosen eleven plus armband holders.
///
/// An empty lineup (no starters, no captain) means no subset satisfied the
/// formation rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Lineup {
    /// Starters in squad order.
    pub starters: Vec<PlayerCandidate>,
    /// Substitute goalkeeper first, then outfielders by descending score.
    pub bench: Vec<PlayerCandidate>,
    pub captain: Option<PlayerId>,
    pub vice_captain: Option<PlayerId>,
    /// Sum of starter scores plus the captain's score counted once more.
    pub value: f64,
}

impl Lineup {
    pub fn is_empty(&self) -> bool {
        self.starters.is_empty()
    }

    pub fn starter_ids(&self) -> Vec<PlayerId> {
        self.starters.iter().map(|p| p.id).collect()
    }

    pub fn bench_ids(&self) -> Vec<PlayerId> {
        self.bench.iter().map(|p| p.id).collect()
    }

    pub fn formation(&self) -> PositionCounts {
        PositionCounts::from_positions(self.starters.iter().map(|p| p.position))
    }
}

// ---------------------------------------------------------------------------
// Combinations
// ---------------------------------------------------------------------------

/// k-subsets of `0..n` as ascending index vectors, in lexicographic order.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            done: k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        let current = self.indices.clone();
        let k = self.indices.len();

        // Rightmost index that can still move up.
        let mut i = k;
        loop {
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
            if self.indices[i] < self.n - k + i {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                break;
            }
        }
        Some(current)
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Higher score first, lower id on ties.
fn by_score_then_id(a: &PlayerCandidate, b: &PlayerCandidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.id.cmp(&b.id))
}

/// Pick the best starting eleven from a squad.
pub fn select_lineup(squad: &Squad, rule: FormationRule) -> Lineup {
    select_lineup_from(squad.players(), rule)
}

/// Pick the best eleven from any player list.
///
/// Every 11-subset is examined in lexicographic index order. A subset is
/// kept only when it strictly beats the current best, so the first maximizer
/// wins. Returns an empty lineup when no subset satisfies `rule`.
pub fn select_lineup_from(players: &[PlayerCandidate], rule: FormationRule) -> Lineup {
    let mut best: Option<(Vec<usize>, f64)> = None;
    let mut examined = 0usize;
    let mut accepted = 0usize;

    for combo in Combinations::new(players.len(), LINEUP_SIZE) {
        examined += 1;
        let counts = PositionCounts::from_positions(combo.iter().map(|&i| players[i].position));
        if !rule.accepts(&counts) {
            continue;
        }
        accepted += 1;

        let mut sum = 0.0;
        let mut top = f64::NEG_INFINITY;
        for &i in &combo {
            sum += players[i].score;
            top = top.max(players[i].score);
        }
        let value = sum + top;

        let better = match &best {
            Some((_, current)) => value > *current,
            None => true,
        };
        if better {
            best = Some((combo, value));
        }
    }

    debug!(
        "lineup search: {} subsets examined, {} legal under {}",
        examined, accepted, rule
    );

    let Some((indices, value)) = best else {
        warn!("no lineup satisfies formation rule {}", rule);
        return Lineup::default();
    };

    let starters: Vec<PlayerCandidate> = indices.iter().map(|&i| players[i].clone()).collect();

    let mut ranked: Vec<&PlayerCandidate> = starters.iter().collect();
    ranked.sort_by(|a, b| by_score_then_id(a, b));
    let captain = ranked.first().map(|p| p.id);
    let vice_captain = ranked.get(1).map(|p| p.id);

    let mut bench: Vec<PlayerCandidate> = players
        .iter()
        .enumerate()
        .filter(|(i, _)| !indices.contains(i))
        .map(|(_, p)| p.clone())
        .collect();
    bench.sort_by(|a, b| {
        let a_gk = a.position == Position::Goalkeeper;
        let b_gk = b.position == Position::Goalkeeper;
        b_gk.cmp(&a_gk).then_with(|| by_score_then_id(a, b))
    });

    Lineup {
        starters,
        bench,
        captain,
        vice_captain,
        value,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::squad::SquadRules;

    fn player(id: PlayerId, pos: Position, score: f64) -> PlayerCandidate {
        PlayerCandidate::new(id, format!("P{id}"), pos, format!("C{}", id % 7), 50, score)
    }

    /// 2/5/5/3 squad with scores given per position group.
    fn squad(gk: [f64; 2], def: [f64; 5], mid: [f64; 5], fwd: [f64; 3]) -> Squad {
        let mut players = Vec::new();
        let mut id = 1;
        for s in gk {
            players.push(player(id, Position::Goalkeeper, s));
            id += 1;
        }
        for s in def {
            players.push(player(id, Position::Defender, s));
            id += 1;
        }
        for s in mid {
            players.push(player(id, Position::Midfielder, s));
            id += 1;
        }
        for s in fwd {
            players.push(player(id, Position::Forward, s));
            id += 1;
        }
        Squad::new(players, &SquadRules::default()).unwrap()
    }

    #[test]
    fn combinations_count_and_order() {
        let all: Vec<Vec<usize>> = Combinations::new(15, 11).collect();
        assert_eq!(all.len(), 1365);
        assert_eq!(all[0], (0..11).collect::<Vec<_>>());
        assert_eq!(all[all.len() - 1], (4..15).collect::<Vec<_>>());
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn combinations_edge_cases() {
        assert_eq!(Combinations::new(3, 4).count(), 0);
        assert_eq!(Combinations::new(4, 4).count(), 1);
        assert_eq!(Combinations::new(5, 0).count(), 1);
    }

    #[test]
    fn formation_rule_accepts() {
        let ok = PositionCounts::new(1, 4, 5, 1);
        assert!(FormationRule::OneForward.accepts(&ok));
        assert!(!FormationRule::TwoForwards.accepts(&ok));
        assert!(FormationRule::TwoForwards.accepts(&PositionCounts::new(1, 3, 5, 2)));
        assert!(!FormationRule::OneForward.accepts(&PositionCounts::new(2, 3, 5, 1)));
        assert!(!FormationRule::OneForward.accepts(&PositionCounts::new(1, 2, 5, 3)));
    }

    #[test]
    fn formation_rule_parse_and_serde() {
        assert_eq!(FormationRule::parse("two-forwards"), Some(FormationRule::TwoForwards));
        assert_eq!(FormationRule::parse(" One-Forward "), Some(FormationRule::OneForward));
        assert_eq!(FormationRule::parse("4-4-2"), None);
        let json = serde_json::to_string(&FormationRule::TwoForwards).unwrap();
        assert_eq!(json, "\"two-forwards\"");
    }

    #[test]
    fn picks_best_eleven_with_captain() {
        let s = squad(
            [5.0, 1.0],
            [4.0, 4.0, 4.0, 1.0, 1.0],
            [6.0, 6.0, 6.0, 6.0, 9.0],
            [7.0, 2.0, 1.0],
        );
        let lineup = select_lineup(&s, FormationRule::OneForward);
        assert_eq!(lineup.starters.len(), 11);
        // The last slot goes to the 2.0 forward over a 1.0 defender.
        assert_eq!(lineup.formation(), PositionCounts::new(1, 3, 5, 2));
        assert_eq!(lineup.captain, Some(12)); // the 9.0 midfielder
        let expected = 5.0 + 12.0 + 33.0 + 9.0 + 9.0;
        assert!((lineup.value - expected).abs() < 1e-9);
    }

    #[test]
    fn two_forward_rule_forces_second_forward() {
        let s = squad(
            [5.0, 1.0],
            [4.0, 4.0, 4.0, 4.0, 4.0],
            [6.0, 6.0, 6.0, 6.0, 6.0],
            [7.0, 0.0, 0.0],
        );
        let one = select_lineup(&s, FormationRule::OneForward);
        assert_eq!(one.formation().get(Position::Forward), 1);
        let two = select_lineup(&s, FormationRule::TwoForwards);
        assert_eq!(two.formation().get(Position::Forward), 2);
        assert!(two.value < one.value);
    }

    #[test]
    fn captain_tie_goes_to_lowest_id() {
        let s = squad(
            [3.0, 1.0],
            [5.0, 5.0, 5.0, 5.0, 5.0],
            [8.0, 8.0, 2.0, 2.0, 2.0],
            [8.0, 2.0, 2.0],
        );
        let lineup = select_lineup(&s, FormationRule::OneForward);
        // ids 8 and 9 are the 8.0 midfielders, id 13 the 8.0 forward.
        assert_eq!(lineup.captain, Some(8));
        assert_eq!(lineup.vice_captain, Some(9));
    }

    #[test]
    fn captain_has_max_score_among_starters() {
        let s = squad(
            [4.5, 4.0],
            [3.0, 2.5, 2.0, 1.5, 1.0],
            [7.0, 3.0, 2.0, 1.0, 0.5],
            [6.0, 5.5, -1.0],
        );
        let lineup = select_lineup(&s, FormationRule::TwoForwards);
        let captain = lineup
            .starters
            .iter()
            .find(|p| Some(p.id) == lineup.captain)
            .unwrap();
        assert!(lineup.starters.iter().all(|p| p.score <= captain.score));
        assert!(FormationRule::TwoForwards.accepts(&lineup.formation()));
    }

    #[test]
    fn bench_orders_goalkeeper_first_then_score() {
        let s = squad(
            [5.0, 1.0],
            [4.0, 4.0, 4.0, 0.5, 3.5],
            [6.0, 6.0, 6.0, 6.0, 6.0],
            [7.0, 0.2, 0.1],
        );
        let lineup = select_lineup(&s, FormationRule::OneForward);
        assert_eq!(lineup.bench.len(), 4);
        assert_eq!(lineup.bench[0].position, Position::Goalkeeper);
        let outfield: Vec<f64> = lineup.bench[1..].iter().map(|p| p.score).collect();
        assert!(outfield.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn deterministic_across_calls() {
        let s = squad(
            [2.0, 2.0],
            [2.0, 2.0, 2.0, 2.0, 2.0],
            [2.0, 2.0, 2.0, 2.0, 2.0],
            [2.0, 2.0, 2.0],
        );
        let a = select_lineup(&s, FormationRule::OneForward);
        let b = select_lineup(&s, FormationRule::OneForward);
        assert_eq!(a.starter_ids(), b.starter_ids());
        assert_eq!(a.captain, Some(1));
    }

    #[test]
    fn no_legal_subset_gives_empty_lineup() {
        // Eleven outfielders and no goalkeeper.
        let players: Vec<PlayerCandidate> = (1..=12)
            .map(|id| player(id, Position::Midfielder, 3.0))
            .collect();
        let lineup = select_lineup_from(&players, FormationRule::OneForward);
        assert!(lineup.is_empty());
        assert_eq!(lineup.captain, None);
        assert_eq!(lineup.vice_captain, None);
    }
}
