// Player identity, positions, and the canonical candidate record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable player identifier, unique within one optimization call.
pub type PlayerId = u32;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// The four FPL playing roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "GK")]
    Goalkeeper,
    #[serde(rename = "DEF")]
    Defender,
    #[serde(rename = "MID")]
    Midfielder,
    #[serde(rename = "FWD")]
    Forward,
}

impl Position {
    /// All positions in squad display order.
    pub const ALL: [Position; 4] = [
        Position::Goalkeeper,
        Position::Defender,
        Position::Midfielder,
        Position::Forward,
    ];

    /// Map an FPL `element_type` code (1–4) to a position.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Position::Goalkeeper),
            2 => Some(Position::Defender),
            3 => Some(Position::Midfielder),
            4 => Some(Position::Forward),
            _ => None,
        }
    }

    /// Parse a free-text position label.
    ///
    /// Accepts the abbreviations FPL exports use ("GK", "GKP", "DEF", ...),
    /// long forms ("Goalkeeper", "Defender", ...), a few common synonyms
    /// ("Striker", "Keeper") and numeric codes written as text ("1".."4").
    pub fn parse(s: &str) -> Option<Self> {
        let label = s.trim().to_uppercase();
        if let Ok(code) = label.parse::<i64>() {
            return Self::from_code(code);
        }
        match label.as_str() {
            "GK" | "GKP" | "G" | "GOALKEEPER" | "KEEPER" => Some(Position::Goalkeeper),
            "DEF" | "D" | "DEFENDER" => Some(Position::Defender),
            "MID" | "M" | "MIDFIELDER" => Some(Position::Midfielder),
            "FWD" | "F" | "FW" | "FORWARD" | "STRIKER" | "ST" => Some(Position::Forward),
            _ => None,
        }
    }

    /// FPL `element_type` code for this position.
    pub fn code(&self) -> u8 {
        match self {
            Position::Goalkeeper => 1,
            Position::Defender => 2,
            Position::Midfielder => 3,
            Position::Forward => 4,
        }
    }

    /// Dense index into per-position arrays.
    pub fn index(&self) -> usize {
        self.code() as usize - 1
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "GK",
            Position::Defender => "DEF",
            Position::Midfielder => "MID",
            Position::Forward => "FWD",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_str())
    }
}

// ---------------------------------------------------------------------------
// Position counts
// ---------------------------------------------------------------------------

/// Number of players per position, indexed by `Position::index()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionCounts([usize; 4]);

impl PositionCounts {
    pub const fn new(gk: usize, def: usize, mid: usize, fwd: usize) -> Self {
        Self([gk, def, mid, fwd])
    }

    pub fn from_positions<I: IntoIterator<Item = Position>>(positions: I) -> Self {
        let mut counts = Self::default();
        for pos in positions {
            counts.0[pos.index()] += 1;
        }
        counts
    }

    pub fn get(&self, pos: Position) -> usize {
        self.0[pos.index()]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

impl fmt::Display for PositionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} GK / {} DEF / {} MID / {} FWD",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

// ---------------------------------------------------------------------------
// PlayerCandidate
// ---------------------------------------------------------------------------

/// A normalized player ready for optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCandidate {
    pub id: PlayerId,
    pub name: String,
    pub position: Position,
    /// Real-world club identifier (numeric team id or team name).
    pub club: String,
    /// Price in tenths of a currency unit (5.5m -> 55).
    pub cost_tenths: u32,
    pub score: f64,
    /// Set when the player's name matched a lock request.
    #[serde(default)]
    pub locked: bool,
}

impl PlayerCandidate {
    pub fn new(
        id: PlayerId,
        name: impl Into<String>,
        position: Position,
        club: impl Into<String>,
        cost_tenths: u32,
        score: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            position,
            club: club.into(),
            cost_tenths,
            score,
            locked: false,
        }
    }

    /// Key used for deduplication and lock matching.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Case-insensitive, whitespace-trimmed form of a player name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Convert a price in whole currency units to tenths (5.5 -> 55).
///
/// Returns `None` for negative or non-finite prices.
pub fn units_to_tenths(cost: f64) -> Option<u32> {
    if !cost.is_finite() || cost < 0.0 {
        return None;
    }
    let tenths = (cost * 10.0).round();
    if tenths > u32::MAX as f64 {
        return None;
    }
    Some(tenths as u32)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_abbreviations_and_synonyms() {
        assert_eq!(Position::parse("GK"), Some(Position::Goalkeeper));
        assert_eq!(Position::parse("gkp"), Some(Position::Goalkeeper));
        assert_eq!(Position::parse(" Goalkeeper "), Some(Position::Goalkeeper));
        assert_eq!(Position::parse("Defender"), Some(Position::Defender));
        assert_eq!(Position::parse("mid"), Some(Position::Midfielder));
        assert_eq!(Position::parse("Striker"), Some(Position::Forward));
        assert_eq!(Position::parse("FORWARD"), Some(Position::Forward));
    }

    #[test]
    fn parse_numeric_text() {
        assert_eq!(Position::parse("1"), Some(Position::Goalkeeper));
        assert_eq!(Position::parse("4"), Some(Position::Forward));
        assert_eq!(Position::parse("5"), None);
    }

    #[test]
    fn parse_unknown_label() {
        assert_eq!(Position::parse("AM"), None);
        assert_eq!(Position::parse(""), None);
    }

    #[test]
    fn code_round_trips_through_from_code() {
        for pos in Position::ALL {
            assert_eq!(Position::from_code(pos.code() as i64), Some(pos));
        }
        assert_eq!(Position::from_code(0), None);
    }

    #[test]
    fn position_counts_tally() {
        let counts = PositionCounts::from_positions([
            Position::Goalkeeper,
            Position::Defender,
            Position::Defender,
            Position::Forward,
        ]);
        assert_eq!(counts.get(Position::Goalkeeper), 1);
        assert_eq!(counts.get(Position::Defender), 2);
        assert_eq!(counts.get(Position::Midfielder), 0);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.to_string(), "1 GK / 2 DEF / 0 MID / 1 FWD");
    }

    #[test]
    fn units_to_tenths_rounds() {
        assert_eq!(units_to_tenths(5.5), Some(55));
        assert_eq!(units_to_tenths(4.449999), Some(44));
        assert_eq!(units_to_tenths(0.0), Some(0));
        assert_eq!(units_to_tenths(-1.0), None);
        assert_eq!(units_to_tenths(f64::NAN), None);
    }

    #[test]
    fn normalized_name_trims_and_lowercases() {
        let p = PlayerCandidate::new(1, "  Mohamed SALAH ", Position::Midfielder, "LIV", 130, 7.0);
        assert_eq!(p.normalized_name(), "mohamed salah");
    }

    #[test]
    fn position_serializes_as_abbreviation() {
        let json = serde_json::to_string(&Position::Forward).unwrap();
        assert_eq!(json, "\"FWD\"");
    }
}
