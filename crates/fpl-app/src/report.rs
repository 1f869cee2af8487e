// Maps an optimizer result onto display fields and renders it.

use std::collections::BTreeMap;
use std::fmt::Write;

use fpl_core::optimizer::Optimization;
use fpl_core::player::{PlayerCandidate, PlayerId, Position};
use fpl_data::PlayerDetails;
use fpl_llm::TransferSummary;
use serde::Serialize;

/// One squad member with the fields downstream tools expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerLine {
    pub id: PlayerId,
    pub first_name: Option<String>,
    pub second_name: Option<String>,
    pub web_name: String,
    pub club: String,
    /// Numeric position code, 1 = GK through 4 = FWD.
    pub position: u8,
    /// Price in tenths.
    pub now_cost: u32,
    pub score: f64,
    pub starter: bool,
    pub captain: bool,
    pub vice_captain: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferLine {
    pub out: Vec<String>,
    #[serde(rename = "in")]
    pub incoming: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SquadReport {
    pub source: String,
    pub formation: String,
    pub squad: Vec<PlayerLine>,
    pub xi_ids: Vec<PlayerId>,
    pub bench_ids: Vec<PlayerId>,
    pub captain_id: Option<PlayerId>,
    pub vice_captain_id: Option<PlayerId>,
    /// Squad price in tenths.
    pub total_cost: u32,
    pub squad_score: f64,
    /// Lineup score with the captain counted twice.
    pub projected_points: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfers: Option<TransferLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
}

fn player_line(p: &PlayerCandidate, details: Option<&PlayerDetails>, result: &Optimization) -> PlayerLine {
    let lineup = &result.lineup;
    PlayerLine {
        id: p.id,
        first_name: details.and_then(|d| d.first_name.clone()),
        second_name: details.and_then(|d| d.second_name.clone()),
        web_name: details
            .map(|d| d.web_name.clone())
            .unwrap_or_else(|| p.name.clone()),
        club: details
            .map(|d| d.club.clone())
            .unwrap_or_else(|| p.club.clone()),
        position: p.position.code(),
        now_cost: p.cost_tenths,
        score: p.score,
        starter: lineup.starters.iter().any(|s| s.id == p.id),
        captain: lineup.captain == Some(p.id),
        vice_captain: lineup.vice_captain == Some(p.id),
    }
}

pub fn build_report(
    result: &Optimization,
    details: &BTreeMap<PlayerId, PlayerDetails>,
    source: &str,
    formation: &str,
) -> SquadReport {
    SquadReport {
        source: source.to_string(),
        formation: formation.to_string(),
        squad: result
            .squad
            .players()
            .iter()
            .map(|p| player_line(p, details.get(&p.id), result))
            .collect(),
        xi_ids: result.xi_ids(),
        bench_ids: result.lineup.bench_ids(),
        captain_id: result.captain_id(),
        vice_captain_id: result.vice_captain_id(),
        total_cost: result.squad.total_cost_tenths(),
        squad_score: result.squad.total_score(),
        projected_points: result.projected_points(),
        transfers: None,
        run_id: None,
    }
}

impl SquadReport {
    pub fn with_transfers(mut self, summary: Option<&TransferSummary>) -> Self {
        self.transfers = summary.map(|t| TransferLine {
            out: t.transfers_out.clone(),
            incoming: t.transfers_in.clone(),
        });
        self
    }

    fn name_of(&self, id: Option<PlayerId>) -> &str {
        id.and_then(|id| self.squad.iter().find(|p| p.id == id))
            .map(|p| p.web_name.as_str())
            .unwrap_or("-")
    }
}

pub fn render_json(report: &SquadReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

fn price(tenths: u32) -> String {
    format!("{}.{}", tenths / 10, tenths % 10)
}

pub fn render_text(report: &SquadReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Squad ({} scores, {} lineup)",
        report.source, report.formation
    );
    let _ = writeln!(
        out,
        "{:<4} {:>5}  {:<22} {:<6} {:>6} {:>7}",
        "Pos", "Id", "Name", "Club", "Price", "Score"
    );
    for p in &report.squad {
        let tag = if p.captain {
            "C"
        } else if p.vice_captain {
            "VC"
        } else if p.starter {
            "*"
        } else {
            ""
        };
        let pos = Position::from_code(p.position as i64)
            .map(|pos| pos.display_str())
            .unwrap_or("?");
        let _ = writeln!(
            out,
            "{:<4} {:>5}  {:<22} {:<6} {:>6} {:>7.2} {}",
            pos,
            p.id,
            p.web_name,
            p.club,
            price(p.now_cost),
            p.score,
            tag
        );
    }

    let bench: Vec<String> = report
        .bench_ids
        .iter()
        .map(|id| report.name_of(Some(*id)).to_string())
        .collect();
    let _ = writeln!(out);
    let _ = writeln!(out, "Captain: {}", report.name_of(report.captain_id));
    let _ = writeln!(out, "Vice-captain: {}", report.name_of(report.vice_captain_id));
    let _ = writeln!(out, "Bench: {}", bench.join(", "));
    let _ = writeln!(out, "Total cost: {}", price(report.total_cost));
    let _ = writeln!(out, "Projected points: {:.2}", report.projected_points);

    if let Some(t) = &report.transfers {
        let _ = writeln!(out, "Transfers: {}", t.out.len());
        for (gone, came) in t.out.iter().zip(&t.incoming) {
            let _ = writeln!(out, "  {gone} -> {came}");
        }
    }
    if let Some(id) = report.run_id {
        let _ = writeln!(out, "Saved as run #{id}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpl_core::optimizer::{optimize_candidates, OptimizeRequest};

    fn result() -> Optimization {
        let mut pool = Vec::new();
        let mut id = 1;
        for (pos, n) in Position::ALL.into_iter().zip([3, 6, 6, 4]) {
            for k in 0..n {
                pool.push(PlayerCandidate::new(
                    id,
                    format!("P{id}"),
                    pos,
                    format!("{}", id % 7),
                    45 + k as u32 * 5,
                    2.0 + k as f64,
                ));
                id += 1;
            }
        }
        optimize_candidates(&pool, &OptimizeRequest::default()).unwrap()
    }

    #[test]
    fn report_maps_display_fields() {
        let r = result();
        let first = r.squad.players()[0].clone();
        let mut details = BTreeMap::new();
        details.insert(
            first.id,
            PlayerDetails {
                id: first.id,
                first_name: Some("David".into()),
                second_name: Some("Raya".into()),
                web_name: "Raya".into(),
                club: "ARS".into(),
            },
        );

        let report = build_report(&r, &details, "predictions", "one-forward");
        assert_eq!(report.squad.len(), 15);
        assert_eq!(report.xi_ids.len(), 11);
        assert_eq!(report.bench_ids.len(), 4);

        let line = &report.squad[0];
        assert_eq!(line.web_name, "Raya");
        assert_eq!(line.club, "ARS");
        assert_eq!(line.position, 1);
        assert_eq!(line.first_name.as_deref(), Some("David"));

        // Without details the candidate's own name and club are used.
        let other = &report.squad[1];
        assert_eq!(other.web_name, r.squad.players()[1].name);
        assert!(other.first_name.is_none());

        assert_eq!(report.squad.iter().filter(|p| p.captain).count(), 1);
        assert_eq!(report.squad.iter().filter(|p| p.starter).count(), 11);
        assert_eq!(report.total_cost, r.squad.total_cost_tenths());
    }

    #[test]
    fn json_has_expected_keys() {
        let r = result();
        let report = build_report(&r, &BTreeMap::new(), "history", "two-forwards");
        let v: serde_json::Value = serde_json::from_str(&render_json(&report).unwrap()).unwrap();
        for key in ["squad", "xi_ids", "captain_id", "vice_captain_id", "total_cost", "projected_points"] {
            assert!(v.get(key).is_some(), "missing {key}");
        }
        assert!(v.get("transfers").is_none());
        assert_eq!(v["squad"][0]["position"], 1);
        assert!(v["squad"][0].get("now_cost").is_some());
    }

    #[test]
    fn text_lists_captain_and_transfers() {
        let r = result();
        let summary = TransferSummary {
            transfers_out: vec!["Old".into()],
            transfers_in: vec!["New".into()],
        };
        let mut report = build_report(&r, &BTreeMap::new(), "predictions", "one-forward")
            .with_transfers(Some(&summary));
        report.run_id = Some(7);
        let text = render_text(&report);
        let captain = r.captain_id().unwrap();
        assert!(text.contains(&format!("Captain: P{captain}")));
        assert!(text.contains("Transfers: 1\n  Old -> New"));
        assert!(text.contains("Saved as run #7"));
        assert_eq!(text.lines().filter(|l| l.ends_with(" C")).count(), 1);
    }

    #[test]
    fn price_formats_tenths() {
        assert_eq!(price(55), "5.5");
        assert_eq!(price(1000), "100.0");
    }
}
