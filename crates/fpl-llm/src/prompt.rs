// Prompt templates for squad explanations.
//
// The prompt carries every number the explanation needs (scores, prices,
// budget use, captain bonus) so the model discusses the selection instead of
// recomputing it.

use std::fmt::Write;

use fpl_core::lineup::FormationRule;
use fpl_core::optimizer::Optimization;
use fpl_core::player::{PlayerCandidate, Position};

/// Players moved in and out by a transfer-constrained run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferSummary {
    pub transfers_out: Vec<String>,
    pub transfers_in: Vec<String>,
}

/// Everything the explanation prompt describes.
#[derive(Debug, Clone, Copy)]
pub struct ExplanationContext<'a> {
    pub result: &'a Optimization,
    pub budget_tenths: u32,
    pub formation: FormationRule,
    /// How scores were produced ("predictions", "history", "database").
    pub score_source: &'a str,
    pub locked_names: &'a [String],
    pub transfers: Option<&'a TransferSummary>,
}

/// Static system prompt for all explanation calls.
pub fn system_prompt() -> String {
    "You are a Fantasy Premier League assistant explaining an optimizer's squad selection.\n\
     \n\
     Rules: 15-player squad (2 GK, 5 DEF, 5 MID, 3 FWD), at most 3 players per club, \
     a fixed budget, and a starting eleven with exactly one goalkeeper. The captain scores double.\n\
     \n\
     You will receive the selected squad with each player's projected score and price, \
     the starting eleven, the captain and vice-captain, and any locks or transfers.\n\
     \n\
     Explain in a few short paragraphs: where the budget went, why the captain was chosen, \
     which bench players are likely to matter, and any risks (rotation, fixture clusters, \
     heavy reliance on one club). Use the numbers provided and do NOT redo the arithmetic."
        .to_string()
}

fn tenths(value: u32) -> String {
    format!("{}.{}", value / 10, value % 10)
}

fn player_line(out: &mut String, p: &PlayerCandidate, tag: &str) {
    let _ = writeln!(
        out,
        "- {} ({}, {}) price {} score {:.2}{}",
        p.name,
        p.position,
        p.club,
        tenths(p.cost_tenths),
        p.score,
        tag
    );
}

/// Build the user prompt describing one optimizer result.
pub fn build_explanation_prompt(ctx: &ExplanationContext<'_>) -> String {
    let result = ctx.result;
    let squad = &result.squad;
    let lineup = &result.lineup;
    let mut out = String::with_capacity(2048);

    let _ = writeln!(out, "## SELECTION");
    let _ = writeln!(out, "Score source: {}", ctx.score_source);
    let _ = writeln!(out, "Formation rule: {}", ctx.formation);
    let _ = writeln!(
        out,
        "Budget used: {} of {} ({} left)",
        tenths(squad.total_cost_tenths()),
        tenths(ctx.budget_tenths),
        tenths(ctx.budget_tenths.saturating_sub(squad.total_cost_tenths()))
    );
    let _ = writeln!(out, "Squad projected score: {:.2}", squad.total_score());
    let _ = writeln!(
        out,
        "Lineup projected points (captain doubled): {:.2}",
        result.projected_points()
    );

    let _ = writeln!(out, "\n## SQUAD BY POSITION");
    for pos in Position::ALL {
        let _ = writeln!(out, "{pos}:");
        for p in squad.players().iter().filter(|p| p.position == pos) {
            let tag = if Some(p.id) == lineup.captain {
                " [C]"
            } else if Some(p.id) == lineup.vice_captain {
                " [VC]"
            } else if lineup.starters.iter().any(|s| s.id == p.id) {
                " [XI]"
            } else {
                " [bench]"
            };
            player_line(&mut out, p, tag);
        }
    }

    let _ = writeln!(out, "\n## STARTING XI ({})", lineup.formation());
    for p in &lineup.starters {
        let _ = writeln!(out, "- {} ({})", p.name, p.position);
    }

    let _ = writeln!(out, "\n## BENCH (in order)");
    for (i, p) in lineup.bench.iter().enumerate() {
        let _ = writeln!(out, "{}. {} ({}) score {:.2}", i + 1, p.name, p.position, p.score);
    }

    let _ = writeln!(out, "\n## CLUBS");
    for (club, n) in squad.club_counts() {
        let _ = writeln!(out, "- {club}: {n}");
    }

    if !ctx.locked_names.is_empty() {
        let _ = writeln!(out, "\n## LOCKED BY USER");
        for name in ctx.locked_names {
            let _ = writeln!(out, "- {name}");
        }
    }

    if let Some(t) = ctx.transfers {
        let _ = writeln!(out, "\n## TRANSFERS ({})", t.transfers_out.len());
        for (gone, came) in t.transfers_out.iter().zip(&t.transfers_in) {
            let _ = writeln!(out, "- OUT {gone} / IN {came}");
        }
    }

    let _ = writeln!(out, "\nExplain this selection.");
    out
}
