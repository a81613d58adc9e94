//! Pairwise compatibility score between two waiting teams.

use std::collections::HashSet;

use crate::state::{Ruleset, Team};

/// Per-side bonus for two teams that never met
const FRESH_OPPONENT_BONUS: f64 = 0.5;

/// Per-side bonus gained for every match played since the last meeting
const RECENCY_STEP: f64 = 0.1;

/// Both teams need this many games before win ratios are compared
const BALANCE_MIN_GAMES: usize = 5;

const BALANCE_WEIGHT: f64 = 0.2;

const SAME_MODE_PENALTY: f64 = 0.01;

/// Score a pairing of `a` and `b` under `ruleset`.
///
/// Returns exactly `0.0` for ineligible pairs. Eligible pairs score up to
/// `1.0`; penalties may push the result below zero, and no clamping is
/// applied here.
pub fn score(a: &Team, b: &Team, ruleset: Ruleset) -> f64 {
    if !is_eligible(a, b) {
        return 0.0;
    }

    let mut total = repetition_bonus(a, &b.name) + repetition_bonus(b, &a.name);

    if a.games_played() >= BALANCE_MIN_GAMES && b.games_played() >= BALANCE_MIN_GAMES {
        total -= BALANCE_WEIGHT * (a.win_ratio() - b.win_ratio()).abs();
    }

    for team in [a, b] {
        if team.last_gamemode == Some(ruleset) {
            total -= SAME_MODE_PENALTY;
        }
    }

    total
}

/// At least one pro, more than one flag, four distinct players
pub fn is_eligible(a: &Team, b: &Team) -> bool {
    let players = [&a.member1, &a.member2, &b.member1, &b.member2];

    if !players.iter().any(|p| p.is_pro) {
        return false;
    }

    let flags: HashSet<&str> = players.iter().map(|p| p.flag.as_str()).collect();
    if flags.len() <= 1 {
        return false;
    }

    let ids: HashSet<&str> = players.iter().map(|p| p.discord_id.as_str()).collect();
    ids.len() == players.len()
}

/// Anti-repetition bonus of one side: full for a new opponent, growing with
/// the number of matches `team` played since it last met `opponent`.
pub fn repetition_bonus(team: &Team, opponent: &str) -> f64 {
    match team.rank_since_last_meeting(opponent) {
        None => FRESH_OPPONENT_BONUS,
        Some(rank) => (RECENCY_STEP * (rank + 1) as f64).min(FRESH_OPPONENT_BONUS),
    }
}
