//! Candidate ranking and the wait-for-a-better-match commitment policy.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::scorer;
use crate::config::MatchmakingSettings;
use crate::state::{PendingTeams, Registry, Ruleset};

/// A scored pairing of two queued teams
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub team_a: String,
    pub team_b: String,
    pub ruleset: Ruleset,
    pub score: f64,
}

impl Candidate {
    pub fn involves(&self, team: &str) -> bool {
        self.team_a == team || self.team_b == team
    }
}

/// A queued team and every ruleset both of its players opted into
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTeam {
    pub name: String,
    pub accepts: Vec<Ruleset>,
}

impl QueuedTeam {
    pub fn new(name: impl Into<String>, accepts: Vec<Ruleset>) -> Self {
        Self {
            name: name.into(),
            accepts,
        }
    }
}

/// First ruleset (NM before NMPZ) accepted by both teams
fn shared_ruleset(a: &QueuedTeam, b: &QueuedTeam) -> Option<Ruleset> {
    Ruleset::ALL
        .into_iter()
        .find(|r| a.accepts.contains(r) && b.accepts.contains(r))
}

/// Score every unordered pair of queued teams under the ruleset they share.
///
/// Pairs are generated in queue order and stably sorted by descending score,
/// so ties go to the pair discovered first (the earliest-queued team).
/// Pairs without a common ruleset, scoring `<= 0` or naming a team unknown
/// to the registry are dropped.
pub fn find_candidates(queued: &[QueuedTeam], registry: &Registry) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for (i, entry_a) in queued.iter().enumerate() {
        let Some(team_a) = registry.team(&entry_a.name) else {
            continue;
        };
        for entry_b in &queued[i + 1..] {
            let Some(ruleset) = shared_ruleset(entry_a, entry_b) else {
                continue;
            };
            let Some(team_b) = registry.team(&entry_b.name) else {
                continue;
            };
            let score = scorer::score(team_a, team_b, ruleset);
            if score > 0.0 {
                candidates.push(Candidate {
                    team_a: entry_a.name.clone(),
                    team_b: entry_b.name.clone(),
                    ruleset,
                    score,
                });
            }
        }
    }
    sort_candidates(&mut candidates);
    candidates
}

/// Candidates across both queues. A team sits in one queue only, but is
/// paired under any ruleset listed in `accepted` (its own queue otherwise).
pub fn all_candidates(
    pending: &PendingTeams,
    accepted: &HashMap<String, Vec<Ruleset>>,
    registry: &Registry,
) -> Vec<Candidate> {
    let queued: Vec<QueuedTeam> = Ruleset::ALL
        .into_iter()
        .flat_map(|r| {
            pending.queue(r).iter().map(move |name| {
                let accepts = accepted
                    .get(name)
                    .filter(|rulesets| rulesets.contains(&r))
                    .cloned()
                    .unwrap_or_else(|| vec![r]);
                QueuedTeam::new(name.clone(), accepts)
            })
        })
        .collect();
    find_candidates(&queued, registry)
}

fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|x, y| y.score.total_cmp(&x.score));
}

/// Maps a candidate score to how long to wait before committing it
#[derive(Debug, Clone, PartialEq)]
pub struct CountdownPolicy {
    pub wait_scale: Duration,
    pub max_wait: Duration,
    pub immediate_below: Duration,
}

impl CountdownPolicy {
    pub fn from_settings(settings: &MatchmakingSettings) -> Self {
        Self {
            wait_scale: settings.wait_scale,
            max_wait: settings.max_wait,
            immediate_below: settings.immediate_below,
        }
    }

    /// `min((1 - score) * scale, max_wait)`, or zero when below the immediate threshold
    pub fn countdown(&self, score: f64) -> Duration {
        let missing = (1.0 - score).max(0.0);
        let secs = (self.wait_scale.as_secs_f64() * missing).min(self.max_wait.as_secs_f64());
        let wait = Duration::from_secs_f64(secs);
        if wait < self.immediate_below {
            Duration::ZERO
        } else {
            wait
        }
    }
}

impl Default for CountdownPolicy {
    fn default() -> Self {
        Self::from_settings(&MatchmakingSettings::default())
    }
}

/// Where the selector stands after its last evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorState {
    /// Evaluating candidates
    Seeking,
    /// Best candidate waiting for its countdown to elapse
    Committed { candidate: Candidate, deadline: Instant },
    /// Last commitment produced a match
    Opened { candidate: Candidate },
    /// Nothing left to pair
    Aborted,
}

/// What the scheduler should do after an evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorAction {
    /// Open this match now
    Commit(Candidate),
    /// Wake up at this instant unless a new team arrives first
    Wait(Instant),
    /// No eligible pair
    Idle,
}

#[derive(Debug)]
pub struct Selector {
    policy: CountdownPolicy,
    state: SelectorState,
}

impl Selector {
    pub fn new(policy: CountdownPolicy) -> Self {
        Self {
            policy,
            state: SelectorState::Seeking,
        }
    }

    pub fn state(&self) -> &SelectorState {
        &self.state
    }

    /// Restart from scratch with freshly computed candidates. Any running
    /// countdown is dropped.
    pub fn evaluate(&mut self, candidates: Vec<Candidate>, now: Instant) -> SelectorAction {
        self.state = SelectorState::Seeking;

        let Some(best) = candidates.into_iter().find(|c| c.score > 0.0) else {
            self.state = SelectorState::Aborted;
            return SelectorAction::Idle;
        };

        let wait = self.policy.countdown(best.score);
        if wait.is_zero() {
            self.state = SelectorState::Opened {
                candidate: best.clone(),
            };
            return SelectorAction::Commit(best);
        }

        let deadline = now + wait;
        self.state = SelectorState::Committed {
            candidate: best,
            deadline,
        };
        SelectorAction::Wait(deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            SelectorState::Committed { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    /// Hand out the waiting candidate once its countdown has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<Candidate> {
        match &self.state {
            SelectorState::Committed {
                candidate,
                deadline,
            } if now >= *deadline => {
                let candidate = candidate.clone();
                self.state = SelectorState::Opened {
                    candidate: candidate.clone(),
                };
                Some(candidate)
            }
            _ => None,
        }
    }

    /// Drop the countdown if it concerns `team`. Returns whether it did.
    pub fn cancel_if_involves(&mut self, team: &str) -> bool {
        match &self.state {
            SelectorState::Committed { candidate, .. } if candidate.involves(team) => {
                self.state = SelectorState::Seeking;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::scorer::tests::team;

    fn registry_with(teams: Vec<crate::state::Team>) -> Registry {
        let mut registry = Registry::new();
        for t in teams {
            registry.teams.insert(t.name.clone(), t);
        }
        registry
    }

    fn in_queue(names: &[&str], ruleset: Ruleset) -> Vec<QueuedTeam> {
        names
            .iter()
            .map(|name| QueuedTeam::new(*name, vec![ruleset]))
            .collect()
    }

    fn candidate(a: &str, b: &str, score: f64) -> Candidate {
        Candidate {
            team_a: a.into(),
            team_b: b.into(),
            ruleset: Ruleset::Nm,
            score,
        }
    }

    #[test]
    fn test_find_candidates_sorted_and_filtered() {
        let a = team((1, "fr", true), (2, "fr", false));
        let mut b = team((3, "de", false), (4, "de", false));
        let c = team((5, "fr", false), (6, "fr", false));
        b.previous_opponents = vec![a.name.clone()];
        let registry = registry_with(vec![a, b, c]);

        let queued = in_queue(&["1_2", "3_4", "5_6"], Ruleset::Nm);
        let candidates = find_candidates(&queued, &registry);

        // 3_4 vs 5_6 has no pro, 1_2 vs 5_6 a single flag
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].team_a, "1_2");
        assert_eq!(candidates[0].team_b, "3_4");
        assert!((candidates[0].score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_ties_keep_queue_order() {
        let a = team((1, "fr", true), (2, "de", false));
        let b = team((3, "be", false), (4, "ch", false));
        let c = team((5, "it", false), (6, "es", false));
        let registry = registry_with(vec![a, b, c]);

        let queued = in_queue(&["1_2", "3_4", "5_6"], Ruleset::Nm);
        let candidates = find_candidates(&queued, &registry);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].team_b, "3_4");
        assert_eq!(candidates[1].team_b, "5_6");
    }

    #[test]
    fn test_unknown_teams_are_skipped() {
        let registry = Registry::new();
        let queued = in_queue(&["1_2", "3_4"], Ruleset::Nm);
        assert!(find_candidates(&queued, &registry).is_empty());
    }

    #[test]
    fn test_all_candidates_merges_rulesets() {
        let a = team((1, "fr", true), (2, "de", false));
        let b = team((3, "be", false), (4, "ch", false));
        let mut c = team((5, "it", true), (6, "es", false));
        let d = team((7, "pl", false), (8, "pt", false));
        c.last_gamemode = Some(Ruleset::Nmpz);
        let registry = registry_with(vec![a, b, c, d]);

        let pending = PendingTeams {
            nm: vec!["1_2".into(), "3_4".into()],
            nmpz: vec!["5_6".into(), "7_8".into()],
        };
        let candidates = all_candidates(&pending, &HashMap::new(), &registry);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].ruleset, Ruleset::Nm);
        assert_eq!(candidates[1].ruleset, Ruleset::Nmpz);
        assert!(candidates[1].score < candidates[0].score);
    }

    #[test]
    fn test_dual_role_team_pairs_across_queues() {
        let a = team((1, "fr", true), (2, "de", false));
        let b = team((3, "be", false), (4, "ch", false));
        let registry = registry_with(vec![a, b]);

        let pending = PendingTeams {
            nm: vec!["1_2".into()],
            nmpz: vec!["3_4".into()],
        };
        let mut accepted = HashMap::new();
        accepted.insert("1_2".to_string(), vec![Ruleset::Nm, Ruleset::Nmpz]);
        accepted.insert("3_4".to_string(), vec![Ruleset::Nmpz]);

        let candidates = all_candidates(&pending, &accepted, &registry);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].team_a, "1_2");
        assert_eq!(candidates[0].team_b, "3_4");
        assert_eq!(candidates[0].ruleset, Ruleset::Nmpz);
        assert!((candidates[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shared_ruleset_prefers_nm() {
        let a = team((1, "fr", true), (2, "de", false));
        let b = team((3, "be", false), (4, "ch", false));
        let registry = registry_with(vec![a, b]);

        let both = vec![Ruleset::Nm, Ruleset::Nmpz];
        let queued = vec![
            QueuedTeam::new("1_2", both.clone()),
            QueuedTeam::new("3_4", both),
        ];
        let candidates = find_candidates(&queued, &registry);
        assert_eq!(candidates[0].ruleset, Ruleset::Nm);
    }

    #[test]
    fn test_countdown_decreasing_and_bounded() {
        let policy = CountdownPolicy::default();
        assert!(policy.countdown(0.95) < policy.countdown(0.10));
        assert_eq!(policy.countdown(1.0), Duration::ZERO);
        assert_eq!(policy.countdown(0.97), Duration::ZERO);
        assert_eq!(policy.countdown(0.10), Duration::from_secs(60));
        assert_eq!(policy.countdown(-3.0), Duration::from_secs(60));

        let mut last = Duration::MAX;
        for step in 0..=100 {
            let wait = policy.countdown(step as f64 / 100.0);
            assert!(wait <= policy.max_wait);
            assert!(wait <= last);
            last = wait;
        }
    }

    #[test]
    fn test_perfect_score_commits_immediately() {
        let mut selector = Selector::new(CountdownPolicy::default());
        let now = Instant::now();
        let best = candidate("100_200", "300_400", 1.0);
        assert_eq!(
            selector.evaluate(vec![best.clone()], now),
            SelectorAction::Commit(best)
        );
        assert!(matches!(selector.state(), SelectorState::Opened { .. }));
        assert_eq!(selector.deadline(), None);
    }

    #[test]
    fn test_marginal_score_waits_then_commits() {
        let mut selector = Selector::new(CountdownPolicy::default());
        let now = Instant::now();
        let action = selector.evaluate(vec![candidate("1_2", "3_4", 0.5)], now);
        assert_eq!(action, SelectorAction::Wait(now + Duration::from_secs(50)));

        assert_eq!(selector.poll(now + Duration::from_secs(49)), None);
        let committed = selector.poll(now + Duration::from_secs(50)).unwrap();
        assert_eq!(committed.team_a, "1_2");
        assert_eq!(selector.poll(now + Duration::from_secs(51)), None);
    }

    #[test]
    fn test_empty_candidates_abort() {
        let mut selector = Selector::new(CountdownPolicy::default());
        let now = Instant::now();
        selector.evaluate(vec![candidate("1_2", "3_4", 0.5)], now);
        assert_eq!(selector.evaluate(vec![], now), SelectorAction::Idle);
        assert_eq!(selector.state(), &SelectorState::Aborted);
        assert_eq!(selector.poll(now + Duration::from_secs(600)), None);
    }

    #[test]
    fn test_never_commits_non_positive() {
        let mut selector = Selector::new(CountdownPolicy::default());
        let now = Instant::now();
        let action = selector.evaluate(
            vec![candidate("1_2", "3_4", 0.0), candidate("5_6", "7_8", -0.1)],
            now,
        );
        assert_eq!(action, SelectorAction::Idle);
    }

    #[test]
    fn test_cancel_if_involves() {
        let mut selector = Selector::new(CountdownPolicy::default());
        let now = Instant::now();
        selector.evaluate(vec![candidate("1_2", "3_4", 0.5)], now);
        assert!(!selector.cancel_if_involves("5_6"));
        assert!(selector.cancel_if_involves("3_4"));
        assert_eq!(selector.deadline(), None);
    }
}
