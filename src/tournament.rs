//! Wires live scoring sessions to the match store and the bracket.
//!
//! Every scoring call computes the next state first, persists whatever the
//! transition produced (game counts, the final result), and only then keeps
//! the new state. A failed write leaves the scorer where it was so the
//! caller can retry the same action.

use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{info, warn};

use crate::aggregator::{AggregateOutcome, MatchCompleted, SetAggregator};
use crate::bracket::{AdvanceOutcome, BracketEngine};
use crate::error::{BracketError, StoreError, TournamentError};
use crate::events::TournamentObserver;
use crate::score::{ScoreAction, ScoreConfig, ScoreState};
use crate::store::{FinalizeOutcome, MatchStore, MatchUpdate};
use crate::types::{
    now_ms, Match, MatchId, MatchStatus, Session, Team, TeamId, TournamentId,
    DEFAULT_ADVANCE_RETRIES,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TournamentSettings {
    pub id: TournamentId,
    pub name: String,
    pub bracket_size: usize,
    pub score_config: ScoreConfig,
    pub advance_retries: u32,
}

impl TournamentSettings {
    pub fn new(id: TournamentId, name: impl Into<String>, bracket_size: usize) -> Self {
        TournamentSettings {
            id,
            name: name.into(),
            bracket_size,
            score_config: ScoreConfig::default(),
            advance_retries: DEFAULT_ADVANCE_RETRIES,
        }
    }
}

/// Result of one scoring action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdate {
    pub match_id: MatchId,
    pub outcome: AggregateOutcome,
    pub state: ScoreState,
    pub advance: Option<AdvanceOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
    #[serde(flatten)]
    pub record: Match,
    pub round_label: String,
    pub live: Option<ScoreState>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentSnapshot {
    pub id: TournamentId,
    pub name: String,
    pub teams: Vec<Team>,
    pub matches: Vec<MatchView>,
    pub champion: Option<TeamId>,
    pub now_ms: u64,
}

pub struct Tournament {
    id: TournamentId,
    name: String,
    teams: BTreeMap<TeamId, Team>,
    score_config: ScoreConfig,
    store: Arc<dyn MatchStore>,
    observer: Arc<dyn TournamentObserver>,
    bracket: BracketEngine,
    scorers: Mutex<HashMap<MatchId, SetAggregator>>,
}

impl Tournament {
    pub fn create(
        settings: TournamentSettings,
        teams: Vec<Team>,
        store: Arc<dyn MatchStore>,
        observer: Arc<dyn TournamentObserver>,
        session: &Session,
    ) -> Result<Self, TournamentError> {
        let bracket = BracketEngine::create(
            settings.id,
            settings.bracket_size,
            store.clone(),
            observer.clone(),
            session,
        )?
        .with_max_retries(settings.advance_retries);
        Ok(Tournament {
            id: settings.id,
            name: settings.name,
            teams: teams.into_iter().map(|team| (team.id, team)).collect(),
            score_config: settings.score_config,
            store,
            observer,
            bracket,
            scorers: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> TournamentId {
        self.id
    }

    pub fn bracket(&self) -> &BracketEngine {
        &self.bracket
    }

    pub fn team(&self, id: TeamId) -> Option<&Team> {
        self.teams.get(&id)
    }

    fn scorers(&self) -> Result<MutexGuard<'_, HashMap<MatchId, SetAggregator>>, TournamentError> {
        self.scorers.lock().map_err(|_| TournamentError::Poisoned)
    }

    // ── Seeding ────────────────────────────────────────────────────────

    pub fn seed(
        &self,
        draw: &[Option<TeamId>],
        session: &Session,
    ) -> Result<Vec<AdvanceOutcome>, TournamentError> {
        if let Some(unknown) = draw.iter().flatten().find(|id| !self.teams.contains_key(id)) {
            return Err(TournamentError::UnknownTeam(*unknown));
        }
        Ok(self.bracket.seed(draw, session)?)
    }

    // ── Live scoring ───────────────────────────────────────────────────

    /// Starts a scheduled match, or resumes a paused one.
    pub fn start_match(&self, id: MatchId, session: &Session) -> Result<ScoreState, TournamentError> {
        let mut scorers = self.scorers()?;
        let record = self.store.get_match(id)?;
        match record.status {
            MatchStatus::Scheduled => {
                let scorer = SetAggregator::new(self.score_config);
                let (next, _) = scorer.apply(ScoreAction::Start)?;
                self.store.update_match(
                    id,
                    &MatchUpdate::status(MatchStatus::InProgress),
                    record.version,
                    session,
                )?;
                info!(match_id = id, operator = %session.operator, "match started");
                let state = next.state().clone();
                scorers.insert(id, next);
                Ok(state)
            }
            MatchStatus::InProgress => {
                let current = match scorers.get(&id) {
                    Some(scorer) => scorer.clone(),
                    None => {
                        warn!(match_id = id, "no live scorer for match in progress, starting from 0-0");
                        SetAggregator::new(self.score_config)
                    }
                };
                let (next, _) = current.apply(ScoreAction::Start)?;
                let state = next.state().clone();
                scorers.insert(id, next);
                Ok(state)
            }
            status => Err(StoreError::InvalidStatus { id, status }.into()),
        }
    }

    pub fn pause_match(&self, id: MatchId, session: &Session) -> Result<ScoreUpdate, TournamentError> {
        self.score(id, ScoreAction::Pause, session)
    }

    pub fn reset_match(&self, id: MatchId, session: &Session) -> Result<ScoreUpdate, TournamentError> {
        self.score(id, ScoreAction::Reset, session)
    }

    pub fn point(&self, id: MatchId, session: &Session) -> Result<ScoreUpdate, TournamentError> {
        self.score(id, ScoreAction::Point, session)
    }

    pub fn side_out(&self, id: MatchId, session: &Session) -> Result<ScoreUpdate, TournamentError> {
        self.score(id, ScoreAction::SideOut, session)
    }

    fn score(
        &self,
        id: MatchId,
        action: ScoreAction,
        session: &Session,
    ) -> Result<ScoreUpdate, TournamentError> {
        let (outcome, state, completed) = {
            let mut scorers = self.scorers()?;
            let current = scorers.get(&id).ok_or(TournamentError::NoScorer(id))?;
            let (next, outcome) = current.apply(action)?;
            let completed = match outcome {
                AggregateOutcome::Applied if action == ScoreAction::Reset => {
                    let record = self.store.get_match(id)?;
                    if record.score_a.is_some() || record.score_b.is_some() {
                        self.store.update_match(id, &MatchUpdate::scores(0, 0), record.version, session)?;
                    }
                    None
                }
                AggregateOutcome::Applied => None,
                AggregateOutcome::GameWon { .. } => {
                    let record = self.store.get_match(id)?;
                    let state = next.state();
                    self.store.update_match(
                        id,
                        &MatchUpdate::scores(state.games_won_a, state.games_won_b),
                        record.version,
                        session,
                    )?;
                    None
                }
                AggregateOutcome::MatchCompleted { result, .. } => Some(self.complete(id, result, session)?),
            };
            let state = next.state().clone();
            scorers.insert(id, next);
            (outcome, state, completed)
        };

        let advance = match completed {
            Some(record) => Some(self.bracket.advance(&record, session)?),
            None => None,
        };
        Ok(ScoreUpdate { match_id: id, outcome, state, advance })
    }

    fn complete(
        &self,
        id: MatchId,
        result: MatchCompleted,
        session: &Session,
    ) -> Result<Match, TournamentError> {
        let record = self.store.get_match(id)?;
        let winner = record
            .team(result.winner)
            .ok_or(BracketError::MissingWinner(id))?;
        match self
            .store
            .finalize_match(id, winner, result.final_score_a, result.final_score_b, session)?
        {
            FinalizeOutcome::Finalized(done) => {
                self.observer.on_match_completed(&done);
                Ok(done)
            }
            FinalizeOutcome::AlreadyFinalized(done) => Ok(done),
        }
    }

    // ── Administration ─────────────────────────────────────────────────

    /// Awards a scheduled or running match to `winner` without playing it out.
    pub fn walkover(
        &self,
        id: MatchId,
        winner: TeamId,
        session: &Session,
    ) -> Result<AdvanceOutcome, TournamentError> {
        let completed = {
            let mut scorers = self.scorers()?;
            let record = self.store.get_match(id)?;
            let side = record
                .side_of(winner)
                .ok_or(StoreError::InvalidWinner { id, team: winner })?;
            let result = MatchCompleted::walkover(&self.score_config, side);
            let done = self.complete(id, result, session)?;
            scorers.remove(&id);
            info!(match_id = id, winner, operator = %session.operator, "walkover");
            done
        };
        Ok(self.bracket.advance(&completed, session)?)
    }

    /// Cancels a match that has not completed. Nothing downstream is touched.
    pub fn cancel_match(&self, id: MatchId, session: &Session) -> Result<Match, TournamentError> {
        let mut scorers = self.scorers()?;
        let record = self.store.get_match(id)?;
        if record.status.is_terminal() {
            return Err(StoreError::InvalidStatus { id, status: record.status }.into());
        }
        let cancelled = self.store.update_match(
            id,
            &MatchUpdate::status(MatchStatus::Cancelled),
            record.version,
            session,
        )?;
        scorers.remove(&id);
        warn!(match_id = id, operator = %session.operator, "match cancelled");
        Ok(cancelled)
    }

    /// Re-runs advancement for a completed match, e.g. after a store failure.
    pub fn advance_match(&self, id: MatchId, session: &Session) -> Result<AdvanceOutcome, TournamentError> {
        let record = self.store.get_match(id)?;
        Ok(self.bracket.advance(&record, session)?)
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn score_state(&self, id: MatchId) -> Result<ScoreState, TournamentError> {
        let scorers = self.scorers()?;
        scorers
            .get(&id)
            .map(|scorer| scorer.state().clone())
            .ok_or(TournamentError::NoScorer(id))
    }

    pub fn champion(&self) -> Result<Option<&Team>, TournamentError> {
        Ok(self.bracket.champion()?.and_then(|id| self.teams.get(&id)))
    }

    pub fn is_round_resolved(&self, round: u32) -> Result<bool, TournamentError> {
        Ok(self.bracket.is_round_resolved(round)?)
    }

    /// Whole-bracket view. With `since_ms`, only matches written after that
    /// instant are included and the team list is left empty.
    pub fn snapshot(&self, since_ms: Option<u64>) -> Result<TournamentSnapshot, TournamentError> {
        let live = self.scorers()?.clone();
        let topology = self.bracket.topology();
        let since = since_ms.filter(|since| *since > 0);
        let matches = self
            .bracket
            .matches()?
            .into_iter()
            .filter(|record| since.map_or(true, |since| record.updated_at_ms > since))
            .map(|record| MatchView {
                round_label: topology.round_label(record.round),
                live: live.get(&record.id).map(|scorer| scorer.state().clone()),
                record,
            })
            .collect();
        let teams = if since.is_some() {
            Vec::new()
        } else {
            self.teams.values().cloned().collect()
        };
        Ok(TournamentSnapshot {
            id: self.id,
            name: self.name.clone(),
            teams,
            matches,
            champion: self.bracket.champion()?,
            now_ms: now_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventLog, TournamentEvent};
    use crate::score::{MatchFormat, WinningScore};
    use crate::store::InMemoryMatchStore;
    use crate::types::Side;

    fn session() -> Session {
        Session::new("scorer")
    }

    fn team(id: TeamId) -> Team {
        Team {
            id,
            name: format!("Team {id}"),
            players: [format!("P{id}a"), format!("P{id}b")],
        }
    }

    fn four_team(format: MatchFormat) -> (Tournament, Arc<EventLog>) {
        let log = Arc::new(EventLog::new());
        let mut settings = TournamentSettings::new(3, "Spring Open", 4);
        settings.score_config = ScoreConfig {
            format,
            winning_score: WinningScore::Eleven,
            initial_server: Side::A,
        };
        let tournament = Tournament::create(
            settings,
            (1..=4).map(team).collect(),
            Arc::new(InMemoryMatchStore::new()),
            log.clone(),
            &session(),
        )
        .unwrap();
        tournament
            .seed(&[Some(1), Some(4), Some(2), Some(3)], &session())
            .unwrap();
        (tournament, log)
    }

    fn match_id(tournament: &Tournament, round: u32, slot: usize) -> MatchId {
        tournament.bracket().match_at(round, slot).unwrap().id
    }

    /// Hands the serve to `winner` and scores until something other than a plain point happens.
    fn win_game(tournament: &Tournament, id: MatchId, winner: Side) -> ScoreUpdate {
        while tournament.score_state(id).unwrap().serving_side != winner {
            tournament.side_out(id, &session()).unwrap();
        }
        loop {
            let update = tournament.point(id, &session()).unwrap();
            if update.outcome != AggregateOutcome::Applied {
                return update;
            }
        }
    }

    #[test]
    fn completed_match_advances_into_final() {
        let (tournament, log) = four_team(MatchFormat::SingleGame);
        let semi = match_id(&tournament, 1, 0);
        tournament.start_match(semi, &session()).unwrap();

        let update = win_game(&tournament, semi, Side::B);
        let final_id = match_id(&tournament, 2, 0);
        assert_eq!(
            update.advance,
            Some(AdvanceOutcome::Advanced { target: final_id, side: Side::A, team: 4, scheduled: false })
        );

        let record = tournament.bracket().match_at(1, 0).unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!((record.winner, record.score_a, record.score_b), (Some(4), Some(0), Some(11)));
        assert!(log.events().iter().any(|e| matches!(
            e,
            TournamentEvent::MatchCompleted { match_id, winner: Some(4), .. } if *match_id == semi
        )));
        assert!(tournament.point(semi, &session()).is_err());
    }

    #[test]
    fn best_of_three_persists_game_counts() {
        let (tournament, _) = four_team(MatchFormat::BestOfThree);
        let semi = match_id(&tournament, 1, 1);
        tournament.start_match(semi, &session()).unwrap();

        let first = win_game(&tournament, semi, Side::A);
        assert!(matches!(first.outcome, AggregateOutcome::GameWon { .. }));
        let record = tournament.bracket().match_at(1, 1).unwrap();
        assert_eq!((record.score_a, record.score_b), (Some(1), Some(0)));
        assert_eq!(record.status, MatchStatus::InProgress);

        win_game(&tournament, semi, Side::B);
        let last = win_game(&tournament, semi, Side::A);
        assert!(matches!(last.outcome, AggregateOutcome::MatchCompleted { .. }));
        let record = tournament.bracket().match_at(1, 1).unwrap();
        assert_eq!((record.winner, record.score_a, record.score_b), (Some(2), Some(2), Some(1)));
    }

    #[test]
    fn reset_clears_persisted_game_counts() {
        let (tournament, _) = four_team(MatchFormat::BestOfThree);
        let semi = match_id(&tournament, 1, 0);
        tournament.start_match(semi, &session()).unwrap();
        win_game(&tournament, semi, Side::A);

        let update = tournament.reset_match(semi, &session()).unwrap();
        assert_eq!((update.state.games_won_a, update.state.games_won_b), (0, 0));
        let record = tournament.bracket().match_at(1, 0).unwrap();
        assert_eq!((record.score_a, record.score_b), (Some(0), Some(0)));
        assert_eq!(record.status, MatchStatus::InProgress);
    }

    #[test]
    fn champion_after_final() {
        let (tournament, log) = four_team(MatchFormat::SingleGame);
        for slot in 0..2 {
            let id = match_id(&tournament, 1, slot);
            tournament.start_match(id, &session()).unwrap();
            win_game(&tournament, id, Side::A);
        }
        assert!(tournament.is_round_resolved(1).unwrap());
        assert!(tournament.champion().unwrap().is_none());

        let final_id = match_id(&tournament, 2, 0);
        tournament.start_match(final_id, &session()).unwrap();
        let update = win_game(&tournament, final_id, Side::B);
        assert_eq!(update.advance, Some(AdvanceOutcome::Champion { team: 2 }));
        assert_eq!(tournament.champion().unwrap().map(|t| t.id), Some(2));
        assert!(log.events().contains(&TournamentEvent::ChampionDecided { tournament_id: 3, team: 2 }));
    }

    #[test]
    fn scoring_requires_a_started_match() {
        let (tournament, _) = four_team(MatchFormat::SingleGame);
        let semi = match_id(&tournament, 1, 0);
        assert_eq!(tournament.point(semi, &session()), Err(TournamentError::NoScorer(semi)));

        let pending_final = match_id(&tournament, 2, 0);
        assert!(matches!(
            tournament.start_match(pending_final, &session()),
            Err(TournamentError::Store(StoreError::InvalidStatus { status: MatchStatus::Pending, .. }))
        ));
    }

    #[test]
    fn pause_blocks_points_until_resumed() {
        let (tournament, _) = four_team(MatchFormat::SingleGame);
        let semi = match_id(&tournament, 1, 0);
        tournament.start_match(semi, &session()).unwrap();
        tournament.point(semi, &session()).unwrap();
        tournament.pause_match(semi, &session()).unwrap();
        assert!(matches!(tournament.point(semi, &session()), Err(TournamentError::Score(_))));

        let resumed = tournament.start_match(semi, &session()).unwrap();
        assert!(resumed.is_active);
        assert_eq!(resumed.points_a, 1);
    }

    #[test]
    fn walkover_completes_and_advances() {
        let (tournament, _) = four_team(MatchFormat::BestOfThree);
        let semi = match_id(&tournament, 1, 1);
        let outcome = tournament.walkover(semi, 3, &session()).unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Advanced { side: Side::B, team: 3, .. }));
        let record = tournament.bracket().match_at(1, 1).unwrap();
        assert_eq!((record.score_a, record.score_b), (Some(0), Some(2)));
        assert!(matches!(
            tournament.walkover(semi, 1, &session()),
            Err(TournamentError::Store(StoreError::InvalidWinner { .. }))
        ));
    }

    #[test]
    fn cancel_is_terminal_without_reflow() {
        let (tournament, _) = four_team(MatchFormat::SingleGame);
        let semi = match_id(&tournament, 1, 0);
        tournament.start_match(semi, &session()).unwrap();
        let cancelled = tournament.cancel_match(semi, &session()).unwrap();
        assert_eq!(cancelled.status, MatchStatus::Cancelled);
        assert!(tournament.cancel_match(semi, &session()).is_err());
        assert_eq!(tournament.point(semi, &session()), Err(TournamentError::NoScorer(semi)));
        let final_match = tournament.bracket().match_at(2, 0).unwrap();
        assert_eq!((final_match.team_a, final_match.team_b), (None, None));
    }

    #[test]
    fn advance_match_is_safe_to_repeat() {
        let (tournament, _) = four_team(MatchFormat::SingleGame);
        let semi = match_id(&tournament, 1, 0);
        tournament.walkover(semi, 1, &session()).unwrap();
        let again = tournament.advance_match(semi, &session()).unwrap();
        assert!(matches!(again, AdvanceOutcome::AlreadyAdvanced { team: 1, .. }));
    }

    #[test]
    fn unknown_teams_cannot_be_drawn() {
        let tournament = Tournament::create(
            TournamentSettings::new(9, "Open", 2),
            vec![team(1), team(2)],
            Arc::new(InMemoryMatchStore::new()),
            Arc::new(EventLog::new()),
            &session(),
        )
        .unwrap();
        assert_eq!(
            tournament.seed(&[Some(1), Some(5)], &session()),
            Err(TournamentError::UnknownTeam(5))
        );
    }

    #[test]
    fn snapshot_filters_by_update_time() {
        let (tournament, _) = four_team(MatchFormat::SingleGame);
        let full = tournament.snapshot(None).unwrap();
        assert_eq!(full.matches.len(), 3);
        assert_eq!(full.teams.len(), 4);
        assert_eq!(full.matches[2].round_label, "Final");

        let semi = match_id(&tournament, 1, 0);
        tournament.start_match(semi, &session()).unwrap();
        let live = tournament.snapshot(None).unwrap();
        assert!(live.matches.iter().any(|view| view.record.id == semi && view.live.is_some()));

        let later = tournament.snapshot(Some(now_ms() + 60_000)).unwrap();
        assert!(later.matches.is_empty());
        assert!(later.teams.is_empty());
    }
}
