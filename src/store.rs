use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use crate::error::StoreError;
use crate::types::{now_ms, Match, MatchId, MatchStatus, Session, Side, TeamId, TournamentId};

// ── Contract ───────────────────────────────────────────────────────────

/// Fields a writer wants to set. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchUpdate {
    pub team_a: Option<TeamId>,
    pub team_b: Option<TeamId>,
    pub status: Option<MatchStatus>,
    pub score_a: Option<u32>,
    pub score_b: Option<u32>,
}

impl MatchUpdate {
    pub fn team(side: Side, team: TeamId) -> Self {
        match side {
            Side::A => MatchUpdate { team_a: Some(team), ..MatchUpdate::default() },
            Side::B => MatchUpdate { team_b: Some(team), ..MatchUpdate::default() },
        }
    }

    pub fn status(status: MatchStatus) -> Self {
        MatchUpdate { status: Some(status), ..MatchUpdate::default() }
    }

    pub fn scores(score_a: u32, score_b: u32) -> Self {
        MatchUpdate { score_a: Some(score_a), score_b: Some(score_b), ..MatchUpdate::default() }
    }

    pub fn with_status(mut self, status: MatchStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn touches_scores(&self) -> bool {
        self.score_a.is_some() || self.score_b.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMatch {
    pub tournament_id: TournamentId,
    pub round: u32,
    pub slot: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Finalized(Match),
    /// The match was already completed with exactly this outcome.
    AlreadyFinalized(Match),
}

impl FinalizeOutcome {
    pub fn into_match(self) -> Match {
        match self {
            FinalizeOutcome::Finalized(record) | FinalizeOutcome::AlreadyFinalized(record) => record,
        }
    }
}

/// Durable match records. Every write is compare-and-set on `Match::version`
/// or, for finalization, on the recorded outcome.
pub trait MatchStore: Send + Sync {
    fn create_match(&self, new: NewMatch, session: &Session) -> Result<Match, StoreError>;

    fn get_match(&self, id: MatchId) -> Result<Match, StoreError>;

    /// Matches of one round ordered by slot.
    fn list_matches(&self, tournament_id: TournamentId, round: u32) -> Result<Vec<Match>, StoreError>;

    /// Every match of a tournament ordered by round, then slot.
    fn list_tournament(&self, tournament_id: TournamentId) -> Result<Vec<Match>, StoreError>;

    fn update_match(
        &self,
        id: MatchId,
        update: &MatchUpdate,
        expected_version: u64,
        session: &Session,
    ) -> Result<Match, StoreError>;

    fn finalize_match(
        &self,
        id: MatchId,
        winner: TeamId,
        score_a: u32,
        score_b: u32,
        session: &Session,
    ) -> Result<FinalizeOutcome, StoreError>;
}

// ── In-memory store ────────────────────────────────────────────────────

#[derive(Default)]
struct StoreInner {
    matches: BTreeMap<MatchId, Match>,
    next_id: MatchId,
}

/// Process-local [`MatchStore`]. One mutex guards all records, so each
/// compare-and-set is atomic with respect to every other write.
#[derive(Default)]
pub struct InMemoryMatchStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        InMemoryMatchStore::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn stamp(record: &mut Match, session: &Session) {
    record.version += 1;
    record.updated_at_ms = now_ms();
    record.updated_by = Some(session.operator.clone());
}

impl MatchStore for InMemoryMatchStore {
    fn create_match(&self, new: NewMatch, session: &Session) -> Result<Match, StoreError> {
        let mut guard = self.lock()?;
        guard.next_id += 1;
        let id = guard.next_id;
        let record = Match {
            id,
            tournament_id: new.tournament_id,
            round: new.round,
            slot: new.slot,
            team_a: None,
            team_b: None,
            status: MatchStatus::Pending,
            score_a: None,
            score_b: None,
            winner: None,
            version: 1,
            updated_at_ms: now_ms(),
            completed_at_ms: None,
            updated_by: Some(session.operator.clone()),
        };
        guard.matches.insert(id, record.clone());
        Ok(record)
    }

    fn get_match(&self, id: MatchId) -> Result<Match, StoreError> {
        let guard = self.lock()?;
        guard.matches.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    fn list_matches(&self, tournament_id: TournamentId, round: u32) -> Result<Vec<Match>, StoreError> {
        let guard = self.lock()?;
        let mut out = guard
            .matches
            .values()
            .filter(|m| m.tournament_id == tournament_id && m.round == round)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by_key(|m| m.slot);
        Ok(out)
    }

    fn list_tournament(&self, tournament_id: TournamentId) -> Result<Vec<Match>, StoreError> {
        let guard = self.lock()?;
        let mut out = guard
            .matches
            .values()
            .filter(|m| m.tournament_id == tournament_id)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by_key(|m| (m.round, m.slot));
        Ok(out)
    }

    fn update_match(
        &self,
        id: MatchId,
        update: &MatchUpdate,
        expected_version: u64,
        session: &Session,
    ) -> Result<Match, StoreError> {
        let mut guard = self.lock()?;
        let record = guard.matches.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if record.version != expected_version {
            return Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
                actual: record.version,
            });
        }
        if record.status == MatchStatus::Completed {
            return Err(StoreError::InvalidStatus { id, status: record.status });
        }
        if update.status == Some(MatchStatus::Completed) {
            return Err(StoreError::InvalidStatus { id, status: MatchStatus::Completed });
        }
        if update.touches_scores() && record.status != MatchStatus::InProgress {
            return Err(StoreError::InvalidStatus { id, status: record.status });
        }

        if let Some(team) = update.team_a {
            record.team_a = Some(team);
        }
        if let Some(team) = update.team_b {
            record.team_b = Some(team);
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(score) = update.score_a {
            record.score_a = Some(score);
        }
        if let Some(score) = update.score_b {
            record.score_b = Some(score);
        }
        stamp(record, session);
        Ok(record.clone())
    }

    fn finalize_match(
        &self,
        id: MatchId,
        winner: TeamId,
        score_a: u32,
        score_b: u32,
        session: &Session,
    ) -> Result<FinalizeOutcome, StoreError> {
        let mut guard = self.lock()?;
        let record = guard.matches.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        match record.status {
            MatchStatus::Completed => {
                let same = record.winner == Some(winner)
                    && record.score_a == Some(score_a)
                    && record.score_b == Some(score_b);
                return if same {
                    Ok(FinalizeOutcome::AlreadyFinalized(record.clone()))
                } else {
                    Err(StoreError::AlreadyCompleted(id))
                };
            }
            MatchStatus::Scheduled | MatchStatus::InProgress => {}
            status => return Err(StoreError::InvalidStatus { id, status }),
        }
        if record.side_of(winner).is_none() {
            return Err(StoreError::InvalidWinner { id, team: winner });
        }
        record.status = MatchStatus::Completed;
        record.winner = Some(winner);
        record.score_a = Some(score_a);
        record.score_b = Some(score_b);
        stamp(record, session);
        record.completed_at_ms = Some(record.updated_at_ms);
        Ok(FinalizeOutcome::Finalized(record.clone()))
    }
}
