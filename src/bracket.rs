use serde::Serialize;
use std::{
  collections::HashSet,
  sync::{Arc, OnceLock},
};
use tracing::{debug, error, info, warn};

use crate::error::{BracketError, StoreError};
use crate::events::TournamentObserver;
use crate::store::{FinalizeOutcome, MatchStore, MatchUpdate, NewMatch};
use crate::topology::{BracketTopology, SlotTarget};
use crate::types::{
  Match, MatchId, MatchStatus, Session, Side, TeamId, TournamentId, DEFAULT_ADVANCE_RETRIES,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AdvanceOutcome {
  #[serde(rename_all = "camelCase")]
  Advanced {
    target: MatchId,
    side: Side,
    team: TeamId,
    scheduled: bool,
  },
  /// The winner was already in place; nothing was written.
  #[serde(rename_all = "camelCase")]
  AlreadyAdvanced {
    target: MatchId,
    side: Side,
    team: TeamId,
  },
  Champion { team: TeamId },
}

/// Moves match winners through a fixed single-elimination bracket.
///
/// The engine holds no match state of its own: every decision re-reads the
/// store, and every write is a compare-and-set on the target match version,
/// so sibling completions racing into the same next-round match both land.
pub struct BracketEngine {
  tournament_id: TournamentId,
  topology: BracketTopology,
  store: Arc<dyn MatchStore>,
  observer: Arc<dyn TournamentObserver>,
  max_retries: u32,
  champion: OnceLock<TeamId>,
}

impl BracketEngine {
  /// Creates every match of a `size`-position bracket in the store.
  pub fn create(
    tournament_id: TournamentId,
    size: usize,
    store: Arc<dyn MatchStore>,
    observer: Arc<dyn TournamentObserver>,
    session: &Session,
  ) -> Result<Self, BracketError> {
    let topology = BracketTopology::new(size)?;
    for (round, slot) in topology.slots() {
      store.create_match(NewMatch { tournament_id, round, slot }, session)?;
    }
    info!(tournament_id, size, rounds = topology.round_count(), "bracket created");
    Ok(BracketEngine::attach(tournament_id, topology, store, observer))
  }

  /// Wraps a bracket whose matches already exist in the store.
  pub fn attach(
    tournament_id: TournamentId,
    topology: BracketTopology,
    store: Arc<dyn MatchStore>,
    observer: Arc<dyn TournamentObserver>,
  ) -> Self {
    BracketEngine {
      tournament_id,
      topology,
      store,
      observer,
      max_retries: DEFAULT_ADVANCE_RETRIES,
      champion: OnceLock::new(),
    }
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn tournament_id(&self) -> TournamentId {
    self.tournament_id
  }

  pub fn topology(&self) -> &BracketTopology {
    &self.topology
  }

  /// Places the draw into round 1. Position `2i`/`2i + 1` are team A/B of
  /// round-1 slot `i`. A slot with a single team is a bye: it completes at
  /// once and its team advances.
  ///
  /// Slots already holding exactly their drawn pair are left as they are, so
  /// a seeding interrupted by a store failure can be re-run with the same draw.
  pub fn seed(
    &self,
    draw: &[Option<TeamId>],
    session: &Session,
  ) -> Result<Vec<AdvanceOutcome>, BracketError> {
    if draw.len() != self.topology.size() {
      return Err(BracketError::InvalidDraw(format!(
        "expected {} positions, got {}",
        self.topology.size(),
        draw.len()
      )));
    }
    let mut seen = HashSet::new();
    for team in draw.iter().flatten() {
      if !seen.insert(*team) {
        return Err(BracketError::InvalidDraw(format!("team {team} is drawn twice")));
      }
    }

    let round_one = self.store.list_matches(self.tournament_id, 1)?;
    if round_one.len() * 2 != draw.len() {
      return Err(BracketError::InvalidDraw(format!(
        "round 1 has {} matches in the store",
        round_one.len()
      )));
    }
    let pair_for = |record: &Match| (draw[record.slot * 2], draw[record.slot * 2 + 1]);
    for record in &round_one {
      let pair = pair_for(record);
      if pair == (None, None) {
        return Err(BracketError::InvalidDraw(format!("round 1 slot {} has no teams", record.slot)));
      }
      let empty = record.team_a.is_none() && record.team_b.is_none() && record.status == MatchStatus::Pending;
      if !empty && (record.team_a, record.team_b) != pair {
        return Err(BracketError::InvalidDraw(format!(
          "round 1 slot {} is already seeded with a different pair",
          record.slot
        )));
      }
    }

    let mut byes = Vec::new();
    let mut resumed = 0;
    for record in round_one {
      let (team_a, team_b) = pair_for(&record);
      let seeded = if record.status == MatchStatus::Pending && record.team_a.is_none() && record.team_b.is_none() {
        let update = MatchUpdate {
          team_a,
          team_b,
          status: Some(MatchStatus::Scheduled),
          ..MatchUpdate::default()
        };
        let seeded = self.store.update_match(record.id, &update, record.version, session)?;
        for side in [Side::A, Side::B] {
          if let Some(team) = seeded.team(side) {
            self.observer.on_slot_filled(&seeded, side, team);
          }
        }
        seeded
      } else {
        resumed += 1;
        record
      };
      if let (Some(team), None) | (None, Some(team)) = (team_a, team_b) {
        let completed = if seeded.status == MatchStatus::Completed {
          seeded
        } else {
          debug!(match_id = seeded.id, team, "bye");
          match self.store.finalize_match(seeded.id, team, 0, 0, session)? {
            FinalizeOutcome::Finalized(done) => {
              self.observer.on_match_completed(&done);
              done
            }
            FinalizeOutcome::AlreadyFinalized(done) => done,
          }
        };
        byes.push(self.advance(&completed, session)?);
      }
    }
    info!(tournament_id = self.tournament_id, byes = byes.len(), resumed, "bracket seeded");
    Ok(byes)
  }

  /// Writes the winner of `completed` into its next-round slot.
  ///
  /// Re-delivering the same completion is a no-op. Finding a different team
  /// already in the slot is a [`BracketError::SlotConflict`] and is never
  /// overwritten.
  pub fn advance(&self, completed: &Match, session: &Session) -> Result<AdvanceOutcome, BracketError> {
    if completed.tournament_id != self.tournament_id {
      return Err(BracketError::WrongTournament {
        id: completed.id,
        expected: self.tournament_id,
        actual: completed.tournament_id,
      });
    }
    if completed.status != MatchStatus::Completed {
      return Err(BracketError::NotCompleted(completed.id));
    }
    let winner = completed.winner.ok_or(BracketError::MissingWinner(completed.id))?;

    let Some(target) = self.topology.target(completed.round, completed.slot)? else {
      self.record_champion(winner);
      return Ok(AdvanceOutcome::Champion { team: winner });
    };

    let mut attempts = 0;
    loop {
      attempts += 1;
      let next = self.match_at(target.round, target.slot)?;
      match self.try_fill(completed.id, &next, target, winner, session) {
        Err(BracketError::Store(StoreError::VersionConflict { expected, actual, .. }))
          if attempts <= self.max_retries =>
        {
          warn!(
            source_match = completed.id,
            target = next.id,
            attempt = attempts,
            expected,
            actual,
            "version conflict advancing winner, retrying"
          );
        }
        Err(BracketError::Store(StoreError::VersionConflict { .. })) => {
          error!(source_match = completed.id, target = next.id, attempts, "advance retries exhausted");
          return Err(BracketError::RetriesExhausted { target: next.id, attempts });
        }
        result => return result,
      }
    }
  }

  fn try_fill(
    &self,
    source_match: MatchId,
    next: &Match,
    target: SlotTarget,
    winner: TeamId,
    session: &Session,
  ) -> Result<AdvanceOutcome, BracketError> {
    match next.team(target.side) {
      Some(team) if team == winner => {
        return Ok(AdvanceOutcome::AlreadyAdvanced { target: next.id, side: target.side, team });
      }
      Some(existing) => {
        error!(
          source_match,
          target = next.id,
          side = %target.side,
          existing,
          incoming = winner,
          "slot conflict, bracket needs operator attention"
        );
        return Err(BracketError::SlotConflict {
          source_match,
          target: next.id,
          side: target.side,
          existing,
          incoming: winner,
        });
      }
      None => {}
    }
    if next.status.is_terminal() {
      return Err(BracketError::TargetClosed { target: next.id, status: next.status });
    }

    let scheduled = next.status == MatchStatus::Pending && next.team(target.side.other()).is_some();
    let mut update = MatchUpdate::team(target.side, winner);
    if scheduled {
      update = update.with_status(MatchStatus::Scheduled);
    }
    let updated = self.store.update_match(next.id, &update, next.version, session)?;
    self.observer.on_slot_filled(&updated, target.side, winner);
    if scheduled {
      info!(match_id = updated.id, round = updated.round, slot = updated.slot, "match scheduled");
    }
    Ok(AdvanceOutcome::Advanced {
      target: updated.id,
      side: target.side,
      team: winner,
      scheduled,
    })
  }

  fn record_champion(&self, team: TeamId) {
    if self.champion.set(team).is_ok() {
      info!(tournament_id = self.tournament_id, team, "champion");
      self.observer.on_champion_decided(self.tournament_id, team);
    }
  }

  pub fn match_at(&self, round: u32, slot: usize) -> Result<Match, BracketError> {
    self
      .store
      .list_matches(self.tournament_id, round)?
      .into_iter()
      .find(|record| record.slot == slot)
      .ok_or(BracketError::UnknownSlot { round, slot })
  }

  /// True once every match of `round` is completed.
  pub fn is_round_resolved(&self, round: u32) -> Result<bool, BracketError> {
    let expected = self
      .topology
      .matches_in_round(round)
      .ok_or(BracketError::UnknownSlot { round, slot: 0 })?;
    let matches = self.store.list_matches(self.tournament_id, round)?;
    Ok(matches.len() == expected && matches.iter().all(|m| m.status == MatchStatus::Completed))
  }

  /// The winner of the final, defined only once the final is completed.
  pub fn champion(&self) -> Result<Option<TeamId>, BracketError> {
    let last = self.match_at(self.topology.final_round(), 0)?;
    Ok(match last.status {
      MatchStatus::Completed => last.winner,
      _ => None,
    })
  }

  pub fn matches(&self) -> Result<Vec<Match>, BracketError> {
    Ok(self.store.list_tournament(self.tournament_id)?)
  }
}
