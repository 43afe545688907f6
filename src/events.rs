use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::types::{now_ms, Match, MatchId, MatchStatus, Side, TeamId, TournamentId};

/// Outward notifications. Every hook defaults to a no-op so observers
/// only implement what they consume.
pub trait TournamentObserver: Send + Sync {
    fn on_match_completed(&self, _record: &Match) {}

    fn on_slot_filled(&self, _record: &Match, _side: Side, _team: TeamId) {}

    fn on_champion_decided(&self, _tournament_id: TournamentId, _team: TeamId) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TournamentEvent {
    #[serde(rename_all = "camelCase")]
    MatchCompleted {
        match_id: MatchId,
        round: u32,
        slot: usize,
        winner: Option<TeamId>,
        score_a: Option<u32>,
        score_b: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    SlotFilled {
        match_id: MatchId,
        side: Side,
        team: TeamId,
        status: MatchStatus,
    },
    #[serde(rename_all = "camelCase")]
    ChampionDecided {
        tournament_id: TournamentId,
        team: TeamId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedEvent {
    pub seq: u64,
    pub at_ms: u64,
    pub event: TournamentEvent,
}

/// Sequenced record of every notification, for clients that poll.
#[derive(Default)]
pub struct EventLog {
    entries: Mutex<Vec<LoggedEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        EventLog::default()
    }

    fn record(&self, event: TournamentEvent) {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let seq = guard.len() as u64 + 1;
        guard.push(LoggedEvent { seq, at_ms: now_ms(), event });
    }

    /// Events with a sequence number greater than `after`.
    pub fn since(&self, after: u64) -> Vec<LoggedEvent> {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().filter(|entry| entry.seq > after).cloned().collect()
    }

    pub fn events(&self) -> Vec<TournamentEvent> {
        self.since(0).into_iter().map(|entry| entry.event).collect()
    }
}

impl TournamentObserver for EventLog {
    fn on_match_completed(&self, record: &Match) {
        self.record(TournamentEvent::MatchCompleted {
            match_id: record.id,
            round: record.round,
            slot: record.slot,
            winner: record.winner,
            score_a: record.score_a,
            score_b: record.score_b,
        });
    }

    fn on_slot_filled(&self, record: &Match, side: Side, team: TeamId) {
        self.record(TournamentEvent::SlotFilled {
            match_id: record.id,
            side,
            team,
            status: record.status,
        });
    }

    fn on_champion_decided(&self, tournament_id: TournamentId, team: TeamId) {
        self.record(TournamentEvent::ChampionDecided { tournament_id, team });
    }
}

pub struct TracingObserver;

impl TournamentObserver for TracingObserver {
    fn on_match_completed(&self, record: &Match) {
        info!(
            match_id = record.id,
            round = record.round,
            slot = record.slot,
            winner = ?record.winner,
            "match completed"
        );
    }

    fn on_slot_filled(&self, record: &Match, side: Side, team: TeamId) {
        info!(match_id = record.id, side = %side, team, status = %record.status, "slot filled");
    }

    fn on_champion_decided(&self, tournament_id: TournamentId, team: TeamId) {
        info!(tournament_id, team, "champion decided");
    }
}

/// Fans every notification out to each registered observer in order.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn TournamentObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        ObserverSet::default()
    }

    pub fn with(mut self, observer: Arc<dyn TournamentObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl TournamentObserver for ObserverSet {
    fn on_match_completed(&self, record: &Match) {
        for observer in &self.observers {
            observer.on_match_completed(record);
        }
    }

    fn on_slot_filled(&self, record: &Match, side: Side, team: TeamId) {
        for observer in &self.observers {
            observer.on_slot_filled(record, side, team);
        }
    }

    fn on_champion_decided(&self, tournament_id: TournamentId, team: TeamId) {
        for observer in &self.observers {
            observer.on_champion_decided(tournament_id, team);
        }
    }
}
