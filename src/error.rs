use thiserror::Error;

use crate::types::{MatchId, MatchStatus, Side, TeamId, TournamentId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScoreError {
    #[error("{action}: {reason}")]
    InvalidTransition {
        action: &'static str,
        reason: &'static str,
    },
}

impl ScoreError {
    pub(crate) fn invalid(action: &'static str, reason: &'static str) -> Self {
        ScoreError::InvalidTransition { action, reason }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("match {0} not found")]
    NotFound(MatchId),
    #[error("match {id}: expected version {expected}, found {actual}")]
    VersionConflict {
        id: MatchId,
        expected: u64,
        actual: u64,
    },
    #[error("match {0} is already completed with a different outcome")]
    AlreadyCompleted(MatchId),
    #[error("match {id} is {status}")]
    InvalidStatus { id: MatchId, status: MatchStatus },
    #[error("team {team} is not playing in match {id}")]
    InvalidWinner { id: MatchId, team: TeamId },
    #[error("match store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BracketError {
    #[error("match {0} is not completed")]
    NotCompleted(MatchId),
    #[error("match {0} has no winner")]
    MissingWinner(MatchId),
    #[error(
        "slot conflict: match {target} side {side} already holds team {existing}, refusing team {incoming} from match {source_match}"
    )]
    SlotConflict {
        source_match: MatchId,
        target: MatchId,
        side: Side,
        existing: TeamId,
        incoming: TeamId,
    },
    #[error("round {round} has no slot {slot}")]
    UnknownSlot { round: u32, slot: usize },
    #[error("match {target} is {status} and cannot take a team")]
    TargetClosed { target: MatchId, status: MatchStatus },
    #[error("advancing into match {target} still conflicted after {attempts} attempts")]
    RetriesExhausted { target: MatchId, attempts: u32 },
    #[error("bracket size {0} must be a power of two between 2 and 128")]
    InvalidSize(usize),
    #[error("invalid draw: {0}")]
    InvalidDraw(String),
    #[error("match {id} belongs to tournament {actual}, not {expected}")]
    WrongTournament {
        id: MatchId,
        expected: TournamentId,
        actual: TournamentId,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TournamentError {
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bracket(#[from] BracketError),
    #[error("team {0} is not registered")]
    UnknownTeam(TeamId),
    #[error("match {0} has no live scorer; start it first")]
    NoScorer(MatchId),
    #[error("scorer lock poisoned")]
    Poisoned,
}
