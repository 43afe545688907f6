use serde::{Deserialize, Serialize};
use std::fmt;

// ── Constants ──────────────────────────────────────────────────────────

pub const MIN_BRACKET_SIZE: usize = 2;
pub const MAX_BRACKET_SIZE: usize = 128;
pub const DEFAULT_ADVANCE_RETRIES: u32 = 5;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:17890";

// ── Identifiers ────────────────────────────────────────────────────────

pub type TeamId = u32;
pub type MatchId = u64;
pub type TournamentId = u32;

pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

// ── Teams and sides ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub players: [String; 2],
}

/// One of the two teams on court. Side A is the team-A field of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => write!(f, "A"),
            Side::B => write!(f, "B"),
        }
    }
}

/// Which of the serving side's two players holds the serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ServerSlot {
    First,
    Second,
}

impl From<ServerSlot> for u8 {
    fn from(slot: ServerSlot) -> u8 {
        match slot {
            ServerSlot::First => 1,
            ServerSlot::Second => 2,
        }
    }
}

impl TryFrom<u8> for ServerSlot {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ServerSlot::First),
            2 => Ok(ServerSlot::Second),
            other => Err(format!("server slot must be 1 or 2, got {other}")),
        }
    }
}

// ── Matches ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStatus {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl MatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Cancelled)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::InProgress => "inProgress",
            MatchStatus::Completed => "completed",
            MatchStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A bracket match record as the store keeps it.
///
/// `round` is 1-based (round 1 is the seeded round) and `slot` is the
/// 0-based position within that round. `version` increases on every write
/// and is the compare-and-set token for [`crate::store::MatchStore::update_match`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: MatchId,
    pub tournament_id: TournamentId,
    pub round: u32,
    pub slot: usize,
    pub team_a: Option<TeamId>,
    pub team_b: Option<TeamId>,
    pub status: MatchStatus,
    pub score_a: Option<u32>,
    pub score_b: Option<u32>,
    pub winner: Option<TeamId>,
    pub version: u64,
    pub updated_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    pub updated_by: Option<String>,
}

impl Match {
    pub fn team(&self, side: Side) -> Option<TeamId> {
        match side {
            Side::A => self.team_a,
            Side::B => self.team_b,
        }
    }

    pub fn side_of(&self, team: TeamId) -> Option<Side> {
        if self.team_a == Some(team) {
            Some(Side::A)
        } else if self.team_b == Some(team) {
            Some(Side::B)
        } else {
            None
        }
    }
}

/// Explicit identity of whoever is driving a write. Passed into every
/// mutating call instead of being read from ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub operator: String,
}

impl Session {
    pub fn new(operator: impl Into<String>) -> Self {
        Session { operator: operator.into() }
    }

    pub fn system() -> Self {
        Session::new("system")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_slot_serializes_as_number() {
        let json = serde_json::to_string(&ServerSlot::Second).unwrap();
        assert_eq!(json, "2");
        let slot: ServerSlot = serde_json::from_str("1").unwrap();
        assert_eq!(slot, ServerSlot::First);
        assert!(serde_json::from_str::<ServerSlot>("3").is_err());
    }

    #[test]
    fn side_other_flips() {
        assert_eq!(Side::A.other(), Side::B);
        assert_eq!(Side::B.other(), Side::A);
    }

    #[test]
    fn terminal_statuses() {
        assert!(MatchStatus::Completed.is_terminal());
        assert!(MatchStatus::Cancelled.is_terminal());
        assert!(!MatchStatus::InProgress.is_terminal());
    }
}
