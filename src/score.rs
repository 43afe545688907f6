//! Live point-by-point scoring for one doubles game.
//!
//! Only the serving side can score. Losing a rally is a side-out: the serve
//! passes to the partner (server 2) or, after the second server, to the other
//! side. When side A opens a game it gets a single server for that opening
//! turn. Games after the first always open with side A, server 1; the
//! configured initial server only picks who opens a fresh or reset match.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScoreError;
use crate::types::{ServerSlot, Side};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum WinningScore {
    #[default]
    Eleven,
    Fifteen,
    TwentyOne,
}

impl WinningScore {
    pub fn points(self) -> u32 {
        match self {
            WinningScore::Eleven => 11,
            WinningScore::Fifteen => 15,
            WinningScore::TwentyOne => 21,
        }
    }
}

impl From<WinningScore> for u32 {
    fn from(score: WinningScore) -> u32 {
        score.points()
    }
}

impl TryFrom<u32> for WinningScore {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            11 => Ok(WinningScore::Eleven),
            15 => Ok(WinningScore::Fifteen),
            21 => Ok(WinningScore::TwentyOne),
            other => Err(format!("winning score must be 11, 15 or 21, got {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchFormat {
    #[default]
    SingleGame,
    BestOfThree,
}

impl MatchFormat {
    pub fn games_to_win(self) -> u32 {
        match self {
            MatchFormat::SingleGame => 1,
            MatchFormat::BestOfThree => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreConfig {
    pub format: MatchFormat,
    pub winning_score: WinningScore,
    pub initial_server: Side,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        ScoreConfig {
            format: MatchFormat::SingleGame,
            winning_score: WinningScore::Eleven,
            initial_server: Side::A,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
    pub game: u32,
    pub winner: Side,
    pub points_a: u32,
    pub points_b: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreState {
    pub points_a: u32,
    pub points_b: u32,
    pub serving_side: Side,
    pub server_slot: ServerSlot,
    pub is_active: bool,
    pub games_won_a: u32,
    pub games_won_b: u32,
    pub game_history: Vec<GameResult>,
    /// Set at the start of each game, cleared by the first side-out.
    opening_turn: bool,
}

impl ScoreState {
    fn fresh(initial_server: Side) -> Self {
        ScoreState {
            points_a: 0,
            points_b: 0,
            serving_side: initial_server,
            server_slot: ServerSlot::First,
            is_active: false,
            games_won_a: 0,
            games_won_b: 0,
            game_history: Vec::new(),
            opening_turn: true,
        }
    }

    pub fn points(&self, side: Side) -> u32 {
        match side {
            Side::A => self.points_a,
            Side::B => self.points_b,
        }
    }

    pub fn games_won(&self, side: Side) -> u32 {
        match side {
            Side::A => self.games_won_a,
            Side::B => self.games_won_b,
        }
    }

    /// The side that has reached `winning_score` with a lead of at least two.
    pub fn game_winner(&self, winning_score: WinningScore) -> Option<Side> {
        let target = winning_score.points();
        [Side::A, Side::B].into_iter().find(|side| {
            let own = self.points(*side);
            let other = self.points(side.other());
            own >= target && own >= other + 2
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScoreAction {
    Point,
    SideOut,
    Start,
    Pause,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ScoreOutcome {
    Applied,
    #[serde(rename_all = "camelCase")]
    GameWon {
        winner: Side,
        points_a: u32,
        points_b: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEngine {
    config: ScoreConfig,
    state: ScoreState,
    /// Set by the first `start` and never cleared; configuration is locked from then on.
    started: bool,
}

impl ScoreEngine {
    pub fn new(config: ScoreConfig) -> Self {
        ScoreEngine {
            config,
            state: ScoreState::fresh(config.initial_server),
            started: false,
        }
    }

    pub fn config(&self) -> &ScoreConfig {
        &self.config
    }

    pub fn state(&self) -> &ScoreState {
        &self.state
    }

    /// Pure transition: returns the engine after `action` together with what happened.
    /// `self` is left untouched, so callers can persist before committing.
    pub fn apply(&self, action: ScoreAction) -> Result<(Self, ScoreOutcome), ScoreError> {
        let mut next = self.clone();
        let outcome = match action {
            ScoreAction::Point => next.point()?,
            ScoreAction::SideOut => next.side_out().map(|()| ScoreOutcome::Applied)?,
            ScoreAction::Start => next.start().map(|()| ScoreOutcome::Applied)?,
            ScoreAction::Pause => next.pause().map(|()| ScoreOutcome::Applied)?,
            ScoreAction::Reset => {
                next.reset();
                ScoreOutcome::Applied
            }
        };
        Ok((next, outcome))
    }

    pub fn configure(&mut self, config: ScoreConfig) -> Result<(), ScoreError> {
        if self.state.is_active {
            return Err(ScoreError::invalid("configure", "the match is active"));
        }
        if self.started {
            return Err(ScoreError::invalid("configure", "the match has already been started"));
        }
        self.config = config;
        self.state = ScoreState::fresh(config.initial_server);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ScoreError> {
        if self.state.is_active {
            return Err(ScoreError::invalid("start", "the match is already active"));
        }
        if self.state.game_winner(self.config.winning_score).is_some() {
            return Err(ScoreError::invalid("start", "the game is already decided"));
        }
        self.state.is_active = true;
        self.started = true;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), ScoreError> {
        if !self.state.is_active {
            return Err(ScoreError::invalid("pause", "the match is not active"));
        }
        self.state.is_active = false;
        Ok(())
    }

    /// Awards a rally to the serving side. The serve does not move.
    pub fn point(&mut self) -> Result<ScoreOutcome, ScoreError> {
        self.require_live("point")?;
        match self.state.serving_side {
            Side::A => self.state.points_a += 1,
            Side::B => self.state.points_b += 1,
        }
        debug!(
            side = %self.state.serving_side,
            points_a = self.state.points_a,
            points_b = self.state.points_b,
            "point"
        );
        Ok(match self.state.game_winner(self.config.winning_score) {
            Some(winner) => ScoreOutcome::GameWon {
                winner,
                points_a: self.state.points_a,
                points_b: self.state.points_b,
            },
            None => ScoreOutcome::Applied,
        })
    }

    pub fn side_out(&mut self) -> Result<(), ScoreError> {
        self.require_live("side out")?;
        if self.is_opening_serve() {
            self.state.serving_side = self.state.serving_side.other();
            self.state.server_slot = ServerSlot::First;
        } else {
            match self.state.server_slot {
                ServerSlot::First => self.state.server_slot = ServerSlot::Second,
                ServerSlot::Second => {
                    self.state.serving_side = self.state.serving_side.other();
                    self.state.server_slot = ServerSlot::First;
                }
            }
        }
        self.state.opening_turn = false;
        debug!(
            side = %self.state.serving_side,
            server = u8::from(self.state.server_slot),
            "side out"
        );
        Ok(())
    }

    /// Clears points, games and history back to the configured initial server.
    /// Configuration and its lock are untouched.
    pub fn reset(&mut self) {
        let active = self.state.is_active;
        self.state = ScoreState::fresh(self.config.initial_server);
        self.state.is_active = active;
    }

    /// Side A's opening turn of a game: 0-0, server 1, no side-out yet.
    pub fn is_opening_serve(&self) -> bool {
        self.state.opening_turn
            && self.state.points_a == 0
            && self.state.points_b == 0
            && self.state.serving_side == Side::A
            && self.state.server_slot == ServerSlot::First
    }

    pub(crate) fn record_game(&mut self, winner: Side) -> GameResult {
        match winner {
            Side::A => self.state.games_won_a += 1,
            Side::B => self.state.games_won_b += 1,
        }
        let result = GameResult {
            game: self.state.game_history.len() as u32 + 1,
            winner,
            points_a: self.state.points_a,
            points_b: self.state.points_b,
        };
        self.state.game_history.push(result);
        result
    }

    pub(crate) fn begin_next_game(&mut self) {
        self.state.points_a = 0;
        self.state.points_b = 0;
        self.state.serving_side = Side::A;
        self.state.server_slot = ServerSlot::First;
        self.state.opening_turn = true;
    }

    pub(crate) fn deactivate(&mut self) {
        self.state.is_active = false;
    }

    fn require_live(&self, action: &'static str) -> Result<(), ScoreError> {
        if !self.state.is_active {
            return Err(ScoreError::invalid(action, "the match is not active"));
        }
        if self.state.game_winner(self.config.winning_score).is_some() {
            return Err(ScoreError::invalid(action, "the game is already decided"));
        }
        Ok(())
    }
}
