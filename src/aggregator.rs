//! Turns finished games into a match result for the configured format.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ScoreError;
use crate::score::{
    GameResult, MatchFormat, ScoreAction, ScoreConfig, ScoreEngine, ScoreOutcome, ScoreState,
};
use crate::types::Side;

/// Final disposition of a match.
///
/// Single game matches carry the game's points; best-of-three matches carry games won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCompleted {
    pub winner: Side,
    pub final_score_a: u32,
    pub final_score_b: u32,
}

impl MatchCompleted {
    /// Result recorded when a match is awarded without being played.
    pub fn walkover(config: &ScoreConfig, winner: Side) -> Self {
        let winning = match config.format {
            MatchFormat::SingleGame => config.winning_score.points(),
            MatchFormat::BestOfThree => config.format.games_to_win(),
        };
        let (final_score_a, final_score_b) = match winner {
            Side::A => (winning, 0),
            Side::B => (0, winning),
        };
        MatchCompleted { winner, final_score_a, final_score_b }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AggregateOutcome {
    Applied,
    /// A game ended and the match goes on with the next game.
    GameWon { game: GameResult },
    MatchCompleted { game: GameResult, result: MatchCompleted },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAggregator {
    engine: ScoreEngine,
    result: Option<MatchCompleted>,
}

impl SetAggregator {
    pub fn new(config: ScoreConfig) -> Self {
        SetAggregator {
            engine: ScoreEngine::new(config),
            result: None,
        }
    }

    pub fn engine(&self) -> &ScoreEngine {
        &self.engine
    }

    pub fn state(&self) -> &ScoreState {
        self.engine.state()
    }

    pub fn result(&self) -> Option<MatchCompleted> {
        self.result
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    pub fn apply(&self, action: ScoreAction) -> Result<(Self, AggregateOutcome), ScoreError> {
        let mut next = self.clone();
        let outcome = match action {
            ScoreAction::Point => next.point()?,
            ScoreAction::SideOut => next.side_out().map(|()| AggregateOutcome::Applied)?,
            ScoreAction::Start => next.start().map(|()| AggregateOutcome::Applied)?,
            ScoreAction::Pause => next.pause().map(|()| AggregateOutcome::Applied)?,
            ScoreAction::Reset => next.reset().map(|()| AggregateOutcome::Applied)?,
        };
        Ok((next, outcome))
    }

    pub fn configure(&mut self, config: ScoreConfig) -> Result<(), ScoreError> {
        self.engine.configure(config)
    }

    pub fn start(&mut self) -> Result<(), ScoreError> {
        self.require_open("start")?;
        self.engine.start()
    }

    pub fn pause(&mut self) -> Result<(), ScoreError> {
        self.require_open("pause")?;
        self.engine.pause()
    }

    pub fn reset(&mut self) -> Result<(), ScoreError> {
        self.require_open("reset")?;
        self.engine.reset();
        Ok(())
    }

    pub fn side_out(&mut self) -> Result<(), ScoreError> {
        self.require_open("side out")?;
        self.engine.side_out()
    }

    pub fn point(&mut self) -> Result<AggregateOutcome, ScoreError> {
        self.require_open("point")?;
        match self.engine.point()? {
            ScoreOutcome::Applied => Ok(AggregateOutcome::Applied),
            ScoreOutcome::GameWon { winner, .. } => Ok(self.game_won(winner)),
        }
    }

    fn game_won(&mut self, winner: Side) -> AggregateOutcome {
        let game = self.engine.record_game(winner);
        let format = self.engine.config().format;
        let state = self.engine.state();
        let result = match format {
            MatchFormat::SingleGame => MatchCompleted {
                winner,
                final_score_a: game.points_a,
                final_score_b: game.points_b,
            },
            MatchFormat::BestOfThree if state.games_won(winner) >= format.games_to_win() => {
                MatchCompleted {
                    winner,
                    final_score_a: state.games_won_a,
                    final_score_b: state.games_won_b,
                }
            }
            MatchFormat::BestOfThree => {
                info!(game = game.game, winner = %winner, "game won, next game");
                self.engine.begin_next_game();
                return AggregateOutcome::GameWon { game };
            }
        };
        self.engine.deactivate();
        self.result = Some(result);
        info!(
            winner = %winner,
            score_a = result.final_score_a,
            score_b = result.final_score_b,
            "match completed"
        );
        AggregateOutcome::MatchCompleted { game, result }
    }

    fn require_open(&self, action: &'static str) -> Result<(), ScoreError> {
        if self.is_finished() {
            return Err(ScoreError::invalid(action, "the match is already completed"));
        }
        Ok(())
    }
}
