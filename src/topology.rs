use serde::Serialize;
use std::collections::HashMap;

use crate::error::BracketError;
use crate::types::{Side, TeamId, MAX_BRACKET_SIZE, MIN_BRACKET_SIZE};

/// Where the winner of a match lands in the next round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotTarget {
  pub round: u32,
  pub slot: usize,
  pub side: Side,
}

/// Fixed single-elimination shape: round `r` slot `i` feeds round `r + 1`
/// slot `i / 2`, into team A for even `i` and team B for odd `i`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketTopology {
  size: usize,
  round_sizes: Vec<usize>,
}

impl BracketTopology {
  pub fn new(size: usize) -> Result<Self, BracketError> {
    if !(MIN_BRACKET_SIZE..=MAX_BRACKET_SIZE).contains(&size) || !size.is_power_of_two() {
      return Err(BracketError::InvalidSize(size));
    }
    let mut round_sizes = Vec::new();
    let mut matches = size / 2;
    while matches >= 1 {
      round_sizes.push(matches);
      matches /= 2;
    }
    Ok(BracketTopology { size, round_sizes })
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn round_count(&self) -> u32 {
    self.round_sizes.len() as u32
  }

  pub fn final_round(&self) -> u32 {
    self.round_count()
  }

  pub fn is_final_round(&self, round: u32) -> bool {
    round == self.final_round()
  }

  pub fn matches_in_round(&self, round: u32) -> Option<usize> {
    let index = usize::try_from(round).ok()?.checked_sub(1)?;
    self.round_sizes.get(index).copied()
  }

  /// `(round, slot)` pairs in creation order, seeded round first.
  pub fn slots(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
    self
      .round_sizes
      .iter()
      .enumerate()
      .flat_map(|(index, count)| (0..*count).map(move |slot| (index as u32 + 1, slot)))
  }

  /// Next-round position for the winner of `round`/`slot`; `None` for the final.
  pub fn target(&self, round: u32, slot: usize) -> Result<Option<SlotTarget>, BracketError> {
    let count = self
      .matches_in_round(round)
      .ok_or(BracketError::UnknownSlot { round, slot })?;
    if slot >= count {
      return Err(BracketError::UnknownSlot { round, slot });
    }
    if self.is_final_round(round) {
      return Ok(None);
    }
    let side = if slot % 2 == 0 { Side::A } else { Side::B };
    Ok(Some(SlotTarget { round: round + 1, slot: slot / 2, side }))
  }

  pub fn round_label(&self, round: u32) -> String {
    let Some(count) = self.matches_in_round(round) else {
      return format!("Round {round}");
    };
    match self.final_round() - round {
      0 => "Final".to_string(),
      1 => "Semifinal".to_string(),
      2 => "Quarterfinal".to_string(),
      _ => format!("Round of {}", count * 2),
    }
  }
}

/// Standard seeding order for a bracket of `size` positions, so that seeds
/// 1 and 2 can only meet in the final. For 8: `[1, 8, 4, 5, 2, 7, 3, 6]`.
///
/// Each doubling pairs every seed `s` with its mirror `2n + 1 - s`.
pub fn seed_positions(size: u32) -> Vec<u32> {
  let mut order = vec![1u32];
  while (order.len() as u32) < size {
    let mirror = order.len() as u32 * 2 + 1;
    order = order.iter().flat_map(|&seed| [seed, mirror - seed]).collect();
  }
  order
}

/// Lays seeded teams onto round-1 positions. Position `2i` is team A of
/// round-1 slot `i`, position `2i + 1` is its team B; missing seeds are byes.
pub fn standard_draw(seeded: &[(u32, TeamId)], size: usize) -> Vec<Option<TeamId>> {
  let by_seed = seeded.iter().copied().collect::<HashMap<_, _>>();
  seed_positions(size as u32)
    .into_iter()
    .map(|seed| by_seed.get(&seed).copied())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn eight_team_shape() {
    let topology = BracketTopology::new(8).unwrap();
    assert_eq!(topology.round_count(), 3);
    assert_eq!(topology.matches_in_round(1), Some(4));
    assert_eq!(topology.matches_in_round(2), Some(2));
    assert_eq!(topology.matches_in_round(3), Some(1));
    assert_eq!(topology.matches_in_round(4), None);
    assert_eq!(topology.slots().count(), 7);
    assert_eq!(topology.round_label(1), "Quarterfinal");
    assert_eq!(topology.round_label(3), "Final");
  }

  #[test]
  fn winners_fan_in_by_parity() {
    let topology = BracketTopology::new(8).unwrap();
    assert_eq!(
      topology.target(1, 0).unwrap(),
      Some(SlotTarget { round: 2, slot: 0, side: Side::A })
    );
    assert_eq!(
      topology.target(1, 1).unwrap(),
      Some(SlotTarget { round: 2, slot: 0, side: Side::B })
    );
    assert_eq!(
      topology.target(1, 3).unwrap(),
      Some(SlotTarget { round: 2, slot: 1, side: Side::B })
    );
    assert_eq!(topology.target(3, 0).unwrap(), None);
    assert!(matches!(
      topology.target(2, 2),
      Err(BracketError::UnknownSlot { round: 2, slot: 2 })
    ));
  }

  #[test]
  fn rejects_odd_sizes() {
    assert!(BracketTopology::new(6).is_err());
    assert!(BracketTopology::new(1).is_err());
    assert!(BracketTopology::new(256).is_err());
    assert!(BracketTopology::new(2).is_ok());
  }

  #[test]
  fn large_brackets_get_round_of_labels() {
    let topology = BracketTopology::new(32).unwrap();
    assert_eq!(topology.round_label(1), "Round of 32");
    assert_eq!(topology.round_label(2), "Round of 16");
  }

  #[test]
  fn standard_draw_leaves_byes_for_top_seeds() {
    assert_eq!(seed_positions(8), vec![1, 8, 4, 5, 2, 7, 3, 6]);
    let seeded = (1..=6).map(|seed| (seed, seed * 10)).collect::<Vec<_>>();
    let draw = standard_draw(&seeded, 8);
    assert_eq!(
      draw,
      vec![Some(10), None, Some(40), Some(50), Some(20), None, Some(30), Some(60)]
    );
  }
}
