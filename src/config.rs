use serde::{Deserialize, Serialize};
use std::{
  collections::{BTreeSet, HashSet},
  env, fs,
  path::{Path, PathBuf},
};

use crate::error::ConfigError;
use crate::score::{MatchFormat, ScoreConfig, WinningScore};
use crate::topology::standard_draw;
use crate::tournament::TournamentSettings;
use crate::types::{
  Side, Team, TeamId, TournamentId, DEFAULT_ADVANCE_RETRIES, DEFAULT_BIND_ADDR, MAX_BRACKET_SIZE,
  MIN_BRACKET_SIZE,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
  pub id: TeamId,
  pub name: String,
  pub players: [String; 2],
  #[serde(default)]
  pub seed: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreboardConfig {
  pub tournament_id: TournamentId,
  pub name: String,
  pub bracket_size: usize,
  pub format: MatchFormat,
  pub winning_score: WinningScore,
  pub initial_server: Side,
  pub teams: Vec<TeamConfig>,
  pub advance_retries: u32,
  pub bind_addr: String,
  pub log_dir: String,
  pub static_dir: String,
}

impl Default for ScoreboardConfig {
  fn default() -> Self {
    ScoreboardConfig {
      tournament_id: 1,
      name: "Doubles Open".to_string(),
      bracket_size: 8,
      format: MatchFormat::SingleGame,
      winning_score: WinningScore::Eleven,
      initial_server: Side::A,
      teams: Vec::new(),
      advance_retries: DEFAULT_ADVANCE_RETRIES,
      bind_addr: String::new(),
      log_dir: String::new(),
      static_dir: String::new(),
    }
  }
}

impl ScoreboardConfig {
  pub fn score_config(&self) -> ScoreConfig {
    ScoreConfig {
      format: self.format,
      winning_score: self.winning_score,
      initial_server: self.initial_server,
    }
  }

  pub fn settings(&self) -> TournamentSettings {
    TournamentSettings {
      id: self.tournament_id,
      name: self.name.clone(),
      bracket_size: self.bracket_size,
      score_config: self.score_config(),
      advance_retries: self.advance_retries,
    }
  }

  pub fn team_records(&self) -> Vec<Team> {
    self
      .teams
      .iter()
      .map(|team| Team {
        id: team.id,
        name: team.name.clone(),
        players: team.players.clone(),
      })
      .collect()
  }

  /// Round-1 positions from the (normalised) seeds.
  pub fn draw(&self) -> Vec<Option<TeamId>> {
    standard_draw(&normalize_seeds(&self.teams), self.bracket_size)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let size = self.bracket_size;
    if !(MIN_BRACKET_SIZE..=MAX_BRACKET_SIZE).contains(&size) || !size.is_power_of_two() {
      return Err(ConfigError::Invalid(format!(
        "bracketSize {size} must be a power of two between {MIN_BRACKET_SIZE} and {MAX_BRACKET_SIZE}"
      )));
    }
    if self.teams.len() > size || self.teams.len() <= size / 2 {
      return Err(ConfigError::Invalid(format!(
        "{} teams cannot fill a bracket of {size}; need between {} and {size}",
        self.teams.len(),
        size / 2 + 1
      )));
    }
    let mut ids = HashSet::new();
    for team in &self.teams {
      if !ids.insert(team.id) {
        return Err(ConfigError::Invalid(format!("team id {} is listed twice", team.id)));
      }
    }
    Ok(())
  }
}

/// Explicit positive seeds are honoured on first claim; everything else
/// takes the lowest unclaimed seed in listed order. Sorted by seed.
pub fn normalize_seeds(teams: &[TeamConfig]) -> Vec<(u32, TeamId)> {
  let mut claimed = BTreeSet::new();
  let explicit = teams
    .iter()
    .map(|team| team.seed.filter(|seed| *seed > 0 && claimed.insert(*seed)))
    .collect::<Vec<_>>();

  let mut unclaimed = (1u32..).filter(|seed| !claimed.contains(seed));
  let mut seeded = teams
    .iter()
    .zip(explicit)
    .map(|(team, seed)| {
      let seed = seed.or_else(|| unclaimed.next()).unwrap_or_default();
      (seed, team.id)
    })
    .collect::<Vec<_>>();
  seeded.sort_unstable_by_key(|(seed, _)| *seed);
  seeded
}

/// Non-empty, trimmed value of `key`.
pub fn env_default(key: &str) -> Option<String> {
  let value = env::var(key).ok()?;
  let value = value.trim();
  (!value.is_empty()).then(|| value.to_owned())
}

pub fn config_path() -> PathBuf {
  env_default("SCOREBOARD_CONFIG")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("scoreboard.json"))
}

pub fn apply_env_defaults(mut config: ScoreboardConfig) -> ScoreboardConfig {
  if config.bind_addr.trim().is_empty() {
    config.bind_addr = env_default("SCOREBOARD_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
  }
  if config.log_dir.trim().is_empty() {
    config.log_dir = env_default("SCOREBOARD_LOG_DIR").unwrap_or_else(|| "logs".to_string());
  }
  if config.static_dir.trim().is_empty() {
    if let Some(value) = env_default("SCOREBOARD_STATIC_DIR") {
      config.static_dir = value;
    }
  }
  config
}

pub fn load_config_from(path: &Path) -> Result<ScoreboardConfig, ConfigError> {
  if !path.is_file() {
    return Ok(apply_env_defaults(ScoreboardConfig::default()));
  }
  let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.display().to_string(),
    source,
  })?;
  let config = serde_json::from_str::<ScoreboardConfig>(&data).map_err(|source| ConfigError::Parse {
    path: path.display().to_string(),
    source,
  })?;
  Ok(apply_env_defaults(config))
}

pub fn load_config() -> Result<ScoreboardConfig, ConfigError> {
  load_config_from(&config_path())
}

/// Reads `dir/.env` into the process environment without overriding
/// variables that are already set. A missing file is not an error.
pub fn load_env_file(dir: &Path) {
  let Ok(contents) = fs::read_to_string(dir.join(".env")) else {
    return;
  };
  contents
    .lines()
    .filter_map(parse_env_line)
    .filter(|(key, _)| env::var_os(key).is_none())
    .for_each(|(key, value)| env::set_var(key, value));
}

/// `KEY=value`, optionally prefixed by `export`. Quoted values are taken
/// verbatim; unquoted values stop at a `#`.
pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let line = line.trim();
  if line.starts_with('#') {
    return None;
  }
  let (key, raw) = line.strip_prefix("export ").unwrap_or(line).split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  let raw = raw.trim();
  let quoted = ['"', '\''].into_iter().find_map(|quote| raw.strip_prefix(quote)?.strip_suffix(quote));
  let value = quoted.unwrap_or_else(|| raw.split('#').next().unwrap_or_default().trim_end());
  Some((key.to_owned(), value.to_owned()))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn team(id: TeamId, seed: Option<u32>) -> TeamConfig {
    TeamConfig {
      id,
      name: format!("Team {id}"),
      players: [format!("P{id}a"), format!("P{id}b")],
      seed,
    }
  }

  #[test]
  fn parses_camel_case_with_defaults() {
    let config: ScoreboardConfig = serde_json::from_str(
      r#"{
        "tournamentId": 7,
        "bracketSize": 4,
        "format": "bestOfThree",
        "winningScore": 15,
        "teams": [
          {"id": 1, "name": "Dinks", "players": ["Ana", "Bo"]},
          {"id": 2, "name": "Lobs", "players": ["Cy", "Di"], "seed": 1}
        ]
      }"#,
    )
    .unwrap();
    assert_eq!(config.tournament_id, 7);
    assert_eq!(config.format, MatchFormat::BestOfThree);
    assert_eq!(config.winning_score, WinningScore::Fifteen);
    assert_eq!(config.initial_server, Side::A);
    assert_eq!(config.advance_retries, DEFAULT_ADVANCE_RETRIES);
    assert_eq!(config.teams[1].seed, Some(1));
  }

  #[test]
  fn seeds_fill_gaps_in_listed_order() {
    let teams = vec![team(10, None), team(20, Some(1)), team(30, Some(1)), team(40, Some(4))];
    assert_eq!(normalize_seeds(&teams), vec![(1, 20), (2, 10), (3, 30), (4, 40)]);
  }

  #[test]
  fn draw_gives_top_seeds_the_byes() {
    let config = ScoreboardConfig {
      bracket_size: 8,
      teams: (1..=6).map(|id| team(id, Some(id))).collect(),
      ..ScoreboardConfig::default()
    };
    config.validate().unwrap();
    assert_eq!(
      config.draw(),
      vec![Some(1), None, Some(4), Some(5), Some(2), None, Some(3), Some(6)]
    );
  }

  #[test]
  fn validate_rejects_bad_shapes() {
    let mut config = ScoreboardConfig {
      bracket_size: 6,
      teams: (1..=6).map(|id| team(id, None)).collect(),
      ..ScoreboardConfig::default()
    };
    assert!(config.validate().is_err());
    config.bracket_size = 16;
    assert!(config.validate().is_err());
    config.bracket_size = 8;
    config.validate().unwrap();
    config.teams.push(team(1, None));
    assert!(config.validate().is_err());
  }

  #[test]
  fn env_lines() {
    assert_eq!(
      parse_env_line("export SCOREBOARD_BIND_ADDR=\"0.0.0.0:8080\""),
      Some(("SCOREBOARD_BIND_ADDR".to_string(), "0.0.0.0:8080".to_string()))
    );
    assert_eq!(
      parse_env_line("SCOREBOARD_LOG_DIR=/var/log/sb # trailing"),
      Some(("SCOREBOARD_LOG_DIR".to_string(), "/var/log/sb".to_string()))
    );
    assert_eq!(parse_env_line("# comment"), None);
    assert_eq!(parse_env_line("=value"), None);
  }

  #[test]
  fn quoted_values_keep_hashes() {
    assert_eq!(
      parse_env_line("SCOREBOARD_STATIC_DIR='/srv/board#2'"),
      Some(("SCOREBOARD_STATIC_DIR".to_string(), "/srv/board#2".to_string()))
    );
    assert_eq!(parse_env_line(""), None);
  }

  #[test]
  fn env_file_does_not_override_existing_vars() {
    let dir = env::temp_dir().join(format!("scoreboard-env-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(
      dir.join(".env"),
      "# local\nSCOREBOARD_TEST_ENV_FRESH=from-file\nSCOREBOARD_TEST_ENV_SET=from-file\n",
    )
    .unwrap();
    env::set_var("SCOREBOARD_TEST_ENV_SET", "from-shell");

    load_env_file(&dir);
    assert_eq!(env_default("SCOREBOARD_TEST_ENV_FRESH").as_deref(), Some("from-file"));
    assert_eq!(env_default("SCOREBOARD_TEST_ENV_SET").as_deref(), Some("from-shell"));
    fs::remove_dir_all(&dir).ok();
  }

  #[test]
  fn missing_file_yields_defaults() {
    let config = load_config_from(Path::new("/definitely/not/here/scoreboard.json")).unwrap();
    assert_eq!(config.bracket_size, 8);
    assert!(!config.bind_addr.is_empty());
    assert!(!config.log_dir.is_empty());
  }
}
