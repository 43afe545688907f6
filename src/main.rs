use std::{env, fs, path::PathBuf, process::ExitCode, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use scoreboard::config::{load_config, load_env_file, ScoreboardConfig};
use scoreboard::events::{EventLog, ObserverSet, TracingObserver};
use scoreboard::server::{self, AppState};
use scoreboard::store::InMemoryMatchStore;
use scoreboard::tournament::Tournament;
use scoreboard::types::Session;

fn build_state(config: &ScoreboardConfig) -> Result<AppState, String> {
    config.validate().map_err(|e| e.to_string())?;
    let events = Arc::new(EventLog::new());
    let observers = ObserverSet::new()
        .with(Arc::new(TracingObserver))
        .with(events.clone());
    let session = Session::system();
    let tournament = Tournament::create(
        config.settings(),
        config.team_records(),
        Arc::new(InMemoryMatchStore::new()),
        Arc::new(observers),
        &session,
    )
    .map_err(|e| e.to_string())?;
    tournament.seed(&config.draw(), &session).map_err(|e| e.to_string())?;
    Ok(AppState { tournament: Arc::new(tournament), events })
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Ok(cwd) = env::current_dir() {
        load_env_file(&cwd);
    }
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let logs_dir = PathBuf::from(&config.log_dir);
    fs::create_dir_all(&logs_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "scoreboard.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    info!(
        tournament = config.tournament_id,
        bracket_size = config.bracket_size,
        teams = config.teams.len(),
        "scoreboard starting"
    );

    let state = match build_state(&config) {
        Ok(state) => state,
        Err(e) => {
            error!("startup failed: {e}");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let static_dir = Some(config.static_dir.trim())
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from);

    if let Err(e) = server::serve(state, static_dir, &config.bind_addr).await {
        error!("server failed on {}: {e}", config.bind_addr);
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
