use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use rchess_bridge::config::{BridgeConfig, ColorSetting};
use rchess_bridge::engine::{EngineConfig, SearchMode};
use rchess_bridge::oracle::{self, color_label};
use rchess_bridge::sim::SimulatedTable;
use rchess_bridge::trigger::run_driver;
use rchess_bridge::util::lock_or_recover;
use rchess_bridge::{ColorMode, ErrorCode, IterationOutcome, Session};
use shakmaty::{Color, Position};

/// UCI エンジンを模擬対局画面に対して自動で指させる。
///
/// # よく使うコマンド例
///
/// - 付属のスタブエンジンで 1 局（白番、ノード数指定）:
///   `cargo run -p rchess-bridge -- --engine-path target/debug/rchess-mock-uci --color white --nodes 1000`
///
/// - 設定ファイルのプロファイルを使い、持ち時間 60 秒 + 1 秒で 3 局:
///   `cargo run -p rchess-bridge -- --config bridge.toml --engine stockfish --clock 60000+1000 --games 3`
///
/// - 局面を 1 つ与えて推奨手だけ表示:
///   `cargo run -p rchess-bridge -- --config bridge.toml --fen "<fen>" --suggest`
#[derive(Parser, Debug)]
#[command(author, version, about = "UCI engine bridge (autoplay against a simulated table)")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine profile name in the configuration (first profile when omitted)
    #[arg(long)]
    engine: Option<String>,

    /// Engine executable; overrides the profile path
    #[arg(long)]
    engine_path: Option<PathBuf>,

    /// Node-limited search
    #[arg(long, conflicts_with = "clock")]
    nodes: Option<u64>,

    /// Clock-limited search as <initial_ms>+<increment_ms>
    #[arg(long, value_parser = parse_clock)]
    clock: Option<(u64, u64)>,

    /// Side to play: white, black or auto
    #[arg(long)]
    color: Option<String>,

    /// Starting position (standard when omitted)
    #[arg(long)]
    fen: Option<String>,

    /// Number of games to play
    #[arg(long, default_value_t = 1)]
    games: u32,

    /// Maximum plies per game
    #[arg(long, default_value_t = 200)]
    max_plies: usize,

    /// Seed for the simulated opponent
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Print one engine suggestion for the starting position and exit
    #[arg(long)]
    suggest: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn parse_clock(s: &str) -> Result<(u64, u64), String> {
    let (initial, inc) = s.split_once('+').unwrap_or((s, "0"));
    let initial = initial.trim().parse().map_err(|e| format!("initial time: {e}"))?;
    let inc = inc.trim().parse().map_err(|e| format!("increment: {e}"))?;
    Ok((initial, inc))
}

fn parse_color_setting(s: &str) -> Result<ColorSetting> {
    match s.trim().to_ascii_lowercase().as_str() {
        "white" | "w" => Ok(ColorSetting::White),
        "black" | "b" => Ok(ColorSetting::Black),
        "auto" => Ok(ColorSetting::Auto),
        other => bail!("unknown color '{other}' (expected white, black or auto)"),
    }
}

fn init_logger(debug: bool) {
    use std::io::Write;
    let log_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    )
    .format(|buf, record| {
        writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args())
    })
    .write_style(env_logger::WriteStyle::Never)
    .target(env_logger::Target::Stderr)
    .init();
}

fn resolve_engine(cli: &Cli, cfg: &BridgeConfig) -> Result<EngineConfig> {
    let profile = cfg.engine(cli.engine.as_deref()).cloned();
    if let (Some(name), None) = (&cli.engine, &profile) {
        bail!("engine profile '{name}' not found in configuration");
    }
    match (profile, &cli.engine_path) {
        (Some(mut p), Some(path)) => {
            p.path = path.clone();
            Ok(p)
        }
        (Some(p), None) => Ok(p),
        (None, Some(path)) => Ok(EngineConfig::new("engine", path.clone())),
        (None, None) => bail!("no engine configured; pass --engine-path or --config"),
    }
}

fn resolve_search(cli: &Cli, cfg: &BridgeConfig) -> SearchMode {
    if let Some(nodes) = cli.nodes {
        return SearchMode::Nodes { nodes };
    }
    if let Some((initial_ms, increment_ms)) = cli.clock {
        let clock_policy = match cfg.search {
            SearchMode::Clock { clock_policy, .. } => clock_policy,
            SearchMode::Nodes { .. } => Default::default(),
        };
        return SearchMode::Clock {
            initial_ms,
            increment_ms,
            clock_policy,
        };
    }
    cfg.search
}

/// 何局目かに応じた自分の色。自動判定なら局ごとに入れ替える。
fn color_for_game(mode: ColorMode, game: u32) -> Color {
    match mode {
        ColorMode::Fixed(c) => c,
        ColorMode::AutoDetect if game % 2 == 0 => Color::White,
        ColorMode::AutoDetect => Color::Black,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.debug);

    let cfg = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    let engine_cfg = resolve_engine(&cli, &cfg)?;
    let search = resolve_search(&cli, &cfg);
    let color_setting = match &cli.color {
        Some(c) => parse_color_setting(c)?,
        None => cfg.autoplay.color,
    };
    let color_mode = color_setting.color_mode();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown_clone = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            eprintln!("\nShutting down gracefully...");
            shutdown_clone.store(true, Ordering::Relaxed);
        })
        .context("Failed to set Ctrl-C handler")?;
    }

    let table = match &cli.fen {
        Some(fen) => SimulatedTable::from_fen(fen, cli.seed)?,
        None => SimulatedTable::new(cli.seed),
    };
    let mut session = Session::new(table.clone(), table.clone(), cfg.autoplay.settings(), search);
    session
        .enable_engine(engine_cfg)
        .map_err(|e| anyhow!("{}", e.message))
        .context("failed to start engine")?;

    if cli.suggest {
        session.reconcile_now().map_err(|e| anyhow!("{e}"))?;
        let best = session.suggest_move().map_err(|e| anyhow!("{e}"))?;
        println!("{}", serde_json::to_string_pretty(&best)?);
        session.shutdown();
        return Ok(());
    }

    let events = table.subscribe();
    let session = Mutex::new(session);
    let mut summary = Vec::new();

    for game in 0..cli.games {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let ours = color_for_game(color_mode, game);
        match &cli.fen {
            Some(fen) => table.load(fen, ours == Color::White)?,
            None => table.new_game(ours == Color::White),
        }
        {
            let mut s = lock_or_recover(&session);
            s.reset_position(None).map_err(|e| anyhow!("{e}"))?;
            s.enable_autoplay(color_mode).map_err(|e| anyhow!("{e}"))?;
        }
        if table.position().turn() != ours {
            table.play_random();
        }
        log::info!("game {} started, playing {}", game + 1, color_label(ours));

        let game_done = AtomicBool::new(false);
        let mut ending = String::from("interrupted");
        run_driver(
            &session,
            &events,
            cfg.autoplay.poll_interval(),
            cfg.autoplay.debounce(),
            &game_done,
            |outcome| {
                let stop = match outcome {
                    IterationOutcome::GameOver { terminal } => {
                        ending = format!("{terminal:?}");
                        true
                    }
                    IterationOutcome::Diverged { detail } => {
                        ending = format!("diverged: {detail}");
                        true
                    }
                    IterationOutcome::NoMove => {
                        ending = "engine has no move".to_string();
                        true
                    }
                    IterationOutcome::Failed {
                        code: ErrorCode::EngineStartup | ErrorCode::EngineTimeout,
                        message,
                    } => {
                        ending = format!("engine failure: {message}");
                        true
                    }
                    IterationOutcome::Played { mv, elapsed_ms } => {
                        log::info!("played {mv} ({elapsed_ms} ms)");
                        if table.moves().len() >= cli.max_plies {
                            ending = "max plies".to_string();
                            true
                        } else {
                            false
                        }
                    }
                    _ => false,
                };
                if stop || shutdown.load(Ordering::Relaxed) {
                    game_done.store(true, Ordering::Relaxed);
                }
            },
        );

        let moves: Vec<String> = table.moves().iter().map(|m| m.to_string()).collect();
        println!(
            "game {}: {} after {} plies ({} to move): {}",
            game + 1,
            ending,
            moves.len(),
            color_label(table.position().turn()),
            moves.join(" ")
        );
        summary.push(serde_json::json!({
            "game": game + 1,
            "playing": color_label(ours),
            "result": ending,
            "terminal": oracle::terminal(&table.position()),
            "moves": moves,
        }));
    }

    let mut session = session.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    log::debug!("final status: {}", serde_json::to_string(&session.status())?);
    session.shutdown();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_argument_parses_with_and_without_increment() {
        assert_eq!(parse_clock("60000+1000"), Ok((60_000, 1_000)));
        assert_eq!(parse_clock("5000"), Ok((5_000, 0)));
        assert!(parse_clock("abc+1").is_err());
    }

    #[test]
    fn auto_color_alternates_between_games() {
        assert_eq!(color_for_game(ColorMode::AutoDetect, 0), Color::White);
        assert_eq!(color_for_game(ColorMode::AutoDetect, 1), Color::Black);
        assert_eq!(color_for_game(ColorMode::Fixed(Color::Black), 0), Color::Black);
    }
}
