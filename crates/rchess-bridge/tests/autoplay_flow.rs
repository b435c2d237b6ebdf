//! [`Session`] と [`SimulatedTable`] を組み合わせた自動対局の流れ。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rchess_bridge::engine::{InfoSnapshot, ReadyState};
use rchess_bridge::gate::GateBlock;
use rchess_bridge::oracle::{self, Terminal};
use rchess_bridge::sim::SimulatedTable;
use rchess_bridge::trigger::run_driver;
use rchess_bridge::{
    AutoplaySettings, BestMove, ColorMode, CoordMove, EngineConfig, IterationOutcome,
    ReconcileOutcome, SearchEngine, SearchLimits, SearchMode, Session, StartingPosition,
};
use rchess_bridge::engine::StopHandle;
use shakmaty::Color;

type SimSession = Session<SimulatedTable, SimulatedTable>;

/// 送られたコマンドを記録し、局面の最初の合法手を返す。
struct ScriptedEngine {
    log: Arc<Mutex<Vec<String>>>,
    start: StartingPosition,
    moves: Vec<CoordMove>,
}

impl SearchEngine for ScriptedEngine {
    fn label(&self) -> &str {
        "scripted"
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::Ready
    }

    fn is_ready(&mut self) -> bool {
        true
    }

    fn new_game(&mut self) -> rchess_bridge::error::Result<()> {
        self.log.lock().unwrap().push("ucinewgame".to_string());
        Ok(())
    }

    fn set_position(
        &mut self,
        start: &StartingPosition,
        moves: &[CoordMove],
    ) -> rchess_bridge::error::Result<()> {
        self.start = start.clone();
        self.moves = moves.to_vec();
        Ok(())
    }

    fn search(&mut self, limits: &SearchLimits) -> rchess_bridge::error::Result<BestMove> {
        self.log.lock().unwrap().push(limits.go_command());
        let pos = oracle::replay(&self.start, &self.moves)?;
        Ok(BestMove {
            mv: oracle::legal_moves(&pos).first().map(|(m, _)| *m),
            ponder: None,
            info: InfoSnapshot::default(),
            elapsed_ms: 1,
        })
    }

    fn stop_handle(&self) -> StopHandle {
        StopHandle::new()
    }

    fn quit(&mut self) {}
}

fn instant_settings() -> AutoplaySettings {
    AutoplaySettings {
        settle_delay: Duration::ZERO,
        requery_cooldown: None,
    }
}

fn scripted_session(table: &SimulatedTable) -> (SimSession, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine_log = Arc::clone(&log);
    let mut session = Session::new(
        table.clone(),
        table.clone(),
        instant_settings(),
        SearchMode::Nodes { nodes: 1000 },
    )
    .with_launcher(move |_| {
        Ok(ScriptedEngine {
            log: Arc::clone(&engine_log),
            start: StartingPosition::Standard,
            moves: Vec::new(),
        })
    });
    session.enable_engine(EngineConfig::new("scripted", "scripted")).unwrap();
    (session, log)
}

fn searches(log: &Arc<Mutex<Vec<String>>>) -> usize {
    log.lock().unwrap().iter().filter(|c| c.starts_with("go ")).count()
}

fn new_games(log: &Arc<Mutex<Vec<String>>>) -> usize {
    log.lock().unwrap().iter().filter(|c| *c == "ucinewgame").count()
}

#[test]
fn engine_is_not_queried_when_it_is_not_our_turn() {
    let table = SimulatedTable::new(1);
    let (mut session, log) = scripted_session(&table);
    session.enable_autoplay(ColorMode::Fixed(Color::Black)).unwrap();

    let outcome = session.autoplay_iteration();
    assert!(
        matches!(
            outcome,
            IterationOutcome::Blocked {
                block: GateBlock::NotOurTurn { .. }
            }
        ),
        "{outcome:?}"
    );
    assert_eq!(searches(&log), 0);
    assert!(session.autoplay().last_queried.is_none());
    assert_eq!(table.executed(), 0);
}

#[test]
fn view_and_record_disagreeing_on_turn_blocks_the_search() {
    let table = SimulatedTable::new(2);
    let (mut session, log) = scripted_session(&table);
    session.enable_autoplay(ColorMode::Fixed(Color::Black)).unwrap();
    table.set_turn_override(Some(Color::Black));

    let outcome = session.autoplay_iteration();
    assert!(
        matches!(
            outcome,
            IterationOutcome::Blocked {
                block: GateBlock::TurnMismatch { .. }
            }
        ),
        "{outcome:?}"
    );
    assert_eq!(searches(&log), 0);
    assert!(session.autoplay().last_queried.is_none());
}

#[test]
fn missing_turn_indicator_blocks_the_search() {
    let table = SimulatedTable::new(3);
    let (mut session, log) = scripted_session(&table);
    session.enable_autoplay(ColorMode::Fixed(Color::White)).unwrap();
    table.set_show_turn(false);

    let outcome = session.autoplay_iteration();
    assert_eq!(
        outcome,
        IterationOutcome::Blocked {
            block: GateBlock::NoTurnIndicator
        }
    );
    assert_eq!(searches(&log), 0);
}

#[test]
fn rejected_move_is_not_recorded_and_not_retried() {
    let table = SimulatedTable::new(4);
    table.set_reject_moves(true);
    let (mut session, log) = scripted_session(&table);
    session.enable_autoplay(ColorMode::Fixed(Color::White)).unwrap();

    let outcome = session.autoplay_iteration();
    let IterationOutcome::Rejected { reason, .. } = &outcome else {
        panic!("expected rejection, got {outcome:?}");
    };
    assert_eq!(reason, "view did not change");
    assert!(session.tracker().history().is_empty());
    assert_eq!(
        session.status().last_queried.as_deref(),
        Some("position startpos")
    );

    let again = session.autoplay_iteration();
    assert_eq!(
        again,
        IterationOutcome::Blocked {
            block: GateBlock::AlreadyQueried
        }
    );
    assert_eq!(searches(&log), 1);
    assert_eq!(table.executed(), 1);
}

#[test]
fn requery_cooldown_allows_a_second_attempt() {
    let table = SimulatedTable::new(5);
    table.set_reject_moves(true);
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine_log = Arc::clone(&log);
    let settings = AutoplaySettings {
        settle_delay: Duration::ZERO,
        requery_cooldown: Some(Duration::ZERO),
    };
    let mut session = Session::new(
        table.clone(),
        table.clone(),
        settings,
        SearchMode::Nodes { nodes: 1000 },
    )
    .with_launcher(move |_| {
        Ok(ScriptedEngine {
            log: Arc::clone(&engine_log),
            start: StartingPosition::Standard,
            moves: Vec::new(),
        })
    });
    session.enable_engine(EngineConfig::new("scripted", "scripted")).unwrap();
    session.enable_autoplay(ColorMode::Fixed(Color::White)).unwrap();

    assert!(matches!(session.autoplay_iteration(), IterationOutcome::Rejected { .. }));
    assert!(matches!(session.autoplay_iteration(), IterationOutcome::Rejected { .. }));
    assert_eq!(searches(&log), 2);
}

#[test]
fn opponent_reply_is_inferred_between_our_moves() {
    let table = SimulatedTable::new(6);
    let (mut session, log) = scripted_session(&table);
    session.enable_autoplay(ColorMode::Fixed(Color::White)).unwrap();

    let first = session.autoplay_iteration();
    assert!(matches!(first, IterationOutcome::Played { .. }), "{first:?}");
    assert_eq!(session.tracker().history(), table.moves().as_slice());
    assert!(session.autoplay().last_queried.is_none());

    let second = session.autoplay_iteration();
    assert!(matches!(second, IterationOutcome::Played { .. }), "{second:?}");
    assert_eq!(table.moves().len(), 3);
    assert_eq!(session.tracker().history(), table.moves().as_slice());
    assert!(matches!(
        session.status().last_reconcile,
        Some(ReconcileOutcome::InferredMove { .. })
    ));
    assert_eq!(searches(&log), 2);
}

#[test]
fn external_move_after_e4_is_inferred_as_e5() {
    let table = SimulatedTable::new(7);
    table.set_auto_reply(false);
    let (mut session, _) = scripted_session(&table);
    session.set_position(None, &["e2e4"]).unwrap();
    table.play_external("e2e4").unwrap();
    table.play_external("e7e5").unwrap();

    let outcome = session.reconcile_now().unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::InferredMove {
            mv: "e7e5".parse().unwrap()
        }
    );
    let moves: Vec<String> = session.tracker().history().iter().map(|m| m.to_string()).collect();
    assert_eq!(moves, ["e2e4", "e7e5"]);
    assert_eq!(session.status().side_to_move, "white");
}

#[test]
fn several_missed_plies_resync_from_the_move_list() {
    let table = SimulatedTable::new(8);
    table.set_auto_reply(false);
    let (mut session, _) = scripted_session(&table);
    for mv in ["e4", "e5", "Nf3", "Nc6"] {
        table.play_external(mv).unwrap();
    }
    session.set_position(None, &["e2e4"]).unwrap();

    assert_eq!(session.reconcile_now().unwrap(), ReconcileOutcome::FullResync { plies: 4 });
    assert_eq!(session.tracker().history(), table.moves().as_slice());
}

#[test]
fn withheld_move_list_leaves_a_divergence() {
    let table = SimulatedTable::new(9);
    table.set_auto_reply(false);
    table.set_withhold_move_list(true);
    let (mut session, log) = scripted_session(&table);
    session.set_position(None, &["e2e4"]).unwrap();
    for mv in ["e4", "e5", "Nf3"] {
        table.play_external(mv).unwrap();
    }
    session.enable_autoplay(ColorMode::Fixed(Color::Black)).unwrap();

    let outcome = session.autoplay_iteration();
    assert!(matches!(outcome, IterationOutcome::Diverged { .. }), "{outcome:?}");
    assert_eq!(session.tracker().history().len(), 1);
    assert!(session.status().last_divergence.is_some());
    assert_eq!(searches(&log), 0);
}

#[test]
fn flipped_board_starts_a_new_puzzle() {
    let table = SimulatedTable::new(10);
    let (mut session, log) = scripted_session(&table);
    session.enable_autoplay(ColorMode::AutoDetect).unwrap();

    let first = session.autoplay_iteration();
    assert!(matches!(first, IterationOutcome::Played { .. }), "{first:?}");
    assert_eq!(session.status().playing_color, Some("white"));
    let games_before = new_games(&log);

    let puzzle = "4k3/8/8/8/8/8/4P3/4K3 b - - 0 1";
    table.load(puzzle, false).unwrap();
    let changed = session.autoplay_iteration();
    assert_eq!(changed, IterationOutcome::OrientationChanged { playing: "black" });
    assert_eq!(session.tracker().starting_position().fen(), puzzle);
    assert!(session.tracker().history().is_empty());
    // 乖離後の再照合で 1 回だけ新規対局を送る
    assert_eq!(new_games(&log), games_before + 1);

    let played = session.autoplay_iteration();
    assert!(matches!(played, IterationOutcome::Played { .. }), "{played:?}");
    assert_eq!(table.moves().len(), 1);
    assert_eq!(session.tracker().history(), table.moves().as_slice());
}

#[test]
fn custom_start_turn_is_corrected_once_the_indicator_appears() {
    let table = SimulatedTable::new(14);
    let puzzle = "4k3/8/8/8/8/8/4P3/4K3 b - - 0 1";
    table.load(puzzle, true).unwrap();
    table.set_show_turn(false);
    let (mut session, log) = scripted_session(&table);
    session.enable_autoplay(ColorMode::Fixed(Color::Black)).unwrap();

    let hidden = session.autoplay_iteration();
    assert_eq!(
        hidden,
        IterationOutcome::Blocked {
            block: GateBlock::NoTurnIndicator
        }
    );
    assert_eq!(session.status().side_to_move, "white");
    let games_before = new_games(&log);

    table.set_show_turn(true);
    let played = session.autoplay_iteration();
    assert!(matches!(played, IterationOutcome::Played { .. }), "{played:?}");
    assert_eq!(session.tracker().starting_position().fen(), puzzle);
    assert_eq!(table.executed(), 1);
    assert_eq!(session.tracker().history(), table.moves().as_slice());
    assert_eq!(new_games(&log), games_before + 1);
    assert_eq!(searches(&log), 1);
}

#[test]
fn new_game_after_a_finished_one_is_picked_up() {
    let table = SimulatedTable::new(15);
    table.set_auto_reply(false);
    let (mut session, log) = scripted_session(&table);
    for mv in ["e4", "e5", "Nf3"] {
        table.play_external(mv).unwrap();
    }
    session.set_position(None, &["e2e4", "e7e5", "g1f3"]).unwrap();
    session.enable_autoplay(ColorMode::Fixed(Color::White)).unwrap();
    let games_before = new_games(&log);

    table.new_game(true);
    let outcome = session.autoplay_iteration();
    assert!(matches!(outcome, IterationOutcome::Played { .. }), "{outcome:?}");
    assert_eq!(table.moves().len(), 1);
    assert_eq!(session.tracker().history(), table.moves().as_slice());
    assert!(session.tracker().starting_position().is_standard());
    assert_eq!(new_games(&log), games_before + 1);
}

#[test]
fn new_game_is_reported_by_an_explicit_reconcile() {
    let table = SimulatedTable::new(16);
    table.set_auto_reply(false);
    let (mut session, log) = scripted_session(&table);
    table.play_external("d4").unwrap();
    session.set_position(None, &["d2d4"]).unwrap();
    let games_before = new_games(&log);

    table.new_game(true);
    assert_eq!(session.reconcile_now().unwrap(), ReconcileOutcome::StandardStartDetected);
    assert!(session.tracker().history().is_empty());
    assert_eq!(new_games(&log), games_before + 1);
}

#[test]
fn stop_handle_cuts_a_suggestion_short() {
    let table = SimulatedTable::new(17);
    let mut session: SimSession = Session::new(
        table.clone(),
        table.clone(),
        instant_settings(),
        SearchMode::Nodes { nodes: 1000 },
    );
    assert!(session.stop_handle().is_none());
    let mut cfg = EngineConfig::new("mock", env!("CARGO_BIN_EXE_rchess-mock-uci"));
    cfg.args = vec!["--wait-for-stop".to_string()];
    session.enable_engine(cfg).unwrap();

    let handle = session.stop_handle().unwrap();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        handle.request();
    });
    let best = session.suggest_move().unwrap();
    stopper.join().unwrap();
    assert!(best.mv.is_some());
    assert_eq!(best.info.nodes, Some(1000));
    session.shutdown();
}

#[test]
fn inactive_game_and_disabled_autoplay_do_nothing() {
    let table = SimulatedTable::new(11);
    let (mut session, log) = scripted_session(&table);
    assert_eq!(session.autoplay_iteration(), IterationOutcome::Disabled);

    session.enable_autoplay(ColorMode::Fixed(Color::White)).unwrap();
    table.set_active(false);
    assert_eq!(session.autoplay_iteration(), IterationOutcome::GameInactive);
    assert_eq!(searches(&log), 0);
}

#[test]
fn finished_game_pauses_autoplay() {
    let table = SimulatedTable::new(12);
    table.set_auto_reply(false);
    let (mut session, log) = scripted_session(&table);
    for mv in ["f3", "e5", "g4", "Qh4#"] {
        table.play_external(mv).unwrap();
    }
    session.reset_position(None).unwrap();
    session.enable_autoplay(ColorMode::Fixed(Color::White)).unwrap();

    let outcome = session.autoplay_iteration();
    assert_eq!(
        outcome,
        IterationOutcome::GameOver {
            terminal: Terminal::Checkmate
        }
    );
    assert_eq!(session.tracker().history().len(), 4);
    assert_eq!(searches(&log), 0);
}

#[test]
fn full_game_against_the_stub_engine() {
    let table = SimulatedTable::new(2024);
    let mut session: SimSession = Session::new(
        table.clone(),
        table.clone(),
        instant_settings(),
        SearchMode::Nodes { nodes: 500 },
    );
    session
        .enable_engine(EngineConfig::new("mock", env!("CARGO_BIN_EXE_rchess-mock-uci")))
        .unwrap();
    session.enable_autoplay(ColorMode::Fixed(Color::White)).unwrap();

    let mut played = 0;
    for _ in 0..60 {
        match session.autoplay_iteration() {
            IterationOutcome::Played { mv, .. } => {
                played += 1;
                assert_eq!(session.tracker().history().last(), Some(&mv));
                assert_eq!(session.tracker().history(), table.moves().as_slice());
            }
            IterationOutcome::GameOver { terminal } => {
                assert_eq!(table.terminal(), Some(terminal));
                break;
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert!(played > 0);

    let replayed = session.tracker().replayed_position().unwrap();
    assert_eq!(oracle::fen_of(&replayed), oracle::fen_of(session.tracker().derived_position()));
    session.shutdown();
    assert!(session.engine().is_none());
}

#[test]
fn driver_plays_on_view_events() {
    let table = SimulatedTable::new(13);
    let events = table.subscribe();
    let (mut session, _) = scripted_session(&table);
    session.enable_autoplay(ColorMode::Fixed(Color::White)).unwrap();
    let session = Mutex::new(session);
    let shutdown = AtomicBool::new(false);

    let mut played = 0;
    let iterations = run_driver(
        &session,
        &events,
        Duration::from_millis(20),
        Duration::from_millis(1),
        &shutdown,
        |outcome| {
            if matches!(outcome, IterationOutcome::Played { .. }) {
                played += 1;
            }
            if played >= 3 || matches!(outcome, IterationOutcome::GameOver { .. }) {
                shutdown.store(true, Ordering::Relaxed);
            }
        },
    );
    assert!(iterations >= played);
    assert!((1..=3).contains(&played));
    let session = session.into_inner().unwrap();
    assert_eq!(session.tracker().history(), table.moves().as_slice());
}
