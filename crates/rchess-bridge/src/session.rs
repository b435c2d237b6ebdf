//! オペレータ操作と自動対局ループが共有する文脈オブジェクト。
//!
//! 局面記録・エンジン・自動対局状態・外部ビューをひとまとめに所有する。
//! 静的な大域状態は持たない。構築は起動時、後始末は [`Session::shutdown`]。

use serde::Serialize;
use shakmaty::Position;

use crate::autoplay::{AutoplaySettings, AutoplayState, BusyFlag, ColorMode, Iteration, IterationOutcome};
use crate::engine::{
    BestMove, EngineConfig, EngineProcess, EngineSession, ReadyState, SearchEngine, SearchMode,
    StopHandle, TimeBudget,
};
use crate::error::{BridgeError, CommandError, ErrorCode, Result};
use crate::oracle::{self, CoordMove, StartingPosition, color_label};
use crate::reconcile::{self, ReconcileOutcome};
use crate::tracker::PositionTracker;
use crate::view::{BoardSnapshot, MoveExecutor, ViewSnapshotProvider};

/// 設定からエンジンを起動する関数。既定は [`EngineProcess::start`]。
pub type EngineLauncher = Box<dyn FnMut(&EngineConfig) -> Result<Box<dyn SearchEngine>> + Send>;

fn launch_process(cfg: &EngineConfig) -> Result<Box<dyn SearchEngine>> {
    Ok(Box::new(EngineProcess::start(cfg)?))
}

/// [`Session::status`] の応答。
#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub engine: Option<EngineStatus>,
    pub autoplay_enabled: bool,
    pub color_mode: &'static str,
    pub playing_color: Option<&'static str>,
    pub busy: bool,
    pub starting_position: StartingPosition,
    pub moves: Vec<CoordMove>,
    pub fen: String,
    pub side_to_move: &'static str,
    pub last_queried: Option<String>,
    pub last_reconcile: Option<ReconcileOutcome>,
    pub last_divergence: Option<String>,
    pub last_iteration: Option<IterationOutcome>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EngineStatus {
    pub name: String,
    pub state: ReadyState,
    pub mode: SearchMode,
    pub budget: Option<TimeBudget>,
}

pub struct Session<V, X> {
    tracker: PositionTracker,
    engine: Option<EngineSession>,
    autoplay: AutoplayState,
    view: V,
    executor: X,
    settings: AutoplaySettings,
    search_mode: SearchMode,
    launcher: EngineLauncher,
    last_reconcile: Option<ReconcileOutcome>,
    last_divergence: Option<String>,
    last_iteration: Option<IterationOutcome>,
}

fn engine_not_enabled() -> CommandError {
    CommandError::new(ErrorCode::EngineNotEnabled, "no engine is enabled")
        .with_remedy("engine enable <profile>")
}

impl<V, X> Session<V, X>
where
    V: ViewSnapshotProvider,
    X: MoveExecutor,
{
    pub fn new(view: V, executor: X, settings: AutoplaySettings, search_mode: SearchMode) -> Self {
        Self {
            tracker: PositionTracker::new(),
            engine: None,
            autoplay: AutoplayState::default(),
            view,
            executor,
            settings,
            search_mode,
            launcher: Box::new(launch_process),
            last_reconcile: None,
            last_divergence: None,
            last_iteration: None,
        }
    }

    /// エンジンの起動方法を差し替える（テスト用の偽エンジンなど）。
    pub fn with_launcher<F, E>(mut self, mut launch: F) -> Self
    where
        F: FnMut(&EngineConfig) -> Result<E> + Send + 'static,
        E: SearchEngine + 'static,
    {
        self.launcher = Box::new(move |cfg: &EngineConfig| -> Result<Box<dyn SearchEngine>> {
            Ok(Box::new(launch(cfg)?))
        });
        self
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn autoplay(&self) -> &AutoplayState {
        &self.autoplay
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.autoplay.busy_flag()
    }

    pub fn engine(&self) -> Option<&EngineSession> {
        self.engine.as_ref()
    }

    /// 有効なエンジンの停止ハンドル。探索中の `suggest_move` や自動対局の反復を
    /// 別スレッドから打ち切れる。エンジンを作り直したら取り直す。
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.engine.as_ref().map(EngineSession::stop_handle)
    }

    // ---- エンジン ----

    /// エンジンを起動して有効にする。既に有効なものがあれば先に落とす。
    pub fn enable_engine(&mut self, config: EngineConfig) -> Result<(), CommandError> {
        if let Some(mut old) = self.engine.take() {
            log::info!("replacing engine {}", old.label());
            old.shutdown();
        }
        let engine = (self.launcher)(&config)?;
        let mut session = EngineSession::new(engine, config, self.search_mode);
        session.new_game()?;
        log::info!("engine {} enabled", session.label());
        self.engine = Some(session);
        self.autoplay.last_queried = None;
        Ok(())
    }

    /// エンジンを止める。自動対局も同時に止める。
    pub fn disable_engine(&mut self) -> Result<(), CommandError> {
        let mut engine = self.engine.take().ok_or_else(engine_not_enabled)?;
        if self.autoplay.enabled {
            log::info!("autoplay disabled with the engine");
            self.autoplay.disable();
        }
        engine.shutdown();
        Ok(())
    }

    /// 作り直しによる切り替え。自動対局の状態はそのまま引き継ぐ。
    pub fn switch_engine(&mut self, config: EngineConfig) -> Result<(), CommandError> {
        if self.engine.is_none() {
            return Err(engine_not_enabled());
        }
        self.enable_engine(config)
    }

    pub fn configure_search(&mut self, mode: SearchMode) {
        self.search_mode = mode;
        if let Some(engine) = &mut self.engine {
            engine.configure(mode);
        }
    }

    // ---- 局面 ----

    /// 記録を消去する。`fen` が無ければ平手。
    pub fn reset_position(&mut self, fen: Option<&str>) -> Result<(), CommandError> {
        let start = fen.map(StartingPosition::from_fen).transpose()?;
        self.tracker.reset(start)?;
        self.after_new_position()?;
        log::info!("position reset to {}", self.tracker.starting_position().fen());
        Ok(())
    }

    /// 開始局面と指し手列を明示的に設定する。指し手は座標表記か SAN。
    pub fn set_position(&mut self, fen: Option<&str>, moves: &[&str]) -> Result<(), CommandError> {
        let start = match fen {
            Some(f) => StartingPosition::from_fen(f)?,
            None => StartingPosition::Standard,
        };
        let mut pos = start.to_position()?;
        let mut history = Vec::with_capacity(moves.len());
        for (ply, text) in moves.iter().enumerate() {
            let mv = oracle::parse_move_text(&pos, text).ok_or_else(|| BridgeError::IllegalMove {
                mv: text.to_string(),
                ply,
            })?;
            pos = oracle::apply(&pos, &mv, ply)?;
            history.push(mv);
        }
        self.tracker.adopt(start, history)?;
        self.after_new_position()?;
        log::info!("position set ({} plies)", self.tracker.history().len());
        Ok(())
    }

    fn after_new_position(&mut self) -> Result<()> {
        self.autoplay.last_queried = None;
        self.last_divergence = None;
        if let Some(engine) = &mut self.engine {
            engine.new_game()?;
        }
        Ok(())
    }

    /// 盤上で指された手を手で記録する。自動対局中は受け付けない。
    pub fn play_manual_move(&mut self, text: &str) -> Result<CoordMove, CommandError> {
        if self.autoplay.enabled {
            return Err(CommandError::new(
                ErrorCode::AutoplayActive,
                "manual moves are not accepted while autoplay is enabled",
            )
            .with_remedy("autoplay disable"));
        }
        let mv = oracle::parse_move_text(self.tracker.derived_position(), text)
            .ok_or_else(|| BridgeError::IllegalMove {
                mv: text.to_string(),
                ply: self.tracker.history().len(),
            })?;
        self.tracker.apply_move(mv)?;
        self.autoplay.last_queried = None;
        Ok(mv)
    }

    /// ビューと 1 回照合する。
    pub fn reconcile_now(&mut self) -> Result<ReconcileOutcome, CommandError> {
        let snapshot = BoardSnapshot::fetch(&mut self.view)?;
        let before = self.tracker.starting_position().clone();
        let outcome = reconcile::reconcile(&mut self.tracker, &mut self.view, &snapshot)?;
        self.note_reconcile(&outcome);
        if outcome.starts_new_game() || self.tracker.starting_position() != &before {
            self.after_new_position()?;
        }
        Ok(outcome)
    }

    fn note_reconcile(&mut self, outcome: &ReconcileOutcome) {
        if let ReconcileOutcome::Diverged { detail } = outcome {
            self.last_divergence = Some(detail.clone());
        }
        self.last_reconcile = Some(outcome.clone());
    }

    // ---- 自動対局 ----

    pub fn enable_autoplay(&mut self, mode: ColorMode) -> Result<(), CommandError> {
        if self.engine.is_none() {
            return Err(engine_not_enabled());
        }
        self.autoplay.enable(mode);
        log::info!("autoplay enabled ({})", mode.label());
        Ok(())
    }

    pub fn disable_autoplay(&mut self) {
        if self.autoplay.enabled {
            log::info!("autoplay disabled");
        }
        self.autoplay.disable();
    }

    /// 自動対局を 1 反復進める。トリガからはこれだけを呼ぶ。
    pub fn autoplay_iteration(&mut self) -> IterationOutcome {
        let mut last_reconcile = None;
        let outcome = Iteration {
            tracker: &mut self.tracker,
            engine: self.engine.as_mut(),
            state: &mut self.autoplay,
            view: &mut self.view,
            executor: &mut self.executor,
            settings: &self.settings,
            last_reconcile: &mut last_reconcile,
        }
        .run();
        if let Some(reconciled) = last_reconcile {
            self.note_reconcile(&reconciled);
        }
        if outcome != IterationOutcome::Busy {
            self.last_iteration = Some(outcome.clone());
        }
        outcome
    }

    /// 記録中の局面で 1 回だけ探索する。着手も記録も `last_queried` も変えない。
    pub fn suggest_move(&mut self) -> Result<BestMove, CommandError> {
        let engine = self.engine.as_mut().ok_or_else(engine_not_enabled)?;
        let side = self.tracker.derived_position().turn();
        let best = engine.search_position(
            self.tracker.starting_position(),
            self.tracker.history(),
            side,
        )?;
        Ok(best)
    }

    pub fn status(&self) -> SessionStatus {
        let pos = self.tracker.derived_position();
        SessionStatus {
            engine: self.engine.as_ref().map(|e| EngineStatus {
                name: e.label().to_string(),
                state: e.ready_state(),
                mode: *e.mode(),
                budget: e.budget().copied(),
            }),
            autoplay_enabled: self.autoplay.enabled,
            color_mode: self.autoplay.color_mode.label(),
            playing_color: self.autoplay.playing_color.map(color_label),
            busy: self.autoplay.is_busy(),
            starting_position: self.tracker.starting_position().clone(),
            moves: self.tracker.history().to_vec(),
            fen: oracle::fen_of(pos),
            side_to_move: color_label(pos.turn()),
            last_queried: self.autoplay.last_queried.as_ref().map(|q| q.command.clone()),
            last_reconcile: self.last_reconcile.clone(),
            last_divergence: self.last_divergence.clone(),
            last_iteration: self.last_iteration.clone(),
        }
    }

    /// 自動対局を止め、エンジンを終了させる。何度呼んでもよい。
    pub fn shutdown(&mut self) {
        self.autoplay.disable();
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{InfoSnapshot, SearchLimits};
    use crate::sim::SimulatedTable;
    use std::sync::{Arc, Mutex};

    /// 呼び出しを記録し、局面の最初の合法手を返す偽エンジン。
    struct FirstMove {
        calls: Arc<Mutex<Vec<String>>>,
        start: StartingPosition,
        moves: Vec<CoordMove>,
    }

    impl SearchEngine for FirstMove {
        fn label(&self) -> &str {
            "first-move"
        }
        fn ready_state(&self) -> ReadyState {
            ReadyState::Ready
        }
        fn is_ready(&mut self) -> bool {
            true
        }
        fn new_game(&mut self) -> Result<()> {
            self.calls.lock().unwrap().push("ucinewgame".into());
            Ok(())
        }
        fn set_position(&mut self, start: &StartingPosition, moves: &[CoordMove]) -> Result<()> {
            self.start = start.clone();
            self.moves = moves.to_vec();
            Ok(())
        }
        fn search(&mut self, limits: &SearchLimits) -> Result<BestMove> {
            self.calls.lock().unwrap().push(limits.go_command());
            let pos = oracle::replay(&self.start, &self.moves)?;
            Ok(BestMove {
                mv: oracle::legal_moves(&pos).first().map(|(m, _)| *m),
                ponder: None,
                info: InfoSnapshot::default(),
                elapsed_ms: 0,
            })
        }
        fn stop_handle(&self) -> StopHandle {
            StopHandle::new()
        }
        fn quit(&mut self) {}
    }

    fn session_with_fake() -> (Session<SimulatedTable, SimulatedTable>, Arc<Mutex<Vec<String>>>) {
        let table = SimulatedTable::new(7);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let launcher_calls = Arc::clone(&calls);
        let settings = AutoplaySettings {
            settle_delay: std::time::Duration::ZERO,
            requery_cooldown: None,
        };
        let session = Session::new(table.clone(), table, settings, SearchMode::Nodes { nodes: 1000 })
            .with_launcher(move |_| {
                Ok(FirstMove {
                    calls: Arc::clone(&launcher_calls),
                    start: StartingPosition::Standard,
                    moves: Vec::new(),
                })
            });
        (session, calls)
    }

    #[test]
    fn commands_without_engine_report_a_remedy() {
        let (mut session, _) = session_with_fake();
        let err = session.enable_autoplay(ColorMode::Fixed(shakmaty::Color::White)).unwrap_err();
        assert_eq!(err.code, ErrorCode::EngineNotEnabled);
        assert_eq!(err.remedy.as_deref(), Some("engine enable <profile>"));
        assert_eq!(session.suggest_move().unwrap_err().code, ErrorCode::EngineNotEnabled);
        assert_eq!(session.disable_engine().unwrap_err().code, ErrorCode::EngineNotEnabled);
    }

    #[test]
    fn set_position_accepts_san_and_rejects_illegal_moves() {
        let (mut session, _) = session_with_fake();
        session.set_position(None, &["e4", "c7c5", "Nf3"]).unwrap();
        let moves: Vec<String> = session.tracker().history().iter().map(|m| m.to_string()).collect();
        assert_eq!(moves, ["e2e4", "c7c5", "g1f3"]);

        let err = session.set_position(None, &["e4", "e4"]).unwrap_err();
        assert_eq!(err.code, ErrorCode::IllegalMove);
        assert_eq!(session.tracker().history().len(), 3);

        let err = session.reset_position(Some("not a fen")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPosition);
        assert_eq!(err.remedy.as_deref(), Some("position set <fen>"));
    }

    #[test]
    fn reset_twice_gives_the_same_empty_standard_record() {
        let (mut session, calls) = session_with_fake();
        session.enable_engine(EngineConfig::new("fake", "fake")).unwrap();
        session.play_manual_move("e2e4").unwrap();
        session.reset_position(None).unwrap();
        let first = serde_json::to_value(session.status()).unwrap();
        session.reset_position(None).unwrap();
        let second = serde_json::to_value(session.status()).unwrap();
        assert_eq!(first["moves"], second["moves"]);
        assert_eq!(first["fen"], second["fen"]);
        assert_eq!(second["moves"].as_array().unwrap().len(), 0);
        assert_eq!(second["starting_position"], "standard");
        // 有効化時 + リセット 2 回
        assert_eq!(calls.lock().unwrap().iter().filter(|c| *c == "ucinewgame").count(), 3);
    }

    #[test]
    fn suggestion_leaves_the_record_alone() {
        let (mut session, _) = session_with_fake();
        session.enable_engine(EngineConfig::new("fake", "fake")).unwrap();
        let best = session.suggest_move().unwrap();
        assert!(best.mv.is_some());
        assert!(session.tracker().history().is_empty());
        assert!(session.status().last_queried.is_none());
    }

    #[test]
    fn manual_moves_are_refused_during_autoplay() {
        let (mut session, _) = session_with_fake();
        session.enable_engine(EngineConfig::new("fake", "fake")).unwrap();
        session.enable_autoplay(ColorMode::Fixed(shakmaty::Color::White)).unwrap();
        let err = session.play_manual_move("e2e4").unwrap_err();
        assert_eq!(err.code, ErrorCode::AutoplayActive);
        session.disable_engine().unwrap();
        assert!(!session.autoplay().enabled);
    }
}
