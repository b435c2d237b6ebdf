use shakmaty::Color;

use super::config::{EngineConfig, SearchMode};
use super::time_control::TimeBudget;
use super::{BestMove, ReadyState, SearchEngine, SearchLimits, StopHandle};
use crate::error::Result;
use crate::oracle::{CoordMove, StartingPosition, color_label};

/// 有効化中のエンジン 1 本と、その探索設定・持ち時間。
///
/// エンジンの切り替えは作り直しで行い、生きているセッションの設定は書き換えない。
/// 探索モードだけは [`EngineSession::configure`] で差し替えられる。
pub struct EngineSession {
    engine: Box<dyn SearchEngine>,
    config: EngineConfig,
    mode: SearchMode,
    budget: Option<TimeBudget>,
}

fn budget_for(mode: &SearchMode) -> Option<TimeBudget> {
    match *mode {
        SearchMode::Nodes { .. } => None,
        SearchMode::Clock {
            initial_ms,
            increment_ms,
            clock_policy,
        } => Some(TimeBudget::new(initial_ms, increment_ms, clock_policy)),
    }
}

impl EngineSession {
    pub fn new(engine: Box<dyn SearchEngine>, config: EngineConfig, mode: SearchMode) -> Self {
        let budget = budget_for(&mode);
        Self {
            engine,
            config,
            mode,
            budget,
        }
    }

    pub fn label(&self) -> &str {
        self.engine.label()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mode(&self) -> &SearchMode {
        &self.mode
    }

    pub fn budget(&self) -> Option<&TimeBudget> {
        self.budget.as_ref()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.engine.ready_state()
    }

    pub fn is_ready(&mut self) -> bool {
        self.engine.is_ready()
    }

    /// 探索モードを差し替える。持ち時間は初期値から数え直す。
    pub fn configure(&mut self, mode: SearchMode) {
        log::info!("{}: search mode {:?}", self.label(), mode);
        self.budget = budget_for(&mode);
        self.mode = mode;
    }

    pub fn limits_for(&self, side: Color) -> SearchLimits {
        match (&self.mode, &self.budget) {
            (SearchMode::Clock { .. }, Some(budget)) => SearchLimits::Clock {
                args: budget.time_args(),
                side,
            },
            (SearchMode::Nodes { nodes }, _) => SearchLimits::Nodes(*nodes),
            (SearchMode::Clock { initial_ms, increment_ms, .. }, None) => SearchLimits::Clock {
                args: super::TimeArgs {
                    wtime: *initial_ms,
                    btime: *initial_ms,
                    winc: *increment_ms,
                    binc: *increment_ms,
                },
                side,
            },
        }
    }

    /// 開始局面が変わったときに呼ぶ。持ち時間も方針に従って戻す。
    pub fn new_game(&mut self) -> Result<()> {
        if let Some(budget) = &mut self.budget {
            budget.on_new_position();
        }
        self.engine.new_game()
    }

    /// 局面を送ってから `side` の手番として探索する。
    pub fn search_position(
        &mut self,
        start: &StartingPosition,
        moves: &[CoordMove],
        side: Color,
    ) -> Result<BestMove> {
        let limits = self.limits_for(side);
        self.engine.set_position(start, moves)?;
        let result = self.engine.search(&limits)?;
        log::debug!(
            "{}: {} searched {} ms, best {:?}",
            self.label(),
            color_label(side),
            result.elapsed_ms,
            result.mv.map(|m| m.to_string())
        );
        Ok(result)
    }

    /// 着手が確定した探索の消費時間を、探索した側に課す。
    pub fn charge(&mut self, side: Color, elapsed_ms: u64) {
        if let Some(budget) = &mut self.budget {
            budget.update_after_move(side, elapsed_ms);
        }
    }

    /// 探索を別スレッドから打ち切るためのハンドル。
    pub fn stop_handle(&self) -> StopHandle {
        self.engine.stop_handle()
    }

    pub fn shutdown(&mut self) {
        log::info!("{}: shutting down engine", self.label());
        self.engine.quit();
    }
}
