//! 自動対局ループの 1 反復。
//!
//! 反復は「照合 → 向きの自動判定 → 終局判定 → ゲート → 探索 → 外部着手 → 着手確認 → 記録」
//! の順に進む。どの段で止まっても、反復内のエラーは境界で捕捉して
//! [`IterationOutcome`] として返す。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use shakmaty::Color;

use crate::engine::EngineSession;
use crate::error::{BridgeError, ErrorCode, Result};
use crate::gate::{self, GateBlock, LastQuery};
use crate::oracle::{self, CoordMove, Terminal, color_label};
use crate::reconcile::{self, ReconcileOutcome};
use crate::tracker::PositionTracker;
use crate::view::{BoardSnapshot, MoveExecutor, ViewSnapshotProvider};

/// 自分の色の決め方。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorMode {
    Fixed(Color),
    /// ビューの向き（手前側の色）に従う
    AutoDetect,
}

impl ColorMode {
    pub fn label(self) -> &'static str {
        match self {
            ColorMode::Fixed(c) => color_label(c),
            ColorMode::AutoDetect => "auto",
        }
    }
}

/// 反復の再入防止フラグ。トリガ側と共有できるよう `Arc` で持つ。
#[derive(Clone, Debug, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    /// 空いていれば確保する。使用中なら `None`（そのトリガは捨てる）。
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// drop でフラグを解放する。反復がエラーやパニックで抜けても必ず戻る。
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// ループの調整値。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AutoplaySettings {
    /// 外部着手の後、確認用スナップショットを取るまで待つ時間
    pub settle_delay: Duration,
    /// 同一局面への再問い合わせを許すまでの時間。`None` なら許さない
    pub requery_cooldown: Option<Duration>,
}

impl Default for AutoplaySettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(150),
            requery_cooldown: None,
        }
    }
}

#[derive(Debug)]
pub struct AutoplayState {
    pub enabled: bool,
    pub color_mode: ColorMode,
    pub playing_color: Option<Color>,
    pub last_queried: Option<LastQuery>,
    last_orientation: Option<Color>,
    busy: BusyFlag,
}

impl Default for AutoplayState {
    fn default() -> Self {
        Self {
            enabled: false,
            color_mode: ColorMode::AutoDetect,
            playing_color: None,
            last_queried: None,
            last_orientation: None,
            busy: BusyFlag::default(),
        }
    }
}

impl AutoplayState {
    pub fn enable(&mut self, mode: ColorMode) {
        self.enabled = true;
        self.color_mode = mode;
        self.playing_color = match mode {
            ColorMode::Fixed(c) => Some(c),
            ColorMode::AutoDetect => None,
        };
        self.last_orientation = None;
        self.last_queried = None;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }
}

/// 1 反復の結果。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IterationOutcome {
    Disabled,
    /// 別の反復が走っていたのでトリガを捨てた
    Busy,
    GameInactive,
    EngineUnavailable,
    /// 自動判定モードで向きが取れず、自分の色が決まらない
    NoColor,
    Diverged { detail: String },
    GameOver { terminal: Terminal },
    /// 向きが変わったので新しい局面として記録し直した。着手は次の反復で行う
    OrientationChanged { playing: &'static str },
    Blocked { block: GateBlock },
    /// エンジンが指し手なし（`bestmove (none)`）を返した
    NoMove,
    Rejected { mv: CoordMove, reason: String },
    Played { mv: CoordMove, elapsed_ms: u64 },
    Failed { code: ErrorCode, message: String },
}

/// 反復 1 回ぶんの可変参照の束。
pub struct Iteration<'a, V: ?Sized, X: ?Sized> {
    pub tracker: &'a mut PositionTracker,
    pub engine: Option<&'a mut EngineSession>,
    pub state: &'a mut AutoplayState,
    pub view: &'a mut V,
    pub executor: &'a mut X,
    pub settings: &'a AutoplaySettings,
    /// 照合結果の通知先（状態表示用）
    pub last_reconcile: &'a mut Option<ReconcileOutcome>,
}

impl<V, X> Iteration<'_, V, X>
where
    V: ViewSnapshotProvider + ?Sized,
    X: MoveExecutor + ?Sized,
{
    /// 再入防止フラグを確保して 1 反復を実行する。
    pub fn run(mut self) -> IterationOutcome {
        if !self.state.enabled {
            return IterationOutcome::Disabled;
        }
        let Some(_guard) = self.state.busy.try_acquire() else {
            log::debug!("autoplay iteration already running, trigger dropped");
            return IterationOutcome::Busy;
        };
        match self.step() {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("autoplay iteration failed: {e}");
                IterationOutcome::Failed {
                    code: e.code(),
                    message: e.to_string(),
                }
            }
        }
    }

    fn step(&mut self) -> Result<IterationOutcome> {
        if !self.view.is_game_active() {
            log::debug!("game not active, autoplay paused");
            return Ok(IterationOutcome::GameInactive);
        }
        if !self.engine.as_mut().is_some_and(|e| e.is_ready()) {
            return Ok(IterationOutcome::EngineUnavailable);
        }

        let divergence = self.sync()?.divergence;

        // 盤の反転（新しいパズル）は同じ反復の乖離より優先する
        let playing = match (self.resolve_color()?, divergence) {
            (ColorResolution::Changed(c), _) => {
                return Ok(IterationOutcome::OrientationChanged {
                    playing: color_label(c),
                });
            }
            (_, Some(detail)) => return Ok(IterationOutcome::Diverged { detail }),
            (ColorResolution::Playing(c), None) => c,
            (ColorResolution::Unknown, None) => return Ok(IterationOutcome::NoColor),
        };

        if let Some(terminal) = oracle::terminal(self.tracker.derived_position()) {
            log::info!("game over ({terminal:?}), autoplay paused");
            return Ok(IterationOutcome::GameOver { terminal });
        }

        let clearance = match gate::pre_search(
            self.view,
            self.tracker,
            playing,
            self.state.last_queried.as_ref(),
            self.settings.requery_cooldown,
        ) {
            Ok(c) => c,
            Err(block) => return Ok(self.blocked(block)),
        };
        if let Err(block) = gate::final_recheck(self.view, self.tracker, &clearance) {
            return Ok(self.blocked(block));
        }

        let Some(engine) = self.engine.as_deref_mut() else {
            return Ok(IterationOutcome::EngineUnavailable);
        };
        self.state.last_queried = Some(LastQuery::new(clearance.position_command.clone()));
        let best = engine.search_position(
            self.tracker.starting_position(),
            self.tracker.history(),
            clearance.side,
        )?;
        let Some(mv) = best.mv else {
            log::info!("engine reports no move for {}", color_label(clearance.side));
            return Ok(IterationOutcome::NoMove);
        };
        // エンジンの返した手も、外部へ入力する前に合法性を確かめる
        oracle::apply(self.tracker.derived_position(), &mv, self.tracker.history().len())?;

        log::info!("playing {mv} as {}", color_label(clearance.side));
        self.executor
            .execute(&mv)
            .map_err(|e| BridgeError::MoveRejected {
                mv: mv.to_string(),
                reason: format!("executor failed: {e:#}"),
            })?;
        if !self.settings.settle_delay.is_zero() {
            std::thread::sleep(self.settings.settle_delay);
        }

        let after = BoardSnapshot::fetch(self.view)?;
        if let Err(e) = gate::confirm_move(&clearance.snapshot, &after, &mv, clearance.side) {
            log::warn!("{e}");
            let reason = match e {
                BridgeError::MoveRejected { reason, .. } => reason,
                other => other.to_string(),
            };
            return Ok(IterationOutcome::Rejected { mv, reason });
        }

        self.tracker.apply_move(mv)?;
        self.state.last_queried = None;
        engine.charge(clearance.side, best.elapsed_ms);
        Ok(IterationOutcome::Played {
            mv,
            elapsed_ms: best.elapsed_ms,
        })
    }

    fn blocked(&self, block: GateBlock) -> IterationOutcome {
        match block {
            GateBlock::AlreadyQueried | GateBlock::NotOurTurn { .. } => {
                log::trace!("gate: {block}");
            }
            _ => log::debug!("gate: {block}"),
        }
        IterationOutcome::Blocked { block }
    }

    /// 照合し、新しい開始局面を検出したらエンジンに新規対局を通知する。
    fn sync(&mut self) -> Result<SyncReport> {
        let snapshot = BoardSnapshot::fetch(self.view)?;
        let before = self.tracker.starting_position().clone();
        let outcome = reconcile::reconcile(self.tracker, self.view, &snapshot)?;
        *self.last_reconcile = Some(outcome.clone());
        if let ReconcileOutcome::Diverged { detail } = outcome {
            return Ok(SyncReport {
                divergence: Some(detail),
                new_game_sent: false,
            });
        }
        let new_game_sent =
            outcome.starts_new_game() || self.tracker.starting_position() != &before;
        if new_game_sent {
            self.start_new_game()?;
        }
        Ok(SyncReport {
            divergence: None,
            new_game_sent,
        })
    }

    fn start_new_game(&mut self) -> Result<()> {
        self.state.last_queried = None;
        if let Some(engine) = self.engine.as_deref_mut() {
            engine.new_game()?;
        }
        Ok(())
    }

    fn resolve_color(&mut self) -> Result<ColorResolution> {
        if let ColorMode::Fixed(c) = self.state.color_mode {
            return Ok(ColorResolution::Playing(c));
        }
        let Some(detected) = self.view.orientation().map(|o| o.bottom_color()) else {
            return Ok(match self.state.playing_color {
                Some(c) => ColorResolution::Playing(c),
                None => ColorResolution::Unknown,
            });
        };
        let previous = self.state.last_orientation.replace(detected);
        self.state.playing_color = Some(detected);
        match previous {
            Some(prev) if prev != detected => {
                log::info!(
                    "orientation changed to {}, treating as a new position",
                    color_label(detected)
                );
                self.tracker.reset(None)?;
                self.state.last_queried = None;
                let report = self.sync()?;
                if let Some(detail) = &report.divergence {
                    log::warn!("resync after orientation change diverged: {detail}");
                }
                if !report.new_game_sent {
                    self.start_new_game()?;
                }
                Ok(ColorResolution::Changed(detected))
            }
            _ => Ok(ColorResolution::Playing(detected)),
        }
    }
}

struct SyncReport {
    /// 乖離の詳細
    divergence: Option<String>,
    new_game_sent: bool,
}

enum ColorResolution {
    Playing(Color),
    Changed(Color),
    Unknown,
}
