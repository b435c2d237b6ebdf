//! 外部スナップショットと内部記録の照合。
//!
//! 優先順位:
//! 1. 指し手列が空: 棋譜スナップショットの全採用 → 平手判定 → 任意開始局面として記録。
//!    配置が記録どおりでも、任意開始局面の手番表示が記録と違えば手番を直して記録し直す。
//! 2. 指し手列がある: 配置一致なら何もしない。不一致なら 1 手ぶんの合法手を総当たりし、
//!    最初に配置が一致した手を相手の着手として推定する。
//! 3. 推定できなければ棋譜スナップショットでの全再同期を試み、それも失敗したら乖離を報告する。
//!
//! 複数の合法手が同じ配置を生む場合はライブラリの列挙順で最初の手を採る。
//! これは近似であり、正しさの保証ではない。

use serde::Serialize;
use shakmaty::{Board, Position};

use crate::error::{BridgeError, Result};
use crate::oracle::{self, CoordMove, StartingPosition};
use crate::tracker::PositionTracker;
use crate::view::{BoardSnapshot, ViewSnapshotProvider};

/// 照合結果。`Diverged` 以外は同期済み。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Unchanged,
    InferredMove { mv: CoordMove },
    FullResync { plies: usize },
    StandardStartDetected,
    CustomStartDetected { fen: String },
    Diverged { detail: String },
}

impl ReconcileOutcome {
    pub fn is_synced(&self) -> bool {
        !matches!(self, ReconcileOutcome::Diverged { .. })
    }

    /// 開始局面を新しく検出した（エンジンに新規対局を知らせるべき）結果か。
    pub fn starts_new_game(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::StandardStartDetected | ReconcileOutcome::CustomStartDetected { .. }
        )
    }

    pub fn into_result(self) -> Result<Self> {
        match self {
            ReconcileOutcome::Diverged { detail } => Err(BridgeError::Desynchronization(detail)),
            other => Ok(other),
        }
    }
}

/// スナップショットを 1 枚取り込み、記録を合わせる。
pub fn reconcile<V: ViewSnapshotProvider + ?Sized>(
    tracker: &mut PositionTracker,
    view: &mut V,
    snapshot: &BoardSnapshot,
) -> Result<ReconcileOutcome> {
    if tracker.history().is_empty() {
        return reconcile_empty(tracker, view, snapshot);
    }

    let expected = tracker.derived_position().clone();
    if oracle::placement(&expected) == &snapshot.placement {
        return Ok(ReconcileOutcome::Unchanged);
    }

    if let Some(mv) = infer_single_ply(&expected, &snapshot.placement) {
        tracker.apply_move(mv)?;
        log::info!("inferred opponent move {mv}");
        return Ok(ReconcileOutcome::InferredMove { mv });
    }

    if let Some(plies) = try_adopt_move_list(tracker, view, &snapshot.placement) {
        log::info!("resynchronized from move list ({plies} plies)");
        return Ok(adopted(plies));
    }

    let detail = format!(
        "expected placement {} after {} plies, view shows {}",
        oracle::placement_text(&expected),
        tracker.history().len(),
        snapshot.raw()
    );
    log::warn!("irreconcilable divergence: {detail}");
    Ok(ReconcileOutcome::Diverged { detail })
}

fn reconcile_empty<V: ViewSnapshotProvider + ?Sized>(
    tracker: &mut PositionTracker,
    view: &mut V,
    snapshot: &BoardSnapshot,
) -> Result<ReconcileOutcome> {
    if oracle::placement(tracker.derived_position()) == &snapshot.placement {
        return correct_custom_turn(tracker, snapshot);
    }

    if let Some(plies) = try_adopt_move_list(tracker, view, &snapshot.placement) {
        log::info!("adopted move list from view ({plies} plies)");
        return Ok(adopted(plies));
    }

    if snapshot.is_standard_placement() {
        tracker.reset(None)?;
        log::info!("standard initial placement detected");
        return Ok(ReconcileOutcome::StandardStartDetected);
    }

    let start = StartingPosition::from_fen(&snapshot.to_start_fen())?;
    let fen = start.fen().to_string();
    tracker.reset(Some(start))?;
    log::info!("custom starting position detected: {fen}");
    Ok(ReconcileOutcome::CustomStartDetected { fen })
}

/// 空の棋譜を採用したときは平手の新規対局として扱う。
fn adopted(plies: usize) -> ReconcileOutcome {
    if plies == 0 {
        ReconcileOutcome::StandardStartDetected
    } else {
        ReconcileOutcome::FullResync { plies }
    }
}

/// 任意開始局面は手番表示の無いスナップショットから白番として記録されうる。
/// 配置が同じまま手番表示が食い違ったら、観測した手番で記録し直す。
fn correct_custom_turn(
    tracker: &mut PositionTracker,
    snapshot: &BoardSnapshot,
) -> Result<ReconcileOutcome> {
    let Some(observed) = snapshot.turn else {
        return Ok(ReconcileOutcome::Unchanged);
    };
    if tracker.starting_position().is_standard() || tracker.derived_position().turn() == observed
    {
        return Ok(ReconcileOutcome::Unchanged);
    }
    let start = StartingPosition::from_fen(&snapshot.to_start_fen())?;
    let fen = start.fen().to_string();
    tracker.reset(Some(start))?;
    log::info!(
        "custom starting position re-recorded with {} to move: {fen}",
        oracle::color_label(observed)
    );
    Ok(ReconcileOutcome::CustomStartDetected { fen })
}

/// `expected` から 1 手で `target` の配置になる合法手を探す。
pub fn infer_single_ply(expected: &shakmaty::Chess, target: &Board) -> Option<CoordMove> {
    let mut matches = oracle::legal_moves(expected)
        .into_iter()
        .filter(|(_, next)| oracle::placement(next) == target)
        .map(|(mv, _)| mv);
    let first = matches.next()?;
    let others: Vec<String> = matches.map(|m| m.to_string()).collect();
    if !others.is_empty() {
        log::debug!("ambiguous single-ply inference: chose {first}, also matched {others:?}");
    }
    Some(first)
}

/// 棋譜スナップショットを平手から再生し、配置が一致すれば採用する。
/// 採用した手数を返す。棋譜が取れない・再生不能・配置不一致なら `None`。
/// 空の棋譜は平手の配置と一致するときだけ採用される。
fn try_adopt_move_list<V: ViewSnapshotProvider + ?Sized>(
    tracker: &mut PositionTracker,
    view: &mut V,
    target: &Board,
) -> Option<usize> {
    let texts = view.move_list_snapshot()?;
    let mut pos = shakmaty::Chess::default();
    let mut moves = Vec::with_capacity(texts.len());
    for (ply, text) in texts.iter().enumerate() {
        let Some(mv) = oracle::parse_move_text(&pos, text) else {
            log::debug!("move list rejected at ply {ply}: '{text}'");
            return None;
        };
        pos = match oracle::apply(&pos, &mv, ply) {
            Ok(next) => next,
            Err(e) => {
                log::debug!("move list rejected: {e}");
                return None;
            }
        };
        moves.push(mv);
    }
    if oracle::placement(&pos) != target {
        log::debug!(
            "move list replays to {}, which differs from the board",
            oracle::placement_text(&pos)
        );
        return None;
    }
    let plies = moves.len();
    match tracker.adopt(StartingPosition::Standard, moves) {
        Ok(_) => Some(plies),
        Err(e) => {
            log::debug!("move list adoption failed: {e}");
            None
        }
    }
}
