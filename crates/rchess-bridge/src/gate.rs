//! 探索の直前と着手の確定前に行う手番・安全確認。
//!
//! 手番は外部スナップショットの手番表示と、指し手列を再生した局面の両方から
//! 独立に求め、設定上の自分の色と三者一致しない限り先へ進ませない。

use std::time::{Duration, Instant};

use serde::Serialize;
use shakmaty::{Chess, Color, Position};

use crate::error::{BridgeError, Result};
use crate::oracle::{self, CoordMove, color_label};
use crate::tracker::PositionTracker;
use crate::view::{BoardSnapshot, ViewSnapshotProvider};

/// 探索を見送った理由。どれも副作用なしで反復を終える。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GateBlock {
    #[error("board snapshot unavailable: {detail}")]
    SnapshotUnavailable { detail: String },

    #[error("view shows no turn indicator")]
    NoTurnIndicator,

    #[error("view says {view_turn} to move, playing {playing}")]
    NotOurTurn {
        view_turn: &'static str,
        playing: &'static str,
    },

    #[error("view says {view_turn} to move, tracked position says {tracked_turn}")]
    TurnMismatch {
        view_turn: &'static str,
        tracked_turn: &'static str,
    },

    #[error("view placement changed since reconciliation")]
    PlacementChanged,

    #[error("position already queried")]
    AlreadyQueried,

    #[error("tracked history does not replay: {detail}")]
    ReplayFailed { detail: String },
}

/// 最後にエンジンへ送った `position ...` コマンドと送信時刻。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastQuery {
    pub command: String,
    pub sent_at: Instant,
}

impl LastQuery {
    pub fn new(command: String) -> Self {
        Self {
            command,
            sent_at: Instant::now(),
        }
    }

    /// 同じ局面への再問い合わせを抑止するか。`cooldown` が無ければ無期限に抑止する。
    pub fn suppresses(&self, command: &str, cooldown: Option<Duration>) -> bool {
        if self.command != command {
            return false;
        }
        match cooldown {
            Some(c) => self.sent_at.elapsed() < c,
            None => true,
        }
    }
}

/// ゲートを通過したときの記録。直前確認と着手確認で基準に使う。
#[derive(Clone, Debug)]
pub struct Clearance {
    pub snapshot: BoardSnapshot,
    pub position_command: String,
    pub side: Color,
}

/// 手番表示・自分の色・再生局面の手番が一致するか確認する。
pub fn check_turn(
    snapshot: &BoardSnapshot,
    playing: Color,
    expected: &Chess,
) -> Result<Color, GateBlock> {
    let view_turn = snapshot.turn.ok_or(GateBlock::NoTurnIndicator)?;
    if view_turn != playing {
        return Err(GateBlock::NotOurTurn {
            view_turn: color_label(view_turn),
            playing: color_label(playing),
        });
    }
    let tracked = expected.turn();
    if tracked != view_turn {
        return Err(GateBlock::TurnMismatch {
            view_turn: color_label(view_turn),
            tracked_turn: color_label(tracked),
        });
    }
    Ok(view_turn)
}

fn fetch<V: ViewSnapshotProvider + ?Sized>(view: &mut V) -> Result<BoardSnapshot, GateBlock> {
    BoardSnapshot::fetch(view).map_err(|e| GateBlock::SnapshotUnavailable {
        detail: e.to_string(),
    })
}

fn replayed(tracker: &PositionTracker) -> Result<Chess, GateBlock> {
    tracker.replayed_position().map_err(|e| GateBlock::ReplayFailed {
        detail: e.to_string(),
    })
}

/// 探索前の確認。スナップショットを取り直し、手番の三者一致・配置一致・
/// 直前に問い合わせた局面でないことを確かめる。
pub fn pre_search<V: ViewSnapshotProvider + ?Sized>(
    view: &mut V,
    tracker: &PositionTracker,
    playing: Color,
    last_queried: Option<&LastQuery>,
    requery_cooldown: Option<Duration>,
) -> Result<Clearance, GateBlock> {
    let snapshot = fetch(view)?;
    let expected = replayed(tracker)?;
    let side = check_turn(&snapshot, playing, &expected)?;
    if oracle::placement(&expected) != &snapshot.placement {
        return Err(GateBlock::PlacementChanged);
    }
    let position_command = tracker.position_command();
    if last_queried.is_some_and(|q| q.suppresses(&position_command, requery_cooldown)) {
        return Err(GateBlock::AlreadyQueried);
    }
    Ok(Clearance {
        snapshot,
        position_command,
        side,
    })
}

/// エンジン呼び出しの直前にもう一度だけ確認する。
pub fn final_recheck<V: ViewSnapshotProvider + ?Sized>(
    view: &mut V,
    tracker: &PositionTracker,
    clearance: &Clearance,
) -> Result<(), GateBlock> {
    let snapshot = fetch(view)?;
    let expected = replayed(tracker)?;
    check_turn(&snapshot, clearance.side, &expected)?;
    if snapshot.placement != clearance.snapshot.placement {
        return Err(GateBlock::PlacementChanged);
    }
    Ok(())
}

/// 外部で着手した後の確認。配置が変わり、かつ手番が相手に移ったときだけ成功。
pub fn confirm_move(
    before: &BoardSnapshot,
    after: &BoardSnapshot,
    mv: &CoordMove,
    mover: Color,
) -> Result<()> {
    if after.placement == before.placement {
        return Err(BridgeError::MoveRejected {
            mv: mv.to_string(),
            reason: "view did not change".to_string(),
        });
    }
    if after.turn != Some(mover.other()) {
        return Err(BridgeError::MoveRejected {
            mv: mv.to_string(),
            reason: format!("turn indicator did not pass to {}", color_label(mover.other())),
        });
    }
    Ok(())
}
