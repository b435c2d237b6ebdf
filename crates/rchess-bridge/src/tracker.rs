//! 「これまでに何が指されたか」の唯一の記録。
//!
//! 現局面は開始局面と指し手列から常に導出する。キャッシュは持つが、
//! 指し手列と同時にしか更新しないため、再生結果と食い違うことはない。

use shakmaty::Chess;

use crate::error::Result;
use crate::oracle::{self, CoordMove, StartingPosition};

/// 開始局面・指し手列・導出局面の組。
#[derive(Clone, Debug)]
pub struct GameRecord {
    starting_position: StartingPosition,
    move_history: Vec<CoordMove>,
    derived: Chess,
}

impl GameRecord {
    fn standard() -> Self {
        Self {
            starting_position: StartingPosition::Standard,
            move_history: Vec::new(),
            derived: Chess::default(),
        }
    }

    pub fn starting_position(&self) -> &StartingPosition {
        &self.starting_position
    }

    pub fn move_history(&self) -> &[CoordMove] {
        &self.move_history
    }

    pub fn derived_position(&self) -> &Chess {
        &self.derived
    }
}

pub struct PositionTracker {
    record: GameRecord,
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            record: GameRecord::standard(),
        }
    }

    pub fn record(&self) -> &GameRecord {
        &self.record
    }

    pub fn starting_position(&self) -> &StartingPosition {
        &self.record.starting_position
    }

    pub fn history(&self) -> &[CoordMove] {
        &self.record.move_history
    }

    pub fn derived_position(&self) -> &Chess {
        &self.record.derived
    }

    /// 指し手列を消去し、開始局面を差し替える（`None` なら平手）。
    /// 開始局面の同一性が変わったかどうかを返す。
    pub fn reset(&mut self, start: Option<StartingPosition>) -> Result<bool> {
        let start = start.unwrap_or(StartingPosition::Standard);
        let derived = start.to_position()?;
        let changed = start != self.record.starting_position;
        self.record = GameRecord {
            starting_position: start,
            move_history: Vec::new(),
            derived,
        };
        Ok(changed)
    }

    /// 1 手追加する。非合法手なら `IllegalMove` で、記録は変わらない。
    pub fn apply_move(&mut self, mv: CoordMove) -> Result<()> {
        let ply = self.record.move_history.len();
        let next = oracle::apply(&self.record.derived, &mv, ply)?;
        self.record.move_history.push(mv);
        self.record.derived = next;
        Ok(())
    }

    /// 開始局面と指し手列をまとめて採用する。全手を再生できた場合だけ反映する。
    pub fn adopt(&mut self, start: StartingPosition, history: Vec<CoordMove>) -> Result<bool> {
        let derived = oracle::replay(&start, &history)?;
        let changed = start != self.record.starting_position;
        self.record = GameRecord {
            starting_position: start,
            move_history: history,
            derived,
        };
        Ok(changed)
    }

    /// キャッシュを使わずに開始局面から再生し直した局面。
    pub fn replayed_position(&self) -> Result<Chess> {
        oracle::replay(&self.record.starting_position, &self.record.move_history)
    }

    /// エンジンへ送る `position ...` コマンド。
    pub fn position_command(&self) -> String {
        position_command(&self.record.starting_position, &self.record.move_history)
    }
}

pub fn position_command(start: &StartingPosition, moves: &[CoordMove]) -> String {
    let mut cmd = format!("position {}", start.uci_token());
    if !moves.is_empty() {
        cmd.push_str(" moves");
        for mv in moves {
            cmd.push(' ');
            cmd.push_str(&mv.to_string());
        }
    }
    cmd
}
