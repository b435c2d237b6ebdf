//! 外部ビュー（描画された対局画面）との境界。
//!
//! 観測は盤面スナップショット（FEN 風の文字列）と棋譜スナップショットの 2 系統で、
//! どちらも取得できないことがある。手番・キャスリング欄は信用しきれないため、
//! 照合では配置部分だけを比較する。

use shakmaty::{Board, Color};

use crate::error::{BridgeError, Result};
use crate::oracle::{self, CoordMove, STANDARD_START_FEN};

/// 盤の向き。`white_at_bottom` が真なら白が手前。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Orientation {
    pub white_at_bottom: bool,
}

impl Orientation {
    /// 手前側の色（自動判定モードでの自分の色）。
    pub fn bottom_color(self) -> Color {
        if self.white_at_bottom {
            Color::White
        } else {
            Color::Black
        }
    }
}

/// ビューの観測を提供する協調者。実装はベストエフォートでよい。
pub trait ViewSnapshotProvider {
    /// 配置 + 手番 + キャスリングの FEN 風文字列。取得できなければ `None`。
    fn board_snapshot(&mut self) -> Option<String>;

    /// 指し手列（座標表記または SAN）。提供できなければ `None`。
    fn move_list_snapshot(&mut self) -> Option<Vec<String>>;

    fn orientation(&mut self) -> Option<Orientation>;

    fn is_game_active(&mut self) -> bool;
}

/// 指し手をビューへ物理的に入力する協調者。失敗は `Err` で返し、黙って無視しない。
pub trait MoveExecutor {
    fn execute(&mut self, mv: &CoordMove) -> anyhow::Result<()>;
}

/// パース済みの盤面スナップショット。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub placement: Board,
    /// 手番表示。ビューが手番を示していなければ `None`。
    pub turn: Option<Color>,
    pub castling: Option<String>,
    raw: String,
}

impl BoardSnapshot {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut fields = raw.split_whitespace();
        let placement_field = fields
            .next()
            .ok_or_else(|| BridgeError::ViewUnavailable("empty board snapshot".to_string()))?;
        let placement = oracle::parse_placement(placement_field)?;
        let turn = match fields.next() {
            Some(tok) => Some(oracle::parse_color(tok).ok_or_else(|| {
                BridgeError::InvalidPosition {
                    fen: raw.to_string(),
                    reason: format!("unknown turn indicator '{tok}'"),
                }
            })?),
            None => None,
        };
        let castling = fields.next().map(str::to_string);
        Ok(Self {
            placement,
            turn,
            castling,
            raw: raw.trim().to_string(),
        })
    }

    /// プロバイダから取得してパースする。取得できなければ `ViewUnavailable`。
    pub fn fetch<V: ViewSnapshotProvider + ?Sized>(view: &mut V) -> Result<Self> {
        let raw = view
            .board_snapshot()
            .ok_or_else(|| BridgeError::ViewUnavailable("board snapshot missing".to_string()))?;
        Self::parse(&raw)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_standard_placement(&self) -> bool {
        self.placement == oracle::standard_placement()
    }

    /// このスナップショットを開始局面として使うための完全な FEN。
    /// 手番が無ければ白番、キャスリング欄が無ければ権利なしとみなす。
    pub fn to_start_fen(&self) -> String {
        let placement = self.raw.split_whitespace().next().unwrap_or_default();
        if self.is_standard_placement() && self.turn.unwrap_or(Color::White) == Color::White {
            return STANDARD_START_FEN.to_string();
        }
        let turn = match self.turn.unwrap_or(Color::White) {
            Color::White => 'w',
            Color::Black => 'b',
        };
        let castling = self.castling.as_deref().unwrap_or("-");
        format!("{placement} {turn} {castling} - 0 1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_without_turn_indicator() {
        let snap = BoardSnapshot::parse("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR").unwrap();
        assert!(snap.is_standard_placement());
        assert_eq!(snap.turn, None);
        assert_eq!(snap.to_start_fen(), STANDARD_START_FEN);
    }

    #[test]
    fn snapshot_with_turn_and_castling() {
        let snap =
            BoardSnapshot::parse("rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq").unwrap();
        assert_eq!(snap.turn, Some(Color::White));
        assert_eq!(snap.castling.as_deref(), Some("KQkq"));
        assert!(!snap.is_standard_placement());
        assert_eq!(
            snap.to_start_fen(),
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 1"
        );
    }

    #[test]
    fn snapshot_rejects_garbage() {
        assert!(BoardSnapshot::parse("").is_err());
        assert!(BoardSnapshot::parse("not/a/board").is_err());
        assert!(BoardSnapshot::parse("8/8/8/8/8/8/8/8 x").is_err());
    }
}
