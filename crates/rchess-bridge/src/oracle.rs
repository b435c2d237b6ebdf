//! チェスのルール判定（合法性・着手適用・終局判定）を `shakmaty` に委譲する薄いラッパ。
//!
//! このモジュールより上の層は `shakmaty` の型を直接組み立てず、
//! [`StartingPosition`] / [`CoordMove`] と本モジュールの関数を通して盤面を扱う。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{
    Board, CastlingMode, Chess, Color, EnPassantMode, Move, Position, PositionError, Role, Square,
};

use crate::error::{BridgeError, Result};

/// 平手初期局面の FEN。
pub const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// 開始局面。平手か、明示的な FEN（パズルや途中局面）のどちらか。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartingPosition {
    Standard,
    Custom(String),
}

impl StartingPosition {
    /// FEN から開始局面を作る。平手と同一の FEN は `Standard` に正規化する。
    pub fn from_fen(fen: &str) -> Result<Self> {
        let pos = position_from_fen(fen)?;
        let normalized = fen_of(&pos);
        if normalized == STANDARD_START_FEN {
            Ok(StartingPosition::Standard)
        } else {
            Ok(StartingPosition::Custom(normalized))
        }
    }

    pub fn to_position(&self) -> Result<Chess> {
        match self {
            StartingPosition::Standard => Ok(Chess::default()),
            StartingPosition::Custom(fen) => position_from_fen(fen),
        }
    }

    pub fn fen(&self) -> &str {
        match self {
            StartingPosition::Standard => STANDARD_START_FEN,
            StartingPosition::Custom(fen) => fen,
        }
    }

    /// UCI `position` コマンドの開始局面部分（`startpos` / `fen <fen>`）。
    pub fn uci_token(&self) -> String {
        match self {
            StartingPosition::Standard => "startpos".to_string(),
            StartingPosition::Custom(fen) => format!("fen {fen}"),
        }
    }

    pub fn is_standard(&self) -> bool {
        matches!(self, StartingPosition::Standard)
    }
}

/// 座標表記の指し手（移動元・移動先・成り駒）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CoordMove {
    pub origin: Square,
    pub destination: Square,
    pub promotion: Option<Role>,
}

impl CoordMove {
    pub fn new(origin: Square, destination: Square, promotion: Option<Role>) -> Self {
        Self {
            origin,
            destination,
            promotion,
        }
    }

    /// ライブラリの指し手から変換する。キャスリングはキングの 2 マス移動で表す。
    pub fn from_move(mv: &Move) -> Option<Self> {
        match mv.to_uci(CastlingMode::Standard) {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => Some(Self::new(from, to, promotion)),
            _ => None,
        }
    }

    /// `pos` における合法手へ解決する。
    pub fn to_move(&self, pos: &Chess) -> Option<Move> {
        let uci = UciMove::Normal {
            from: self.origin,
            to: self.destination,
            promotion: self.promotion,
        };
        uci.to_move(pos).ok()
    }
}

impl fmt::Display for CoordMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.origin, self.destination)?;
        if let Some(role) = self.promotion {
            write!(f, "{}", role.char())?;
        }
        Ok(())
    }
}

impl FromStr for CoordMove {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match UciMove::from_ascii(trimmed.as_bytes()) {
            Ok(UciMove::Normal {
                from,
                to,
                promotion,
            }) => Ok(Self::new(from, to, promotion)),
            _ => Err(BridgeError::InvalidMove(trimmed.to_string())),
        }
    }
}

impl Serialize for CoordMove {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 終局の種類。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
}

/// FEN を局面に変換する。外部観測由来の FEN はキャスリング権や
/// アンパッサン升が配置と矛盾することがあるため、その項目だけを捨てて受理する。
pub fn position_from_fen(fen: &str) -> Result<Chess> {
    let invalid = |reason: String| BridgeError::InvalidPosition {
        fen: fen.to_string(),
        reason,
    };
    let parsed = Fen::from_ascii(fen.trim().as_bytes()).map_err(|e| invalid(e.to_string()))?;
    parsed
        .into_position::<Chess>(CastlingMode::Standard)
        .or_else(PositionError::ignore_invalid_castling_rights)
        .or_else(PositionError::ignore_invalid_ep_square)
        .map_err(|e| invalid(e.to_string()))
}

/// 配置部分（FEN の第 1 フィールド）だけをパースする。
pub fn parse_placement(placement: &str) -> Result<Board> {
    Board::from_ascii_board_fen(placement.trim().as_bytes()).map_err(|e| {
        BridgeError::InvalidPosition {
            fen: placement.to_string(),
            reason: e.to_string(),
        }
    })
}

pub fn standard_placement() -> Board {
    Board::new()
}

pub fn placement(pos: &Chess) -> &Board {
    pos.board()
}

pub fn fen_of(pos: &Chess) -> String {
    Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string()
}

/// 配置部分の文字列表現。
pub fn placement_text(pos: &Chess) -> String {
    let fen = fen_of(pos);
    fen.split_whitespace().next().unwrap_or_default().to_string()
}

/// `pos` に 1 手適用した局面を返す。非合法手なら `IllegalMove`。
pub fn apply(pos: &Chess, mv: &CoordMove, ply: usize) -> Result<Chess> {
    let resolved = mv.to_move(pos).ok_or_else(|| BridgeError::IllegalMove {
        mv: mv.to_string(),
        ply,
    })?;
    pos.clone()
        .play(&resolved)
        .map_err(|_| BridgeError::IllegalMove {
            mv: mv.to_string(),
            ply,
        })
}

/// 開始局面に指し手列を順に適用する。
pub fn replay(start: &StartingPosition, history: &[CoordMove]) -> Result<Chess> {
    let mut pos = start.to_position()?;
    for (ply, mv) in history.iter().enumerate() {
        pos = apply(&pos, mv, ply)?;
    }
    Ok(pos)
}

/// `pos` の合法手をライブラリの列挙順で返す。
pub fn legal_moves(pos: &Chess) -> Vec<(CoordMove, Chess)> {
    pos.legal_moves()
        .iter()
        .filter_map(|m| {
            let coord = CoordMove::from_move(m)?;
            let mut next = pos.clone();
            next.play_unchecked(m);
            Some((coord, next))
        })
        .collect()
}

pub fn terminal(pos: &Chess) -> Option<Terminal> {
    if pos.is_checkmate() {
        Some(Terminal::Checkmate)
    } else if pos.is_stalemate() {
        Some(Terminal::Stalemate)
    } else if pos.is_insufficient_material() {
        Some(Terminal::InsufficientMaterial)
    } else {
        None
    }
}

/// 外部の棋譜表記を指し手に変換する。座標表記を先に試し、だめなら SAN として読む。
pub fn parse_move_text(pos: &Chess, text: &str) -> Option<CoordMove> {
    let trimmed = text.trim();
    if let Ok(coord) = trimmed.parse::<CoordMove>() {
        if coord.to_move(pos).is_some() {
            return Some(coord);
        }
    }
    let san = SanPlus::from_ascii(trimmed.as_bytes()).ok()?;
    let mv = san.san.to_move(pos).ok()?;
    CoordMove::from_move(&mv)
}

pub fn color_label(color: Color) -> &'static str {
    match color {
        Color::White => "white",
        Color::Black => "black",
    }
}

pub fn parse_color(text: &str) -> Option<Color> {
    match text.trim().to_ascii_lowercase().as_str() {
        "w" | "white" => Some(Color::White),
        "b" | "black" => Some(Color::Black),
        _ => None,
    }
}
