//! エラー分類。
//!
//! 1 回の autoplay 反復内のエラーは反復境界で捕捉してログに残すだけだが、
//! オペレータ操作のエラーは [`CommandError`] として機械可読な理由と
//! 推奨コマンドを添えて呼び出し元へ返す。

use std::time::Duration;

use serde::Serialize;

/// ブリッジ全体で使うエラー型。
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("engine startup failed: {0}")]
    EngineStartup(String),

    #[error("a search is already outstanding")]
    SearchInProgress,

    #[error("engine search exceeded {limit:?} without a result")]
    EngineTimeout { limit: Duration },

    #[error("illegal move {mv} at ply {ply}")]
    IllegalMove { mv: String, ply: usize },

    #[error("internal record and view disagree: {0}")]
    Desynchronization(String),

    #[error("move {mv} was not accepted by the view: {reason}")]
    MoveRejected { mv: String, reason: String },

    #[error("view snapshot unavailable: {0}")]
    ViewUnavailable(String),

    #[error("invalid move text '{0}'")]
    InvalidMove(String),

    #[error("invalid position '{fen}': {reason}")]
    InvalidPosition { fen: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// 外部に公開する安定したエラーコード。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    EngineStartup,
    EngineTimeout,
    SearchInProgress,
    IllegalMove,
    Desynchronization,
    MoveRejected,
    ViewUnavailable,
    InvalidMove,
    InvalidPosition,
    Config,
    Io,
    EngineNotEnabled,
    AutoplayActive,
}

impl BridgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::EngineStartup(_) => ErrorCode::EngineStartup,
            BridgeError::EngineTimeout { .. } => ErrorCode::EngineTimeout,
            BridgeError::SearchInProgress => ErrorCode::SearchInProgress,
            BridgeError::IllegalMove { .. } => ErrorCode::IllegalMove,
            BridgeError::Desynchronization(_) => ErrorCode::Desynchronization,
            BridgeError::MoveRejected { .. } => ErrorCode::MoveRejected,
            BridgeError::ViewUnavailable(_) => ErrorCode::ViewUnavailable,
            BridgeError::InvalidMove(_) => ErrorCode::InvalidMove,
            BridgeError::InvalidPosition { .. } => ErrorCode::InvalidPosition,
            BridgeError::Config(_) => ErrorCode::Config,
            BridgeError::Io(_) => ErrorCode::Io,
        }
    }

    /// オペレータに提示する復旧コマンド。
    pub fn remedy(&self) -> Option<&'static str> {
        match self {
            BridgeError::EngineStartup(_) => Some("engine enable <profile>"),
            BridgeError::EngineTimeout { .. } => Some("engine switch <profile>"),
            BridgeError::Desynchronization(_) => Some("position set <fen>"),
            BridgeError::IllegalMove { .. } => Some("position reset"),
            BridgeError::InvalidPosition { .. } => Some("position set <fen>"),
            _ => None,
        }
    }
}

/// オペレータ操作の失敗。シリアライズしてそのまま応答に載せられる。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remedy: Option<String>,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            remedy: None,
        }
    }

    pub fn with_remedy(mut self, remedy: impl Into<String>) -> Self {
        self.remedy = Some(remedy.into());
        self
    }
}

impl From<BridgeError> for CommandError {
    fn from(err: BridgeError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            remedy: err.remedy().map(str::to_string),
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
