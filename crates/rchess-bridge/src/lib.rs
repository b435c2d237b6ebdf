//! UCI チェスエンジンと、スナップショット越しにしか観測できない外部の対局画面を橋渡しする。
//!
//! - [`oracle`]: ルール判定（`shakmaty` への委譲）
//! - [`engine`]: UCI エンジンのサブプロセス管理
//! - [`tracker`]: 開始局面と指し手列の記録
//! - [`reconcile`]: 外部スナップショットとの照合
//! - [`gate`]: 探索前・着手後の手番と安全確認
//! - [`autoplay`] / [`trigger`]: 自動対局ループと起動トリガ
//! - [`session`]: 上記をまとめる文脈オブジェクトとオペレータ操作
//! - [`sim`]: メモリ上で完結する模擬対局画面

pub mod autoplay;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod oracle;
pub mod reconcile;
pub mod session;
pub mod sim;
pub mod tracker;
pub mod trigger;
pub mod util;
pub mod view;

pub use autoplay::{AutoplaySettings, ColorMode, IterationOutcome};
pub use config::BridgeConfig;
pub use engine::{BestMove, EngineConfig, EngineProcess, SearchEngine, SearchLimits, SearchMode};
pub use error::{BridgeError, CommandError, ErrorCode};
pub use oracle::{CoordMove, StartingPosition};
pub use reconcile::ReconcileOutcome;
pub use session::Session;
pub use tracker::PositionTracker;
pub use view::{MoveExecutor, ViewSnapshotProvider};
