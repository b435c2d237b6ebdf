//! UCI エンジンのサブプロセス管理とプロトコルの枠組み。

pub mod config;
pub mod info;
pub mod process;
pub mod session;
pub mod time_control;
pub mod transcript;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use shakmaty::Color;

pub use config::{ClockPolicy, EngineConfig, SearchMode, option_value_text};
pub use info::InfoSnapshot;
pub use process::EngineProcess;
pub use session::EngineSession;
pub use time_control::{TimeArgs, TimeBudget};

use crate::error::Result;
use crate::oracle::{CoordMove, StartingPosition};

/// ノード数指定の探索に許す上限時間。
pub const NODE_SEARCH_CEILING: Duration = Duration::from_secs(300);
/// 持ち時間指定の探索で、残り時間 + 加算に上乗せする余裕。
pub const CLOCK_SAFETY_MARGIN: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    NotStarted,
    Initializing,
    Ready,
    Searching,
    Stopped,
}

/// 1 回の探索の打ち切り条件。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchLimits {
    Nodes(u64),
    Clock { args: TimeArgs, side: Color },
}

impl SearchLimits {
    pub fn go_command(&self) -> String {
        match self {
            SearchLimits::Nodes(n) => format!("go nodes {n}"),
            SearchLimits::Clock { args, .. } => format!(
                "go wtime {} btime {} winc {} binc {}",
                args.wtime, args.btime, args.winc, args.binc
            ),
        }
    }

    /// 結果行を待つ上限。
    pub fn ceiling(&self) -> Duration {
        match self {
            SearchLimits::Nodes(_) => NODE_SEARCH_CEILING,
            SearchLimits::Clock { args, side } => {
                let (remaining, inc) = match side {
                    Color::White => (args.wtime, args.winc),
                    Color::Black => (args.btime, args.binc),
                };
                Duration::from_millis(remaining.saturating_add(inc)) + CLOCK_SAFETY_MARGIN
            }
        }
    }
}

/// `bestmove` 行の内容。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BestMove {
    /// `(none)` / `0000` のときは `None`（エンジン視点で指す手が無い）
    pub mv: Option<CoordMove>,
    pub ponder: Option<CoordMove>,
    pub info: InfoSnapshot,
    pub elapsed_ms: u64,
}

/// 探索中のエンジンに別スレッドから停止を頼むためのハンドル。
///
/// 複製しても同じフラグを共有する。探索側は待機中にフラグを見て `stop` を送る。
/// 探索開始時に下ろされるので、探索していないときの要求は次の探索に持ち越さない。
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// 要求を取り出して下ろす。
    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// 判断ロジックとエンジンの境界。本番実装は [`EngineProcess`] のみ。
pub trait SearchEngine: Send {
    fn label(&self) -> &str;

    fn ready_state(&self) -> ReadyState;

    /// プロセスが生きていて初期化済みのときだけ真。
    fn is_ready(&mut self) -> bool;

    fn new_game(&mut self) -> Result<()>;

    fn set_position(&mut self, start: &StartingPosition, moves: &[CoordMove]) -> Result<()>;

    fn search(&mut self, limits: &SearchLimits) -> Result<BestMove>;

    /// 実行中の `search` を打ち切らせるハンドル。`search` は打ち切られても
    /// エンジンが返した `bestmove` をそのまま返す。
    fn stop_handle(&self) -> StopHandle;

    fn quit(&mut self);
}
