//! ルール判定だけで動くメモリ上の対局画面。
//!
//! [`ViewSnapshotProvider`] と [`MoveExecutor`] の両方を実装し、CLI の自己対局と
//! テストで外部ビューの代わりに使う。相手はシード付き乱数で合法手を選ぶ。
//! 相手の応手は、着手確認のスナップショットを 1 回返した後の読み取りで指される。

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use shakmaty::{Chess, Color, Position};

use crate::error::{BridgeError, Result};
use crate::oracle::{self, CoordMove, StartingPosition, Terminal};
use crate::util::lock_or_recover;
use crate::view::{MoveExecutor, Orientation, ViewSnapshotProvider};

struct Table {
    start: StartingPosition,
    position: Chess,
    moves: Vec<CoordMove>,
    rng: Xoshiro256PlusPlus,
    white_at_bottom: bool,
    active: bool,
    show_turn: bool,
    turn_override: Option<Color>,
    withhold_move_list: bool,
    reject_moves: bool,
    auto_reply: bool,
    /// `Some(n)`: あと n 回の盤面読み取りの後に相手が指す
    reply_after_reads: Option<u32>,
    executed: usize,
    listeners: Vec<Sender<()>>,
}

impl Table {
    fn notify(&mut self) {
        self.listeners.retain(|tx| tx.send(()).is_ok());
    }

    fn play(&mut self, mv: CoordMove) -> Result<()> {
        self.position = oracle::apply(&self.position, &mv, self.moves.len())?;
        self.moves.push(mv);
        self.notify();
        Ok(())
    }

    fn random_move(&mut self) -> Option<CoordMove> {
        let candidates = oracle::legal_moves(&self.position);
        if candidates.is_empty() {
            return None;
        }
        let idx = self.rng.random_range(0..candidates.len());
        Some(candidates[idx].0)
    }

    fn render(&self) -> String {
        let placement = oracle::placement_text(&self.position);
        if !self.show_turn {
            return placement;
        }
        let turn = match self.turn_override.unwrap_or(self.position.turn()) {
            Color::White => 'w',
            Color::Black => 'b',
        };
        let fen = oracle::fen_of(&self.position);
        let castling = fen.split_whitespace().nth(2).unwrap_or("-");
        format!("{placement} {turn} {castling}")
    }
}

/// 複製しても同じ盤を共有する。ビュー側と入力側に 1 つずつ渡せる。
#[derive(Clone)]
pub struct SimulatedTable {
    inner: Arc<Mutex<Table>>,
}

impl SimulatedTable {
    /// 平手・白が手前・相手は自動応手。
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Table {
                start: StartingPosition::Standard,
                position: Chess::default(),
                moves: Vec::new(),
                rng: Xoshiro256PlusPlus::seed_from_u64(seed),
                white_at_bottom: true,
                active: true,
                show_turn: true,
                turn_override: None,
                withhold_move_list: false,
                reject_moves: false,
                auto_reply: true,
                reply_after_reads: None,
                executed: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn from_fen(fen: &str, seed: u64) -> Result<Self> {
        let table = Self::new(seed);
        table.load(fen, true)?;
        Ok(table)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        lock_or_recover(&self.inner)
    }

    /// 新しいパズルを並べる。向きも指定し直す。
    pub fn load(&self, fen: &str, white_at_bottom: bool) -> Result<()> {
        let start = StartingPosition::from_fen(fen)?;
        let position = start.to_position()?;
        let mut t = self.lock();
        t.start = start;
        t.position = position;
        t.moves.clear();
        t.white_at_bottom = white_at_bottom;
        t.reply_after_reads = None;
        t.active = true;
        t.notify();
        Ok(())
    }

    /// 平手で新しい対局を始める。
    pub fn new_game(&self, white_at_bottom: bool) {
        let mut t = self.lock();
        t.start = StartingPosition::Standard;
        t.position = Chess::default();
        t.moves.clear();
        t.white_at_bottom = white_at_bottom;
        t.reply_after_reads = None;
        t.active = true;
        t.notify();
    }

    /// 盤面が変わるたびに通知を受けるチャネル。
    pub fn subscribe(&self) -> Receiver<()> {
        let (tx, rx) = unbounded();
        self.lock().listeners.push(tx);
        rx
    }

    pub fn set_active(&self, active: bool) {
        self.lock().active = active;
    }

    pub fn set_show_turn(&self, show: bool) {
        self.lock().show_turn = show;
    }

    /// 手番表示を実際と違う色に固定する（`None` で解除）。
    pub fn set_turn_override(&self, turn: Option<Color>) {
        self.lock().turn_override = turn;
    }

    pub fn set_withhold_move_list(&self, withhold: bool) {
        self.lock().withhold_move_list = withhold;
    }

    /// 入力を成功扱いにしたまま盤面を変えない。
    pub fn set_reject_moves(&self, reject: bool) {
        self.lock().reject_moves = reject;
    }

    pub fn set_auto_reply(&self, auto_reply: bool) {
        self.lock().auto_reply = auto_reply;
    }

    /// 盤を反転する。
    pub fn flip(&self) {
        let mut t = self.lock();
        t.white_at_bottom = !t.white_at_bottom;
        t.notify();
    }

    /// 相手側として 1 手指す（記録側を経由しない外部の着手）。
    pub fn play_external(&self, text: &str) -> Result<CoordMove> {
        let mut t = self.lock();
        let mv = oracle::parse_move_text(&t.position, text)
            .ok_or_else(|| BridgeError::InvalidMove(text.to_string()))?;
        t.play(mv)?;
        Ok(mv)
    }

    /// 相手側として乱数で 1 手指す。指せなければ `None`。
    pub fn play_random(&self) -> Option<CoordMove> {
        let mut t = self.lock();
        let mv = t.random_move()?;
        t.play(mv).ok()?;
        Some(mv)
    }

    pub fn position(&self) -> Chess {
        self.lock().position.clone()
    }

    pub fn moves(&self) -> Vec<CoordMove> {
        self.lock().moves.clone()
    }

    pub fn starting_position(&self) -> StartingPosition {
        self.lock().start.clone()
    }

    /// `execute` が呼ばれた回数（拒否した分も含む）。
    pub fn executed(&self) -> usize {
        self.lock().executed
    }

    pub fn terminal(&self) -> Option<Terminal> {
        oracle::terminal(&self.lock().position)
    }
}

impl ViewSnapshotProvider for SimulatedTable {
    fn board_snapshot(&mut self) -> Option<String> {
        let mut t = self.lock();
        match t.reply_after_reads {
            Some(0) => {
                t.reply_after_reads = None;
                if let Some(mv) = t.random_move() {
                    if let Err(e) = t.play(mv) {
                        log::error!("simulated reply {mv} failed: {e}");
                    }
                }
            }
            Some(n) => t.reply_after_reads = Some(n - 1),
            None => {}
        }
        Some(t.render())
    }

    fn move_list_snapshot(&mut self) -> Option<Vec<String>> {
        let t = self.lock();
        if t.withhold_move_list || !t.start.is_standard() {
            return None;
        }
        Some(t.moves.iter().map(|m| m.to_string()).collect())
    }

    fn orientation(&mut self) -> Option<Orientation> {
        Some(Orientation {
            white_at_bottom: self.lock().white_at_bottom,
        })
    }

    fn is_game_active(&mut self) -> bool {
        self.lock().active
    }
}

impl MoveExecutor for SimulatedTable {
    fn execute(&mut self, mv: &CoordMove) -> anyhow::Result<()> {
        let mut t = self.lock();
        t.executed += 1;
        if !t.active {
            bail!("game is not active");
        }
        if t.reject_moves {
            log::debug!("simulated table ignores {mv}");
            return Ok(());
        }
        let ply = t.moves.len();
        let next = oracle::apply(&t.position, mv, ply).map_err(|e| anyhow!("{e}"))?;
        t.position = next;
        t.moves.push(*mv);
        t.notify();
        if t.auto_reply && oracle::terminal(&t.position).is_none() {
            t.reply_after_reads = Some(1);
        }
        Ok(())
    }
}
