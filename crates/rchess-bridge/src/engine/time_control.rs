use serde::Serialize;
use shakmaty::Color;

use super::config::ClockPolicy;

/// `go wtime/btime/winc/binc` の引数。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TimeArgs {
    pub wtime: u64,
    pub btime: u64,
    pub winc: u64,
    pub binc: u64,
}

/// 持ち時間モードでの両者の残り時間。
///
/// 減算するのは探索を終えた側の経過時間だけ。相手の消費時間は観測できないので
/// 相手側の残り時間は据え置く。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TimeBudget {
    pub white_ms: u64,
    pub black_ms: u64,
    pub increment_ms: u64,
    initial_ms: u64,
    pub policy: ClockPolicy,
}

impl TimeBudget {
    pub fn new(initial_ms: u64, increment_ms: u64, policy: ClockPolicy) -> Self {
        Self {
            white_ms: initial_ms,
            black_ms: initial_ms,
            increment_ms,
            initial_ms,
            policy,
        }
    }

    pub fn time_args(&self) -> TimeArgs {
        TimeArgs {
            wtime: self.white_ms,
            btime: self.black_ms,
            winc: self.increment_ms,
            binc: self.increment_ms,
        }
    }

    pub fn remaining(&self, side: Color) -> u64 {
        match side {
            Color::White => self.white_ms,
            Color::Black => self.black_ms,
        }
    }

    pub fn update_after_move(&mut self, side: Color, elapsed_ms: u64) {
        let next = self.updated_time(self.remaining(side), elapsed_ms);
        match side {
            Color::White => self.white_ms = next,
            Color::Black => self.black_ms = next,
        }
    }

    pub fn updated_time(&self, current: u64, elapsed_ms: u64) -> u64 {
        current.saturating_sub(elapsed_ms).saturating_add(self.increment_ms)
    }

    /// 新しいパズル・対局の開始時に呼ぶ。`Accumulate` なら何もしない。
    pub fn on_new_position(&mut self) {
        if self.policy == ClockPolicy::FreshPerPuzzle {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.white_ms = self.initial_ms;
        self.black_ms = self.initial_ms;
    }
}
