//! イベント通知と定周期タイマーの 2 系統から自動対局の反復を起動する。
//!
//! どちらのトリガも同じ入口（再入防止フラグ付きの [`Session::autoplay_iteration`]）に流れる。
//! 反復中に届いたトリガはキューに積まず捨てる。

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel as chan;

use crate::autoplay::IterationOutcome;
use crate::session::Session;
use crate::util::lock_or_recover;
use crate::view::{MoveExecutor, ViewSnapshotProvider};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

enum Trigger {
    Event,
    Tick,
    Closed,
}

/// `shutdown` が立つか、イベントチャネルが切れるまで反復を回す。
/// 実行した反復の回数を返す。
pub fn run_driver<V, X, F>(
    session: &Mutex<Session<V, X>>,
    events: &chan::Receiver<()>,
    poll_interval: Duration,
    debounce: Duration,
    shutdown: &AtomicBool,
    mut on_outcome: F,
) -> usize
where
    V: ViewSnapshotProvider,
    X: MoveExecutor,
    F: FnMut(&IterationOutcome),
{
    let ticker = chan::tick(poll_interval);
    let busy = lock_or_recover(session).busy_flag();
    let mut iterations = 0;

    while !shutdown.load(Ordering::Relaxed) {
        let trigger = chan::select! {
            recv(events) -> msg => if msg.is_ok() { Trigger::Event } else { Trigger::Closed },
            recv(ticker) -> _ => Trigger::Tick,
        };
        match trigger {
            Trigger::Closed => {
                log::info!("view event channel closed, driver exiting");
                break;
            }
            Trigger::Event => {
                // 連続した通知は静まるまでまとめる
                while events.recv_timeout(debounce).is_ok() {}
            }
            Trigger::Tick => {}
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if busy.is_busy() {
            log::trace!("iteration in progress, trigger dropped");
            continue;
        }

        let outcome = lock_or_recover(session).autoplay_iteration();
        iterations += 1;
        on_outcome(&outcome);

        let dropped = events.try_iter().count() + ticker.try_iter().count();
        if dropped > 0 {
            log::trace!("dropped {dropped} triggers that arrived during the iteration");
        }
    }
    iterations
}
