use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use super::config::{EngineConfig, option_value_text};
use super::info::InfoSnapshot;
use super::transcript::Transcript;
use super::{BestMove, ReadyState, SearchEngine, SearchLimits, StopHandle};
use crate::error::{BridgeError, Result};
use crate::oracle::{CoordMove, StartingPosition};
use crate::tracker::position_command;
use crate::util::duration_to_millis;

/// ハンドシェイクの各段（uciok / readyok）を待つ上限。
pub const HANDSHAKE_STEP_TIMEOUT: Duration = Duration::from_secs(5);
/// 上限超過で `stop` を送った後、bestmove を待つ猶予。
pub const STOP_GRACE: Duration = Duration::from_secs(2);
/// 探索待ちの間に停止要求を確かめる間隔。
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 1 本の UCI エンジンに対する入出力をカプセル化する。
///
/// 標準出力は専用スレッドが行単位で読み、チャネル経由で受け取る。
/// 送受信はすべて [`Transcript`] に逐語で残る。
pub struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    opt_names: HashSet<String>,
    engine_name: Option<String>,
    label: String,
    state: ReadyState,
    transcript: Transcript,
    quit_sent: bool,
    stop: StopHandle,
}

impl EngineProcess {
    /// プロセスを起動してハンドシェイクを済ませる。失敗はすべて `EngineStartup`。
    pub fn start(cfg: &EngineConfig) -> Result<Self> {
        let label = cfg.name.clone();
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                BridgeError::EngineStartup(format!(
                    "failed to spawn engine at {}: {e}",
                    cfg.path.display()
                ))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::EngineStartup(format!("{label}: no stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::EngineStartup(format!("{label}: no stdout")))?;

        let transcript = match &cfg.transcript {
            Some(path) => Transcript::open(path, &label),
            None => Transcript::disabled(),
        };
        let (tx, rx) = mpsc::channel::<String>();
        let reader_transcript = transcript.clone();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        reader_transcript.received(&l);
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut proc = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            opt_names: HashSet::new(),
            engine_name: None,
            label,
            state: ReadyState::Initializing,
            transcript,
            quit_sent: false,
            stop: StopHandle::new(),
        };
        proc.initialize(cfg)?;
        log::info!(
            "{}: engine ready ({})",
            proc.label,
            proc.engine_name.as_deref().unwrap_or("unnamed")
        );
        Ok(proc)
    }

    fn initialize(&mut self, cfg: &EngineConfig) -> Result<()> {
        self.write_line("uci")?;
        let deadline = Instant::now() + HANDSHAKE_STEP_TIMEOUT;
        loop {
            let line = self.recv_handshake_line(deadline, "uciok")?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name);
                }
            } else if let Some(name) = line.strip_prefix("id name ") {
                self.engine_name = Some(name.trim().to_string());
            } else if line.trim() == "uciok" {
                break;
            }
        }
        self.set_option_if_available("Threads", &cfg.threads.to_string())?;
        for (name, value) in &cfg.options {
            self.set_option_if_available(name, &option_value_text(value))?;
        }
        self.sync_ready()?;
        self.state = ReadyState::Ready;
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// `id name` で名乗ったエンジン名。
    pub fn engine_name(&self) -> Option<&str> {
        self.engine_name.as_deref()
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.opt_names.contains(name)
    }

    pub fn state(&self) -> ReadyState {
        self.state
    }

    pub fn sync_ready(&mut self) -> Result<()> {
        self.write_line("isready")?;
        let deadline = Instant::now() + HANDSHAKE_STEP_TIMEOUT;
        loop {
            let line = self.recv_handshake_line(deadline, "readyok")?;
            if line.trim() == "readyok" {
                return Ok(());
            }
        }
    }

    fn recv_handshake_line(&mut self, deadline: Instant, waiting_for: &str) -> Result<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(line) => Ok(line),
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::EngineStartup(format!(
                "{}: no {waiting_for} within {:?}",
                self.label, HANDSHAKE_STEP_TIMEOUT
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(self.exited_error()),
        }
    }

    pub fn set_option_if_available(&mut self, name: &str, value: &str) -> Result<()> {
        if self.opt_names.is_empty() || self.opt_names.contains(name) {
            self.write_line(&format!("setoption name {name} value {value}"))?;
        } else {
            log::debug!("{}: option {name} not advertised, skipped", self.label);
        }
        Ok(())
    }

    pub fn write_line(&mut self, msg: &str) -> Result<()> {
        self.transcript.sent(msg);
        if let Err(e) = write_raw(&mut self.stdin, msg) {
            log::warn!("{}: write '{msg}' failed: {e}", self.label);
            return Err(self.exited_error());
        }
        Ok(())
    }

    /// プロセスが終了していたら Stopped にして起動系エラーを返す。
    fn exited_error(&mut self) -> BridgeError {
        self.state = ReadyState::Stopped;
        let status = match self.child.try_wait() {
            Ok(Some(status)) => format!(" ({status})"),
            _ => String::new(),
        };
        BridgeError::EngineStartup(format!("{}: engine exited unexpectedly{status}", self.label))
    }

    fn ensure_usable(&mut self) -> Result<()> {
        match self.state {
            ReadyState::Ready => {
                if let Ok(Some(_)) = self.child.try_wait() {
                    return Err(self.exited_error());
                }
                Ok(())
            }
            ReadyState::Searching => Err(BridgeError::SearchInProgress),
            other => Err(BridgeError::EngineStartup(format!(
                "{}: engine is not running ({other:?})",
                self.label
            ))),
        }
    }

    /// 前回の探索の残り行を捨てる。
    fn drain_pending(&mut self) {
        while let Ok(line) = self.rx.try_recv() {
            log::trace!("{}: discarding stale line '{line}'", self.label);
        }
    }

    /// bestmove 行の残り部分を返す。期限切れなら `None`。
    /// 停止要求が来たら `stop` を送り、そのまま bestmove を待ち続ける。
    fn await_bestmove(
        &mut self,
        deadline: Instant,
        snapshot: &mut InfoSnapshot,
    ) -> Result<Option<String>> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if self.stop.take() {
                log::info!("{}: stop requested", self.label);
                self.write_line("stop")?;
            }
            match self.rx.recv_timeout(remaining.min(STOP_POLL_INTERVAL)) {
                Ok(line) => {
                    if line.starts_with("info") {
                        snapshot.update_from_line(&line);
                        continue;
                    }
                    let mut tokens = line.splitn(2, char::is_whitespace);
                    if tokens.next() == Some("bestmove") {
                        return Ok(Some(tokens.next().unwrap_or_default().trim().to_string()));
                    }
                    log::trace!("{}: ignored '{line}'", self.label);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(self.exited_error()),
            }
        }
    }
}

impl SearchEngine for EngineProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ReadyState {
        self.state
    }

    fn is_ready(&mut self) -> bool {
        match self.state {
            ReadyState::Ready | ReadyState::Searching => match self.child.try_wait() {
                Ok(None) => true,
                _ => {
                    self.state = ReadyState::Stopped;
                    false
                }
            },
            _ => false,
        }
    }

    fn new_game(&mut self) -> Result<()> {
        self.ensure_usable()?;
        self.write_line("ucinewgame")?;
        self.sync_ready()
    }

    fn set_position(&mut self, start: &StartingPosition, moves: &[CoordMove]) -> Result<()> {
        self.ensure_usable()?;
        self.write_line(&position_command(start, moves))
    }

    fn search(&mut self, limits: &SearchLimits) -> Result<BestMove> {
        self.ensure_usable()?;
        self.drain_pending();
        self.stop.take();
        self.write_line(&limits.go_command())?;
        self.state = ReadyState::Searching;

        let start = Instant::now();
        let ceiling = limits.ceiling();
        let mut snapshot = InfoSnapshot::default();
        let Some(rest) = self.await_bestmove(start + ceiling, &mut snapshot)? else {
            log::warn!("{}: no bestmove within {ceiling:?}, sending stop", self.label);
            self.write_line("stop")?;
            if self.await_bestmove(Instant::now() + STOP_GRACE, &mut snapshot)?.is_some() {
                self.state = ReadyState::Ready;
            } else {
                log::error!("{}: engine ignored stop, marking stopped", self.label);
                self.state = ReadyState::Stopped;
            }
            return Err(BridgeError::EngineTimeout { limit: ceiling });
        };

        self.state = ReadyState::Ready;
        let (mv, ponder) = parse_bestmove(&rest)?;
        Ok(BestMove {
            mv,
            ponder,
            info: snapshot,
            elapsed_ms: duration_to_millis(start.elapsed()),
        })
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn quit(&mut self) {
        if self.quit_sent {
            return;
        }
        self.quit_sent = true;
        let _ = self.write_line("quit");
        self.state = ReadyState::Stopped;
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                log::debug!("{}: engine exited", self.label);
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        log::warn!("{}: engine did not exit after quit, killing", self.label);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.quit();
    }
}

fn write_raw(stdin: &mut BufWriter<ChildStdin>, msg: &str) -> std::io::Result<()> {
    stdin.write_all(msg.as_bytes())?;
    stdin.write_all(b"\n")?;
    stdin.flush()
}

/// `bestmove` の後ろ（`e2e4 ponder e7e5` など）を解析する。
/// `(none)` と `0000` は指し手なしとして扱う。
pub fn parse_bestmove(rest: &str) -> Result<(Option<CoordMove>, Option<CoordMove>)> {
    let mut tokens = rest.split_whitespace();
    let mv = match tokens.next() {
        None | Some("(none)") | Some("0000") => None,
        Some(text) => Some(text.parse::<CoordMove>()?),
    };
    let mut ponder = None;
    while let Some(tok) = tokens.next() {
        if tok == "ponder" {
            ponder = tokens.next().and_then(|t| t.parse::<CoordMove>().ok());
        }
    }
    Ok((mv, ponder))
}

pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.next_if(|t| *t != "type") {
                parts.push(next);
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}
