//! 決定的な UCI エンジンスタブ。局面の最初の合法手を指す。
//!
//! 結合テストでの異常系再現用に、引数で振る舞いを変えられる。
//!
//! - `--crash-on-go`: `go` を受けたら即座に終了する
//! - `--ignore-go`: `go` にも `stop` にも応答しない
//! - `--wait-for-stop`: `go` を受けても `stop` が来るまで `bestmove` を返さない
//! - `--no-uciok`: `uci` に `uciok` を返さない

use std::io::{self, BufRead, Write};

use rchess_bridge::oracle::{self, CoordMove, StartingPosition};

#[derive(Default)]
struct Behaviour {
    crash_on_go: bool,
    ignore_go: bool,
    wait_for_stop: bool,
    no_uciok: bool,
}

/// `position ...` コマンドを解釈する。解釈できなければ `None`。
fn parse_position(rest: &str) -> Option<shakmaty::Chess> {
    let (start_part, moves_part) = match rest.split_once(" moves") {
        Some((s, m)) => (s.trim(), m.trim()),
        None => (rest.trim(), ""),
    };
    let start = if start_part == "startpos" {
        StartingPosition::Standard
    } else {
        StartingPosition::from_fen(start_part.strip_prefix("fen")?.trim()).ok()?
    };
    let moves: Vec<CoordMove> = moves_part
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    oracle::replay(&start, &moves).ok()
}

fn go_nodes(args: &str) -> u64 {
    let mut tokens = args.split_whitespace();
    while let Some(tok) = tokens.next() {
        if tok == "nodes" {
            return tokens.next().and_then(|v| v.parse().ok()).unwrap_or(1);
        }
    }
    1
}

fn answer(out: &mut impl Write, position: &shakmaty::Chess, nodes: u64) -> io::Result<()> {
    match oracle::legal_moves(position).first() {
        Some((mv, _)) => {
            writeln!(out, "info depth 1 seldepth 1 nodes {nodes} score cp 0 pv {mv}")?;
            writeln!(out, "bestmove {mv}")
        }
        None => writeln!(out, "bestmove (none)"),
    }
}

fn main() -> io::Result<()> {
    let mut behaviour = Behaviour::default();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--crash-on-go" => behaviour.crash_on_go = true,
            "--ignore-go" => behaviour.ignore_go = true,
            "--wait-for-stop" => behaviour.wait_for_stop = true,
            "--no-uciok" => behaviour.no_uciok = true,
            other => eprintln!("unknown argument {other}"),
        }
    }

    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    let mut position = shakmaty::Chess::default();
    // 停止待ちの探索のノード数
    let mut pending: Option<u64> = None;

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        match cmd {
            "uci" => {
                writeln!(out, "id name rchess-mock-uci")?;
                writeln!(out, "id author rchess-bridge")?;
                writeln!(out, "option name Threads type spin default 1 min 1 max 64")?;
                writeln!(out, "option name Hash type spin default 16 min 1 max 1024")?;
                writeln!(out, "option name Skill Level type spin default 20 min 0 max 20")?;
                if !behaviour.no_uciok {
                    writeln!(out, "uciok")?;
                }
            }
            "isready" => writeln!(out, "readyok")?,
            "ucinewgame" => position = shakmaty::Chess::default(),
            "position" => match parse_position(rest) {
                Some(pos) => position = pos,
                None => eprintln!("unparsable position: {rest}"),
            },
            "go" => {
                if behaviour.crash_on_go {
                    std::process::exit(3);
                }
                if behaviour.ignore_go {
                    continue;
                }
                let nodes = go_nodes(rest);
                if behaviour.wait_for_stop {
                    pending = Some(nodes);
                    continue;
                }
                answer(&mut out, &position, nodes)?;
            }
            "stop" => {
                if let Some(nodes) = pending.take() {
                    answer(&mut out, &position, nodes)?;
                }
            }
            "quit" => break,
            // setoption / その他は黙って受け取る
            _ => {}
        }
        out.flush()?;
    }
    Ok(())
}
