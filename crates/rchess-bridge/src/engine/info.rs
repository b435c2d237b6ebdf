use serde::Serialize;

/// 探索中に届いた `info` 行のうち、multipv=1 の最新値。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InfoSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seldepth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_cp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_mate: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pv: Vec<String>,
}

impl InfoSnapshot {
    /// info 行を解析して上書きする。multipv が 1 以外の行と `info string` は無視する。
    pub fn update_from_line(&mut self, line: &str) {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("info") {
            return;
        }
        let rest: Vec<&str> = tokens.collect();
        if rest.first() == Some(&"string") {
            return;
        }
        if let Some(idx) = rest.iter().position(|t| *t == "multipv") {
            if rest.get(idx + 1).and_then(|v| v.parse::<u32>().ok()).unwrap_or(1) != 1 {
                return;
            }
        }

        let mut iter = rest.into_iter();
        while let Some(key) = iter.next() {
            match key {
                "depth" => self.depth = iter.next().and_then(|v| v.parse().ok()),
                "seldepth" => self.seldepth = iter.next().and_then(|v| v.parse().ok()),
                "nodes" => self.nodes = iter.next().and_then(|v| v.parse().ok()),
                "nps" => self.nps = iter.next().and_then(|v| v.parse().ok()),
                "time" => self.time_ms = iter.next().and_then(|v| v.parse().ok()),
                "score" => match iter.next() {
                    Some("cp") => {
                        self.score_cp = iter.next().and_then(|v| v.parse().ok());
                        self.score_mate = None;
                    }
                    Some("mate") => {
                        self.score_mate = iter.next().and_then(|v| v.parse().ok());
                        self.score_cp = None;
                    }
                    _ => {}
                },
                "pv" => {
                    let pv: Vec<String> = iter.by_ref().map(str::to_string).collect();
                    if !pv.is_empty() {
                        self.pv = pv;
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_snapshot_parses_primary_line() {
        let mut snap = InfoSnapshot::default();
        snap.update_from_line(
            "info depth 12 seldepth 18 multipv 1 score cp 31 nodes 52011 nps 812000 time 64 pv e2e4 e7e5 g1f3",
        );
        assert_eq!(snap.depth, Some(12));
        assert_eq!(snap.seldepth, Some(18));
        assert_eq!(snap.score_cp, Some(31));
        assert_eq!(snap.nodes, Some(52_011));
        assert_eq!(snap.nps, Some(812_000));
        assert_eq!(snap.time_ms, Some(64));
        assert_eq!(snap.pv, vec!["e2e4", "e7e5", "g1f3"]);

        snap.update_from_line("info depth 14 score mate 3 pv d1h5");
        assert_eq!(snap.score_mate, Some(3));
        assert_eq!(snap.score_cp, None);
    }

    #[test]
    fn secondary_lines_and_strings_are_ignored() {
        let mut snap = InfoSnapshot::default();
        snap.update_from_line("info depth 8 score cp 10 pv d2d4");
        snap.update_from_line("info depth 9 multipv 2 score cp -40 pv a2a3");
        snap.update_from_line("info string NNUE evaluation using nn-xyz.nnue");
        assert_eq!(snap.depth, Some(8));
        assert_eq!(snap.score_cp, Some(10));
        assert_eq!(snap.pv, vec!["d2d4"]);
    }
}
