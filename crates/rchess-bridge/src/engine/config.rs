use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_threads() -> usize {
    1
}

/// エンジンプロセス起動時の設定。実行ファイルとオプションだけで表し、
/// エンジンの種類ごとに型を分けない。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// 追加の UCI オプション（`setoption name <key> value <value>`）
    #[serde(default)]
    pub options: BTreeMap<String, toml::Value>,
    /// 送受信を逐語で追記する診断ファイル
    #[serde(default)]
    pub transcript: Option<PathBuf>,
}

impl EngineConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            args: Vec::new(),
            threads: default_threads(),
            options: BTreeMap::new(),
            transcript: None,
        }
    }
}

/// 探索の打ち切り方。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SearchMode {
    Nodes {
        nodes: u64,
    },
    Clock {
        initial_ms: u64,
        #[serde(default)]
        increment_ms: u64,
        #[serde(default)]
        clock_policy: ClockPolicy,
    },
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Nodes { nodes: 1_000_000 }
    }
}

/// パズルをまたいで持ち時間を引き継ぐかどうか。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockPolicy {
    #[default]
    FreshPerPuzzle,
    Accumulate,
}

/// TOML の値を `setoption` の value 文字列にする。
pub fn option_value_text(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}
