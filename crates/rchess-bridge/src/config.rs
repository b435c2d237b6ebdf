use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shakmaty::Color;

use crate::autoplay::{AutoplaySettings, ColorMode};
use crate::engine::{EngineConfig, SearchMode};
use crate::error::{BridgeError, Result};

/// `[autoplay] color` の値。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSetting {
    White,
    Black,
    #[default]
    Auto,
}

impl ColorSetting {
    pub fn color_mode(self) -> ColorMode {
        match self {
            ColorSetting::White => ColorMode::Fixed(Color::White),
            ColorSetting::Black => ColorMode::Fixed(Color::Black),
            ColorSetting::Auto => ColorMode::AutoDetect,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoplayConfig {
    pub color: ColorSetting,
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    pub settle_delay_ms: u64,
    pub requery_cooldown_ms: Option<u64>,
}

impl Default for AutoplayConfig {
    fn default() -> Self {
        Self {
            color: ColorSetting::Auto,
            poll_interval_ms: 300,
            debounce_ms: 50,
            settle_delay_ms: 150,
            requery_cooldown_ms: None,
        }
    }
}

impl AutoplayConfig {
    pub fn settings(&self) -> AutoplaySettings {
        AutoplaySettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            requery_cooldown: self.requery_cooldown_ms.map(Duration::from_millis),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// ブリッジ全体の TOML 設定。どの項目も省略できる。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub engines: Vec<EngineConfig>,
    pub search: SearchMode,
    pub autoplay: AutoplayConfig,
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&text).map_err(|e| match e {
            BridgeError::Config(msg) => BridgeError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        for (i, engine) in cfg.engines.iter().enumerate() {
            if cfg.engines[..i].iter().any(|other| other.name == engine.name) {
                return Err(BridgeError::Config(format!(
                    "duplicate engine profile '{}'",
                    engine.name
                )));
            }
        }
        if cfg.autoplay.poll_interval_ms == 0 {
            return Err(BridgeError::Config("poll_interval_ms must be positive".to_string()));
        }
        Ok(cfg)
    }

    /// 名前でプロファイルを引く。`None` なら先頭。
    pub fn engine(&self, name: Option<&str>) -> Option<&EngineConfig> {
        match name {
            Some(n) => self.engines.iter().find(|e| e.name == n),
            None => self.engines.first(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ClockPolicy;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = BridgeConfig::parse("").unwrap();
        assert!(cfg.engines.is_empty());
        assert_eq!(cfg.search, SearchMode::Nodes { nodes: 1_000_000 });
        assert_eq!(cfg.autoplay.poll_interval(), Duration::from_millis(300));
        assert_eq!(cfg.autoplay.debounce(), Duration::from_millis(50));
        assert_eq!(cfg.autoplay.settings(), AutoplaySettings::default());
        assert_eq!(cfg.autoplay.color.color_mode(), ColorMode::AutoDetect);
    }

    #[test]
    fn full_config() {
        let cfg = BridgeConfig::parse(
            r#"
[[engines]]
name = "stockfish"
path = "/usr/local/bin/stockfish"
threads = 4
transcript = "/tmp/sf.log"

[engines.options]
Hash = 256

[[engines]]
name = "mock"
path = "target/debug/rchess-mock-uci"

[search]
mode = "clock"
initial_ms = 180000
increment_ms = 2000
clock_policy = "accumulate"

[autoplay]
color = "black"
poll_interval_ms = 250
requery_cooldown_ms = 5000
"#,
        )
        .unwrap();
        assert_eq!(cfg.engines.len(), 2);
        assert_eq!(cfg.engine(None).unwrap().threads, 4);
        assert_eq!(cfg.engine(Some("mock")).unwrap().threads, 1);
        assert!(cfg.engine(Some("missing")).is_none());
        assert_eq!(
            cfg.search,
            SearchMode::Clock {
                initial_ms: 180_000,
                increment_ms: 2_000,
                clock_policy: ClockPolicy::Accumulate,
            }
        );
        assert_eq!(cfg.autoplay.color.color_mode(), ColorMode::Fixed(Color::Black));
        assert_eq!(
            cfg.autoplay.settings().requery_cooldown,
            Some(Duration::from_millis(5000))
        );
        assert_eq!(cfg.autoplay.settle_delay_ms, 150);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let dup = "[[engines]]\nname = \"a\"\npath = \"x\"\n[[engines]]\nname = \"a\"\npath = \"y\"\n";
        assert!(matches!(BridgeConfig::parse(dup), Err(BridgeError::Config(_))));
        assert!(BridgeConfig::parse("[search]\nmode = \"hours\"").is_err());

        let dir = tempfile::tempdir().unwrap();
        let err = BridgeConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
