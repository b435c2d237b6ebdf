//! エンジンとの送受信をそのまま追記する診断ログ。
//!
//! 書き込みは best-effort。失敗したら一度だけ警告を出して以降は書かない。
//! プロトコルのやり取りをこのログが止めることはない。

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Local;

use crate::util::lock_or_recover;

struct Sink {
    writer: BufWriter<File>,
    label: String,
    failed: bool,
}

#[derive(Clone, Default)]
pub struct Transcript {
    sink: Option<Arc<Mutex<Sink>>>,
}

impl Transcript {
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// 追記モードで開く。開けなければ警告して無効化した Transcript を返す。
    pub fn open(path: &Path, label: &str) -> Self {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Self {
                sink: Some(Arc::new(Mutex::new(Sink {
                    writer: BufWriter::new(file),
                    label: label.to_string(),
                    failed: false,
                }))),
            },
            Err(e) => {
                log::warn!("{label}: transcript {} unavailable: {e}", path.display());
                Self::disabled()
            }
        }
    }

    pub fn sent(&self, line: &str) {
        self.record('>', line);
    }

    pub fn received(&self, line: &str) {
        self.record('<', line);
    }

    fn record(&self, direction: char, line: &str) {
        let Some(sink) = &self.sink else {
            return;
        };
        let mut sink = lock_or_recover(sink);
        if sink.failed {
            return;
        }
        let stamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
        let sink = &mut *sink;
        let result = writeln!(sink.writer, "{stamp} {direction} {line}");
        if let Err(e) = result.and_then(|()| sink.writer.flush()) {
            log::warn!("{}: transcript write failed, disabling: {e}", sink.label);
            sink.failed = true;
        }
    }
}
