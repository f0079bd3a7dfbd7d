//! Package manager signals: `start`, `install_percent`, `icon_path`, `error`
//! and `end` lines addressed to the external listener.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use pkgflow_core::{ErrorCode, InstallationKind};
use tracing::warn;

pub const KEY_START: &str = "start";
pub const KEY_PERCENT: &str = "install_percent";
pub const KEY_ICON_PATH: &str = "icon_path";
pub const KEY_ERROR: &str = "error";
pub const KEY_END: &str = "end";

pub trait SignalSink: Send + Sync {
    fn emit(&self, package_id: &str, key: &str, value: &str);
}

pub struct WriterSignalSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSignalSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> SignalSink for WriterSignalSink<W> {
    fn emit(&self, package_id: &str, key: &str, value: &str) {
        let Ok(mut writer) = self.writer.lock() else {
            warn!(key, "signal writer poisoned; dropping signal");
            return;
        };
        let written = writeln!(writer, "{package_id} {key}={value}").and_then(|_| writer.flush());
        if let Err(err) = written {
            warn!(key, "failed to emit signal: {err}");
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSignalSink;

impl SignalSink for NullSignalSink {
    fn emit(&self, _package_id: &str, _key: &str, _value: &str) {}
}

#[derive(Debug, Default)]
pub struct MemorySignalSink {
    lines: Mutex<Vec<String>>,
}

impl MemorySignalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl SignalSink for MemorySignalSink {
    fn emit(&self, package_id: &str, key: &str, value: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format!("{package_id} {key}={value}"));
        }
    }
}

/// Per-job signal state. Guarantees one `start` and one `end` line, drops
/// repeated percentages, and puts `error` right before a failing `end`.
pub struct PkgmgrSignal {
    sink: Arc<dyn SignalSink>,
    package_id: String,
    fallback_start: &'static str,
    started: bool,
    ended: bool,
    last_percent: Option<u8>,
}

impl PkgmgrSignal {
    pub fn new(
        sink: Arc<dyn SignalSink>,
        package_id: impl Into<String>,
        kind: InstallationKind,
    ) -> Self {
        Self {
            sink,
            package_id: package_id.into(),
            fallback_start: kind.signal_start_value(),
            started: false,
            ended: false,
            last_percent: None,
        }
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    /// Lines sent before the descriptor is parsed carry a provisional id.
    pub fn set_package_id(&mut self, package_id: impl Into<String>) {
        self.package_id = package_id.into();
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn send_start(&mut self, value: &str) {
        if self.started || self.ended {
            return;
        }
        self.started = true;
        self.sink.emit(&self.package_id, KEY_START, value);
    }

    pub fn send_percent(&mut self, percent: u8) {
        if !self.started || self.ended || self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        self.sink
            .emit(&self.package_id, KEY_PERCENT, &percent.min(100).to_string());
    }

    pub fn send_icon_path(&mut self, icon: &Path) {
        if !self.started || self.ended {
            return;
        }
        self.sink
            .emit(&self.package_id, KEY_ICON_PATH, &icon.display().to_string());
    }

    pub fn send_finish(&mut self, status: ErrorCode) {
        if self.ended {
            return;
        }
        if !self.started {
            let fallback = self.fallback_start;
            self.send_start(fallback);
        }
        if !status.is_success() {
            self.sink
                .emit(&self.package_id, KEY_ERROR, &status.as_u32().to_string());
        }
        self.ended = true;
        let end = if status.is_success() { "ok" } else { "fail" };
        self.sink.emit(&self.package_id, KEY_END, end);
    }
}
