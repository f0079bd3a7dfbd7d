use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use pkgflow_core::ErrorCode;
use pkgflow_installer::{JobObserver, JobReport, PackageRecord, PluginRecord};
use serde_json::{json, Value};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

impl OutputStyle {
    pub fn detect(no_progress: bool) -> Self {
        if no_progress || !std::io::stderr().is_terminal() {
            Self::Plain
        } else {
            Self::Rich
        }
    }
}

/// Draws job progress as a bar on stderr. Plain output draws nothing.
pub struct ProgressObserver {
    style: OutputStyle,
    progress_bar: Option<ProgressBar>,
}

impl ProgressObserver {
    pub fn new(style: OutputStyle) -> Self {
        Self {
            style,
            progress_bar: None,
        }
    }

    fn bar(&mut self) -> Option<&ProgressBar> {
        if self.style == OutputStyle::Plain {
            return None;
        }
        Some(self.progress_bar.get_or_insert_with(|| {
            let progress_bar = ProgressBar::new(100);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} [{bar:24.cyan/blue}] {pos:>3}% {msg}",
            ) {
                progress_bar.set_style(style.progress_chars("=>-"));
            }
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            progress_bar
        }))
    }
}

impl JobObserver for ProgressObserver {
    fn progress(&mut self, percent: f32, description: &str) {
        let Some(progress_bar) = self.bar() else {
            return;
        };
        progress_bar.set_position(percent.clamp(0.0, 100.0) as u64);
        progress_bar.set_message(description.to_string());
    }

    fn finished(&mut self, _id: &str, _status: ErrorCode) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

pub fn render_report_line(report: &JobReport) -> String {
    if report.status.is_success() {
        return format!("ok      {} {}", report.kind.as_str(), report.subject);
    }
    let mut line = format!(
        "failed  {} {} (error {})",
        report.kind.as_str(),
        report.subject,
        report.status
    );
    if let Some(message) = &report.message {
        line.push_str(": ");
        line.push_str(message);
    }
    line
}

pub fn render_record_lines(records: &[PackageRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            format!(
                "{} {} {} {}",
                record.id,
                record.version,
                record.tier,
                record.location.as_str()
            )
        })
        .collect()
}

pub fn render_plugin_lines(plugins: &[PluginRecord]) -> Vec<String> {
    plugins
        .iter()
        .map(|plugin| {
            let mut line = format!("{} {}", plugin.name, plugin.status.as_str());
            if !plugin.requires.is_empty() {
                line.push_str(&format!(" requires {}", plugin.requires.join(",")));
            }
            line
        })
        .collect()
}

pub fn records_json(records: &[PackageRecord], plugins: &[PluginRecord]) -> Value {
    let packages: Vec<Value> = records
        .iter()
        .map(|record| {
            json!({
                "id": record.id,
                "name": record.name,
                "version": record.version.to_string(),
                "tier": record.tier.as_str(),
                "location": record.location.as_str(),
                "root": record.root.display().to_string(),
                "installed_at_unix": record.installed_at_unix,
                "certificates": record.certificates.len(),
            })
        })
        .collect();
    let plugins: Vec<Value> = plugins
        .iter()
        .map(|plugin| {
            json!({
                "name": plugin.name,
                "library": plugin.library,
                "requires": plugin.requires,
                "status": plugin.status.as_str(),
            })
        })
        .collect();
    json!({ "packages": packages, "plugins": plugins })
}
