//! Default callback plugin: colored, human-readable output.
//!
//! ```text
//! PLAY [webservers] **************************************************************
//!
//! TASK [Install nginx] ***********************************************************
//! changed: [web1]
//! ok: [web2]
//!
//! PLAY RECAP *********************************************************************
//! web1    : ok=1  changed=1  unreachable=0  failed=0  skipped=0  rescued=0  ignored=0
//! ```
//!
//! Colors follow the `colored` crate's handling of `NO_COLOR` and
//! `CLICOLOR_FORCE`.

use std::io::{self, Write};

use colored::{Color, Colorize};

use crate::callback::{CallbackEvent, CallbackPlugin, ResultEvent};
use crate::executor::stats::{AggregateStats, HostStats};

const OUTPUT_WIDTH: usize = 80;

/// Ansible-like terminal output
#[derive(Debug)]
pub struct DefaultCallback {
    verbosity: u8,
}

impl Default for DefaultCallback {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DefaultCallback {
    pub fn new(verbosity: u8) -> Self {
        Self { verbosity }
    }

    fn banner(title: &str) -> String {
        let stars = "*".repeat(OUTPUT_WIDTH.saturating_sub(title.len() + 1));
        format!("\n{} {}", title.bright_white().bold(), stars.bright_black())
    }

    /// `PREFIX [name] ******...`
    fn header(prefix: &str, name: &str) -> String {
        Self::banner(&format!("{} [{}]", prefix, name))
    }

    fn status_line(&self, status: &str, color: Color, event: &ResultEvent) -> String {
        let mut line = format!("{}: [{}]", status.color(color), event.host);
        if let Some(item) = event.result.get("item") {
            let label = match item {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            line.push_str(&format!(" => (item={})", label));
        }
        if self.verbosity > 0 {
            if let Ok(dump) = serde_json::to_string(&event.result) {
                line.push_str(&format!(" => {}", dump).bright_black().to_string());
            }
        }
        line
    }

    fn failure_line(status: &str, event: &ResultEvent) -> String {
        let dump = serde_json::to_string(&event.result).unwrap_or_default();
        format!("{}: [{}]: FAILED! => {}", status, event.host, dump)
            .red()
            .to_string()
    }

    fn format_stat(label: &str, value: usize, color: Color) -> String {
        let text = format!("{}={:<4}", label, value);
        if value > 0 {
            text.color(color).to_string()
        } else {
            text
        }
    }

    fn recap_host(host: &str, stats: &HostStats) -> String {
        let name = format!("{:<26}", host);
        if stats.failures > 0 || stats.unreachable > 0 {
            name.red().to_string()
        } else if stats.changed > 0 {
            name.yellow().to_string()
        } else {
            name.green().to_string()
        }
    }

    fn recap(stats: &AggregateStats) -> Vec<String> {
        let mut lines = vec![Self::banner("PLAY RECAP")];
        for host in stats.processed() {
            let s = stats.summarize(host);
            lines.push(format!(
                "{}: {} {} {} {} {} {} {}",
                Self::recap_host(host, &s),
                Self::format_stat("ok", s.ok, Color::Green),
                Self::format_stat("changed", s.changed, Color::Yellow),
                Self::format_stat("unreachable", s.unreachable, Color::Red),
                Self::format_stat("failed", s.failures, Color::Red),
                Self::format_stat("skipped", s.skipped, Color::Cyan),
                Self::format_stat("rescued", s.rescued, Color::Magenta),
                Self::format_stat("ignored", s.ignored, Color::BrightBlack),
            ));
        }
        lines
    }

    fn render(&self, event: &CallbackEvent) -> Vec<String> {
        match event {
            CallbackEvent::PlayStart { name, .. } => vec![Self::header("PLAY", name)],
            CallbackEvent::TaskStart { name } => vec![Self::header("TASK", name)],
            CallbackEvent::HandlerTaskStart { name } => {
                vec![Self::header("RUNNING HANDLER", name)]
            }
            CallbackEvent::RunnerOk(result) | CallbackEvent::RunnerItemOk(result) => {
                if result.changed {
                    vec![self.status_line("changed", Color::Yellow, result)]
                } else {
                    vec![self.status_line("ok", Color::Green, result)]
                }
            }
            CallbackEvent::RunnerSkipped(result) | CallbackEvent::RunnerItemSkipped(result) => {
                vec![self.status_line("skipping", Color::Cyan, result)]
            }
            CallbackEvent::RunnerFailed {
                result,
                ignore_errors,
            } => {
                let mut lines = vec![Self::failure_line("fatal", result)];
                if *ignore_errors {
                    lines.push("...ignoring".cyan().to_string());
                }
                lines
            }
            CallbackEvent::RunnerItemFailed(result) => {
                vec![Self::failure_line("failed", result)]
            }
            CallbackEvent::RunnerUnreachable(result) => {
                vec![Self::failure_line("fatal", result).replace("FAILED!", "UNREACHABLE!")]
            }
            CallbackEvent::RunnerRetry(result) => {
                let attempts = result.result.get("attempts").cloned().unwrap_or_default();
                let retries = result.result.get("retries").cloned().unwrap_or_default();
                vec![format!(
                    "FAILED - RETRYING: [{}]: {} ({} of {} attempts).",
                    result.host, result.task, attempts, retries
                )
                .yellow()
                .to_string()]
            }
            CallbackEvent::NoHostsMatched { .. } => {
                vec!["skipping: no hosts matched".bright_black().to_string()]
            }
            CallbackEvent::NoHostsRemaining { .. } => {
                vec!["\nNO MORE HOSTS LEFT".red().bold().to_string()]
            }
            CallbackEvent::Stats(stats) => Self::recap(stats),
        }
    }
}

impl CallbackPlugin for DefaultCallback {
    fn name(&self) -> &str {
        "default"
    }

    fn on_event(&self, event: &CallbackEvent) {
        let lines = self.render(event);
        let mut stdout = io::stdout().lock();
        for line in lines {
            let _ = writeln!(stdout, "{}", line);
        }
        let _ = stdout.flush();
    }
}
