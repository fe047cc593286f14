//! Output formatting for CLI commands.
//!
//! Execution events are printed by callback plugins; this formatter covers
//! the command-level messages, host and group listings, and the final
//! run status line.

use colored::{ColoredString, Colorize};
use serde_json::{json, Value as JsonValue};
use std::io::{self, Write};
use std::time::Duration;

use crate::executor::RunStatus;

/// Writes command output as colored text or as one JSON document per line
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    use_color: bool,
    json_mode: bool,
    verbosity: u8,
}

impl OutputFormatter {
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // NO_COLOR wins over --color
        let use_color = use_color && std::env::var_os("NO_COLOR").is_none();
        if !use_color {
            colored::control::set_override(false);
        }

        Self {
            use_color,
            json_mode,
            verbosity,
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    fn paint(&self, text: &str, style: fn(&str) -> ColoredString) -> String {
        if self.use_color {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    /// Print one JSON document on stdout
    pub fn json(&self, value: &JsonValue) {
        println!("{value}");
    }

    /// `PLAYBOOK: site.yml ****` style header
    pub fn banner(&self, title: &str) {
        if self.json_mode {
            return;
        }
        let stars = "*".repeat(72usize.saturating_sub(title.len() + 1).max(3));
        println!("\n{} {}", self.paint(title, |s| s.bold()), stars);
    }

    pub fn error(&self, message: &str) {
        if self.json_mode {
            eprintln!("{}", json!({"level": "error", "message": message}));
        } else {
            eprintln!("{} {}", self.paint("ERROR!", |s| s.red().bold()), message);
        }
    }

    pub fn warning(&self, message: &str) {
        if self.json_mode {
            eprintln!("{}", json!({"level": "warning", "message": message}));
        } else {
            eprintln!("{} {}", self.paint("[WARNING]:", |s| s.magenta()), message);
        }
    }

    /// Shown from `-v` up
    pub fn info(&self, message: &str) {
        if self.verbosity == 0 || self.json_mode {
            return;
        }
        println!("{}", self.paint(message, |s| s.cyan()));
    }

    /// Hosts a pattern resolved to, in resolution order
    pub fn hosts(&self, pattern: &str, hosts: &[String]) {
        if self.json_mode {
            self.json(&json!({"pattern": pattern, "hosts": hosts}));
            return;
        }
        println!("  hosts ({}):", hosts.len());
        for host in hosts {
            println!("    {}", self.paint(host, |s| s.green()));
        }
    }

    /// A group and, when given, its members
    pub fn group(&self, name: &str, members: Option<&[String]>) {
        match members {
            None => println!("{}", self.paint(name, |s| s.bold())),
            Some(members) => {
                println!("{} ({}):", self.paint(name, |s| s.bold()), members.len());
                for host in members {
                    println!("    {host}");
                }
            }
        }
    }

    /// Final line of a run, colored by outcome
    pub fn run_status(&self, status: RunStatus, elapsed: Duration) {
        if self.json_mode {
            return;
        }
        let text = format!("{} (exit {}) in {:.2}s", status, status.code(), elapsed.as_secs_f64());
        let painted = match status {
            RunStatus::Ok => self.paint(&text, |s| s.green()),
            RunStatus::FailedHosts => self.paint(&text, |s| s.red()),
            RunStatus::UnreachableHosts | RunStatus::RunError => self.paint(&text, |s| s.red().bold()),
        };
        println!("\n{painted}");
    }

    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}
