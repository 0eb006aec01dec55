//! Output formatting for multiple formats
//!
//! Every command result can be printed as JSON, YAML or human-readable text. JSON and YAML
//! come straight from the serde representation; the human form is written per result type.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write;

use crate::config::BootConfig;
use crate::health::{HealthStatus, ProbeOutcome};
use crate::launcher::ServerCommand;
use crate::model::CacheReport;
use crate::plan::LayerKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format
    Yaml,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn structured<T: Serialize + ?Sized>(&self, value: &T, what: &str) -> Result<String> {
        match self.format {
            OutputFormat::Yaml => serde_yaml::to_string(value)
                .with_context(|| format!("Failed to serialize {} to YAML", what)),
            _ => serde_json::to_string_pretty(value)
                .with_context(|| format!("Failed to serialize {} to JSON", what)),
        }
    }

    pub fn format_config(&self, config: &BootConfig) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(config.to_string()),
            _ => self.structured(&config.to_display_map(), "configuration"),
        }
    }

    pub fn format_cache_report(&self, report: &CacheReport) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.structured(report, "cache report");
        }

        let mut out = String::new();
        let status = if report.is_complete() {
            "complete"
        } else {
            "INCOMPLETE"
        };
        let _ = writeln!(out, "Model Cache: {}", status);
        let _ = writeln!(out, "  Model:    {} @ {}", report.model, report.revision);
        let _ = writeln!(out, "  Location: {}", report.hub_dir.display());
        let _ = writeln!(
            out,
            "  Files:    {} present, {} missing",
            report.found.len(),
            report.missing.len()
        );
        let _ = writeln!(out, "  Size:     {}", format_bytes(report.total_bytes));
        if !report.missing.is_empty() {
            let _ = writeln!(out, "  Missing:");
            for file in &report.missing {
                let _ = writeln!(out, "    - {}", file);
            }
        }
        Ok(out)
    }

    pub fn format_layers(&self, layers: &[(String, Vec<LayerKey>)]) -> Result<String> {
        if self.format != OutputFormat::Human {
            let map: Vec<_> = layers
                .iter()
                .map(|(stage, keys)| serde_json::json!({ "stage": stage, "layers": keys }))
                .collect();
            return self.structured(&map, "layer keys");
        }

        let mut out = String::new();
        for (stage, keys) in layers {
            let _ = writeln!(out, "{}:", stage);
            for key in keys {
                let short = key.key.get(..12).unwrap_or(&key.key);
                let _ = writeln!(out, "  {:>2}  {}  {}", key.index + 1, short, key.label);
            }
        }
        Ok(out)
    }

    pub fn format_probe(&self, outcome: &ProbeOutcome) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.structured(outcome, "probe outcome");
        }

        let mut out = String::new();
        let verdict = if outcome.healthy {
            "✓ healthy"
        } else {
            "✗ unhealthy"
        };
        let _ = writeln!(out, "{} {} ({}ms)", verdict, outcome.url, outcome.latency_ms);
        if let Some(code) = outcome.status_code {
            let _ = writeln!(out, "  HTTP status: {}", code);
        }
        if let Some(status) = &outcome.reported_status {
            let _ = writeln!(out, "  Reported:    {}", status);
        }
        for (service, state) in &outcome.services {
            let _ = writeln!(out, "  {:<12} {}", format!("{}:", service), state);
        }
        if let Some(error) = &outcome.error {
            let _ = writeln!(out, "  Error:       {}", error);
        }
        Ok(out)
    }

    pub fn format_watch(&self, url: &str, status: HealthStatus) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(format!("{}: {}\n", url, status)),
            _ => self.structured(
                &serde_json::json!({ "url": url, "status": status }),
                "watch result",
            ),
        }
    }

    pub fn format_server_command(&self, command: &ServerCommand) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(format!("{}\n", command)),
            _ => self.structured(command, "server command"),
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
