use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Final state of one component after a run.
#[derive(Debug, Serialize)]
pub struct ComponentRow {
    pub name: String,
    pub kind: &'static str,
    pub state: &'static str,
    pub ticks: u64,
    pub late_ticks: u64,
    pub max_lateness_ms: f64,
    /// Input samples overwritten before this consumer read them.
    pub samples_lost: u64,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub elapsed_seconds: f64,
    pub components: Vec<ComponentRow>,
    pub failures: usize,
}

pub fn print_run_summary(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "COMPONENT", "KIND", "STATE", "TICKS", "LATE", "MAX LATE", "LOST", "ERROR",
                ]);
            for row in &summary.components {
                table.add_row(vec![
                    row.name.clone(),
                    row.kind.to_string(),
                    row.state.to_string(),
                    row.ticks.to_string(),
                    row.late_ticks.to_string(),
                    format!("{:.2}ms", row.max_lateness_ms),
                    row.samples_lost.to_string(),
                    row.error.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
            println!(
                "ran {:.2}s, {} failure(s)",
                summary.elapsed_seconds, summary.failures
            );
        }
        OutputFormat::Pretty => {
            for row in &summary.components {
                print!(
                    "{} ({}) {} ticks={} late={}",
                    row.name, row.kind, row.state, row.ticks, row.late_ticks
                );
                if row.samples_lost > 0 {
                    print!(" lost={}", row.samples_lost);
                }
                match &row.error {
                    Some(err) => println!(" error={err}"),
                    None => println!(),
                }
            }
            println!(
                "elapsed={:.2}s failures={}",
                summary.elapsed_seconds, summary.failures
            );
        }
    }
}

/// Description of a recording header.
#[derive(Debug, Serialize)]
pub struct HeaderOutput {
    pub header: String,
    pub data: String,
    pub sample_rate: f64,
    pub dim: u32,
    pub bytes_per_value: u32,
    pub sample_type: &'static str,
    pub chunks: usize,
    pub samples: u64,
    pub start_seconds: f64,
    pub duration_seconds: f64,
}

pub fn print_header(out: &HeaderOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Recording:");
            println!("  Header:       {}", out.header);
            println!("  Data:         {}", out.data);
            println!(
                "  Format:       {} x {} ({} bytes) @ {} Hz",
                out.dim, out.sample_type, out.bytes_per_value, out.sample_rate
            );
            println!("  Chunks:       {}", out.chunks);
            println!("  Samples:      {}", out.samples);
            println!("  Start:        {:.3}s", out.start_seconds);
            println!("  Duration:     {:.3}s", out.duration_seconds);
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}
