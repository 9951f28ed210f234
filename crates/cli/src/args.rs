use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;

use consolidator_core::{ColumnProfile, Config, OutputFormat};

/// Default config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "consolidator.toml";

#[derive(Debug, Parser)]
#[command(name = "consolidate")]
#[command(version, about = "Upload invoices, consolidate them into one report and download it")]
pub struct Args {
    /// Invoice files to upload (JSON or PDF)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Configuration file
    #[arg(long, env = "CONSOLIDATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Report format: xlsx, csv, pdf or json
    #[arg(long, value_parser = parse_format)]
    pub format: Option<OutputFormat>,

    /// Column profile: basic, complete, accountant or custom
    #[arg(long, value_parser = parse_profile)]
    pub profile: Option<ColumnProfile>,

    /// Columns for the custom profile, comma separated
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,

    /// Leave the summary sheet out of the report
    #[arg(long)]
    pub no_summary: bool,

    /// Leave the line items sheet out of the report
    #[arg(long)]
    pub no_items_sheet: bool,

    /// Directory the report is written to
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Print collected metrics in Prometheus text format before exiting
    #[arg(long)]
    pub print_metrics: bool,
}

impl Args {
    /// Config file to load: `--config`, else the default file if present.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        })
    }

    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        let processing = &mut config.processing;
        if let Some(format) = self.format {
            processing.output_format = format;
        }
        if let Some(profile) = self.profile {
            processing.column_profile = profile;
        }
        if !self.columns.is_empty() {
            processing.custom_columns = self
                .columns
                .iter()
                .map(|c| c.trim().to_string())
                .collect::<BTreeSet<_>>();
            // Columns only make sense with the custom profile.
            if self.profile.is_none() {
                processing.column_profile = ColumnProfile::Custom;
            }
        }
        if self.no_summary {
            processing.include_summary = false;
        }
        if self.no_items_sheet {
            processing.include_items_sheet = false;
        }
        if let Some(dir) = &self.output_dir {
            config.download.output_dir = dir.clone();
        }
    }
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    s.parse().map_err(|e: consolidator_core::ApiError| e.to_string())
}

fn parse_profile(s: &str) -> Result<ColumnProfile, String> {
    s.parse().map_err(|e: consolidator_core::ApiError| e.to_string())
}
