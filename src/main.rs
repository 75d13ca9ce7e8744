use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

use intentflow::config::Config;
use intentflow::logging;
use intentflow::pipeline::Driver;

#[derive(Parser)]
#[command(name = "intentflow")]
#[command(about = "Dyadic migration-intent survey reconciliation pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for one collection date and write all outputs
    Run {
        /// Collection date label of the raw export, e.g. 2021-03-22
        date: String,
        /// Also write the chord-diagram variation exports (GDP bin / region)
        #[arg(long)]
        group_exports: bool,
    },
    /// Report how the cross-date reciprocal pair count shifts as each
    /// collection date is hypothetically excluded
    Sensitivity {
        /// Collection date label of the raw export
        date: String,
    },
}

fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)?;
    let driver = Driver::new(config)?;

    match cli.command {
        Commands::Run { date, group_exports } => {
            println!("🚀 Running reconciliation pipeline for {}...", date);
            match driver.run(&date, group_exports) {
                Ok(summary) => {
                    println!("\n📊 Run results:");
                    println!("   Panel rows: {}", summary.panel_rows);
                    println!("   Dropped rows: {}", summary.dropped_rows);
                    println!("   Cross-date reciprocal rows: {}", summary.cross_date_rows);
                    println!("   Audit interventions: {}", summary.audit_entries);
                    for output in &summary.outputs {
                        println!("   Output: {}", output.display());
                    }
                    println!("✅ Run completed successfully");
                }
                Err(e) => {
                    error!("Pipeline run failed: {}", e);
                    println!("❌ Pipeline run failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Sensitivity { date } => {
            println!("🔍 Reciprocity sensitivity for {}...", date);
            match driver.sensitivity(&date) {
                Ok(entries) => {
                    let baseline = entries
                        .iter()
                        .find(|e| e.removed_date.is_none())
                        .map(|e| e.pair_count)
                        .unwrap_or(0);
                    println!("\n📊 Cross-date reciprocal pairs (baseline {}):", baseline);
                    for entry in entries.iter().filter(|e| e.removed_date.is_some()) {
                        let date = entry.removed_date.map(|d| d.to_string()).unwrap_or_default();
                        let delta = entry.pair_count as i64 - baseline as i64;
                        println!("   without {}: {} ({:+})", date, entry.pair_count, delta);
                    }
                    println!("✅ Sensitivity report complete");
                }
                Err(e) => {
                    error!("Sensitivity report failed: {}", e);
                    println!("❌ Sensitivity report failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}
