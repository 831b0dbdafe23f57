//! One-shot batch run: analyze every configured instrument, deliver, exit.

use anyhow::{bail, Result};

use fund_pulse::notify::ReportEntry;
use fund_pulse::{init_tracing, runner, AppConfig, Runtime};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::load_default()?;
    if config.instruments.is_empty() {
        bail!("no instruments configured (set [[instruments]] or FUND_CODES)");
    }
    let rt = Runtime::from_config(config)?;
    let summary = runner::run_batch(&rt).await;

    for entry in &summary.entries {
        match entry {
            ReportEntry::Decided(d) => {
                println!("{} {:<24} {:<4} {}", d.code, d.name, d.action.as_str(), d.headline)
            }
            ReportEntry::Failed { code, name, reason } => {
                println!("{code} {name:<24} FAILED {reason}")
            }
        }
    }
    for report in &summary.reports {
        if !report.failed().is_empty() {
            eprintln!("delivery failed for: {}", report.failed().join(", "));
        }
    }
    println!(
        "{} instruments, {} failed",
        summary.entries.len(),
        summary.failed()
    );
    Ok(())
}
