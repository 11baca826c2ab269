use anyhow::Result;
use clap::{Parser, Subcommand};
use faultline_runner::{GroupSummary, ProgressEvent, RedundantInjection};
use serde_json::{json, Value};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "faultline", version, about = "Fault-injection campaign orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the campaign described by input.yaml in the current directory
    Inject {
        /// Instrumented target executable
        target: PathBuf,
        /// Arguments passed to the target on every run, input files included
        args: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Summarize return codes across all groups of a completed campaign
    Stats {
        /// Campaign artifact directory
        dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Reconstruct the fault configurations behind interesting runs
    Genconfigs {
        /// Campaign artifact directory
        dir: PathBuf,
        /// Number of configs to print
        #[arg(short, long, default_value_t = 1)]
        nconfigs: usize,
        /// Return code to filter by
        #[arg(short, long, default_value_t = -11, allow_hyphen_values = true)]
        code: i64,
        /// Run group to scan
        #[arg(short, long, default_value_t = 0)]
        group: usize,
        #[arg(short, long)]
        verbose: bool,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Inject { target, args, json } => {
            let workdir = std::env::current_dir()?;
            let schema = faultline_runner::load_campaign_schema(&workdir.join("input.yaml"))?;

            let mut confirm =
                |group: usize, warning: &RedundantInjection| confirm_redundant(group, warning);
            let mut progress: Box<dyn FnMut(ProgressEvent<'_>)> = if json {
                Box::new(|_: ProgressEvent<'_>| {})
            } else {
                println!("======Fault Injection======");
                Box::new(|event: ProgressEvent<'_>| print_progress(&event))
            };

            let report = faultline_runner::run_campaign(
                &workdir,
                &target,
                &args,
                &schema,
                &mut confirm,
                &mut *progress,
            )?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "inject",
                    "artifact_root": report.artifact_root.display().to_string(),
                    "groups": report
                        .groups
                        .iter()
                        .map(group_summary_to_json)
                        .collect::<Vec<_>>(),
                })));
            }
            println!("artifact_root: {}", report.artifact_root.display());
        }
        Commands::Stats { dir, json } => {
            let runs = faultline_analysis::group_run_counts(&dir)?;
            let codes = faultline_analysis::code_summary(&dir)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "stats",
                    "groups": codes
                        .iter()
                        .enumerate()
                        .map(|(group, counts)| json!({
                            "group": group,
                            "runs": runs.get(group).copied().unwrap_or(0),
                            "return_codes": counts,
                        }))
                        .collect::<Vec<_>>(),
                })));
            }
            println!("Return codes:");
            for (group, counts) in codes.iter().enumerate() {
                println!(
                    "Group: {} [{} runs]",
                    group,
                    runs.get(group).copied().unwrap_or(0)
                );
                for (code, count) in counts {
                    println!("  {:>3}: {:>5}", code, count);
                }
                println!();
            }
        }
        Commands::Genconfigs {
            dir,
            nconfigs,
            code,
            group,
            verbose,
            json,
        } => {
            let ids = faultline_analysis::error_run_ids(&dir, group, code)?;
            if verbose && !json {
                println!("Processing runs with return code: {}", code);
                println!(
                    "{} run IDs: {}",
                    ids.len(),
                    ids.iter()
                        .map(|r| r.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                );
                println!();
            }
            let configs = faultline_analysis::reconstruct_configs(&dir, group, code, nconfigs)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "genconfigs",
                    "group": group,
                    "code": code,
                    "matching_runs": ids,
                    "configs": configs
                        .iter()
                        .map(|c| json!({"run": c.run, "config": c.values}))
                        .collect::<Vec<_>>(),
                })));
            }
            let rendered = faultline_analysis::format_configs(&configs);
            if !rendered.is_empty() {
                println!("{}", rendered);
            }
        }
    }
    Ok(None)
}

/// The runner reports redundant injections as data; deciding what to do with
/// them happens here. Unattended invocations are allowed through silently.
fn confirm_redundant(group: usize, warning: &RedundantInjection) -> bool {
    if !std::io::stdin().is_terminal() {
        return true;
    }
    eprintln!();
    eprintln!("WARNING: group {}: {}.", group, warning.reason);
    eprint!("Do you wish to continue anyway? (Y/N) ");
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim().eq_ignore_ascii_case("y")
}

fn print_progress(event: &ProgressEvent<'_>) {
    match event {
        ProgressEvent::GroupStarted { group, .. } => {
            if *group > 0 {
                println!();
            }
            println!("---FI Config #{}---", group);
        }
        ProgressEvent::RunFinished {
            completed, total, ..
        } => {
            print_progressbar(*completed, *total);
        }
        ProgressEvent::GroupFinished { summary, .. } => {
            // The progress bar needs a newline once 100% is reached.
            println!();
            if summary.verbose {
                println!("========== SUMMARY ==========");
                println!("Return codes:");
                for (code, count) in &summary.return_codes {
                    println!("  {:>3}: {:>5}", code, count);
                }
            }
        }
    }
}

fn print_progressbar(done: u64, total: u64) {
    const WIDTH: usize = 50;
    let pct = done as f64 / total as f64;
    let filled = (pct * WIDTH as f64) as usize;
    let bar = format!("{}>{}", "=".repeat(filled), "-".repeat(WIDTH - filled));
    print!("\r[{}] {:.1}% ({} / {})", bar, pct * 100.0, done, total);
    let _ = std::io::stdout().flush();
}

fn group_summary_to_json(summary: &GroupSummary) -> Value {
    json!({
        "group": summary.group_index,
        "runs": summary.runs,
        "avg_time_secs": summary.avg_time_secs,
        "return_codes": summary.return_codes,
        "fault_rate": summary.fault_rate.as_ref().map(|rate| json!({
            "fi_rate": rate.fi_rate,
            "expected": rate.expected,
            "observed_avg": rate.observed_avg,
        })),
    })
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Inject { json, .. }
        | Commands::Stats { json, .. }
        | Commands::Genconfigs { json, .. } => *json,
    }
}
