//! Headless driver for [`machine_cyber::Machine`]: arms a deadstart panel
//! (if one is given), runs a fixed number of ticks, and optionally persists
//! state to a directory on exit.

use std::path::PathBuf;
use std::process;

use cyber_core::PpWord;
use machine_cyber::{Machine, MachineConfig};

struct CliArgs {
    panel_path: Option<PathBuf>,
    ticks: u64,
    pp_count: usize,
    cm_size: usize,
    channel_count: u8,
    persist_dir: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        panel_path: None,
        ticks: 1000,
        pp_count: 10,
        cm_size: 4096,
        channel_count: 8,
        persist_dir: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--panel" => {
                i += 1;
                cli.panel_path = args.get(i).map(PathBuf::from);
            }
            "--ticks" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.ticks = s.parse().unwrap_or(1000);
                }
            }
            "--pp-count" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.pp_count = s.parse().unwrap_or(10);
                }
            }
            "--cm-size" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.cm_size = s.parse().unwrap_or(4096);
                }
            }
            "--channel-count" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.channel_count = s.parse().unwrap_or(8);
                }
            }
            "--persist" => {
                i += 1;
                cli.persist_dir = args.get(i).map(PathBuf::from);
            }
            "--help" | "-h" => {
                eprintln!("Usage: cyber-runner [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --panel <file>         Deadstart panel: whitespace-separated octal words");
                eprintln!("  --ticks <n>            Number of machine ticks to run [default: 1000]");
                eprintln!("  --pp-count <n>         Number of peripheral processors [default: 10]");
                eprintln!("  --cm-size <n>          Central memory size in words [default: 4096]");
                eprintln!("  --channel-count <n>    Configured channel count [default: 8]");
                eprintln!("  --persist <dir>        Load/save cmStore/ecsStore/ppStore here");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// Parse a deadstart panel file: whitespace-separated 12-bit octal words,
/// one machine word per token.
fn load_panel(path: &std::path::Path) -> Result<Vec<PpWord>, std::io::Error> {
    let text = std::fs::read_to_string(path)?;
    let words = text
        .split_whitespace()
        .filter_map(|token| u16::from_str_radix(token, 8).ok())
        .collect();
    Ok(words)
}

fn main() {
    let cli = parse_args();

    let mut config = MachineConfig::minimal();
    config.pp_count = cli.pp_count;
    config.cm_size = cli.cm_size;
    config.channel_count = cli.channel_count;
    config.persistence_dir = cli.persist_dir;

    if let Some(path) = &cli.panel_path {
        match load_panel(path) {
            Ok(words) => config.deadstart_panel = Some(words),
            Err(err) => {
                eprintln!("Failed to read panel file {}: {err}", path.display());
                process::exit(1);
            }
        }
    }

    let mut machine = match Machine::new(config) {
        Ok(machine) => machine,
        Err(err) => {
            eprintln!("Failed to configure machine: {err}");
            process::exit(1);
        }
    };

    for _ in 0..cli.ticks {
        machine.tick();
    }

    eprintln!(
        "Ran {} ticks ({} model, {} PPs).",
        machine.cycles(),
        describe_model(machine.model()),
        machine.barrel().len()
    );

    if let Err(err) = machine.save() {
        eprintln!("Failed to persist machine state: {err}");
        process::exit(1);
    }
}

fn describe_model(model: cyber_core::ModelType) -> &'static str {
    match model {
        cyber_core::ModelType::Cyber6400 => "Cyber 6400",
        cyber_core::ModelType::Cyber170State => "Cyber 170 State",
        cyber_core::ModelType::Cyber175 => "Cyber 175",
        cyber_core::ModelType::Cyber800 => "Cyber 800",
    }
}
