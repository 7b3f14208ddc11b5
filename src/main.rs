use anyhow::{Context, Result};
use log::{error, info};
use std::io::{self, BufRead, Write};
use tagwatch::{AlarmEngine, Config, DEFAULT_SEPARATOR};

/// Thin host harness: load a rule configuration, then treat every stdin
/// line as one JSON tag-update batch and print the non-empty outcomes as
/// JSON lines. Routing, persistence and setpoint wiring stay with real
/// hosts; this is enough to exercise an engine from the shell.
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut path = None;
    let mut separator = DEFAULT_SEPARATOR;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--tab" => separator = '\t',
            _ => path = Some(arg),
        }
    }
    let path = path.context("usage: tagwatch [--tab] <config-file>")?;

    let config = Config::from_file_with_separator(&path, separator)
        .with_context(|| format!("loading config from {}", path))?;
    info!(
        "tagwatch v{}: config v.{} is set with {} config tags",
        tagwatch::VERSION,
        config.version().unwrap_or("'NOT IN META'"),
        config.tags.len()
    );

    let mut engine = AlarmEngine::new(config);
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let payload: serde_json::Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                error!("Skipping unparseable update: {}", e);
                continue;
            }
        };
        match engine.process_update(&payload) {
            Ok(outcome) if outcome.is_empty() => {}
            Ok(outcome) => {
                serde_json::to_writer(&mut out, &outcome)?;
                writeln!(out)?;
            }
            Err(e) => error!("Update rejected: {}", e),
        }
    }
    Ok(())
}
