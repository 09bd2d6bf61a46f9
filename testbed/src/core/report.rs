//! Rendering fan-out results as text or JSON, with optional statistics

use clap::ValueEnum;
use serde::Serialize;
use std::io::Write;

use crate::core::dispatch::ExecutionResult;
use crate::core::stats::ElapsedStats;
use crate::error::{TestbedError, TestbedResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Encoding {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct NodeRecord {
    node: usize,
    exit_code: Option<i32>,
    error: Option<String>,
    stdout: String,
    stderr: String,
    elapsed: f64,
}

#[derive(Debug, Serialize)]
struct StatsRecord<'a> {
    label: &'a str,
    nodes: usize,
    stats: Option<&'a ElapsedStats>,
}

/// Write every result, then the statistics when requested
///
/// Output for every node is written even when some of them failed; the
/// combined failure is returned afterwards so callers can exit non-zero.
pub fn build_report<W: Write>(
    out: &mut W,
    results: Vec<ExecutionResult>,
    encoding: Encoding,
    label: &str,
    stats: bool,
) -> TestbedResult<()> {
    let elapsed: Vec<_> = results.iter().map(|r| r.elapsed).collect();
    let mut errors = Vec::new();

    for result in results {
        match encoding {
            Encoding::Text => write_text(out, &result)?,
            Encoding::Json => write_json(out, &result)?,
        }
        if let Some(error) = result.error {
            errors.push(error);
        }
    }

    if encoding == Encoding::Json {
        writeln!(out)?;
    }

    if stats {
        let summary = ElapsedStats::from_durations(&elapsed);
        write_stats(out, encoding, label, elapsed.len(), summary.as_ref())?;
    }

    out.flush()?;

    match TestbedError::aggregate(errors) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn write_text<W: Write>(out: &mut W, result: &ExecutionResult) -> TestbedResult<()> {
    match result.exit_code() {
        Some(code) => writeln!(out, "node[{}] exit {} elapsed {:?}", result.node, code, result.elapsed)?,
        None => writeln!(out, "node[{}] elapsed {:?}", result.node, result.elapsed)?,
    }
    if let Some(error) = &result.error {
        writeln!(out, "{error}")?;
    }
    if let Some(output) = &result.output {
        out.write_all(&output.stdout)?;
        out.write_all(&output.stderr)?;
    }
    writeln!(out)?;
    Ok(())
}

fn write_json<W: Write>(out: &mut W, result: &ExecutionResult) -> TestbedResult<()> {
    let (stdout, stderr) = match &result.output {
        Some(output) => (output.stdout_str(), output.stderr_str()),
        None => (String::new(), String::new()),
    };
    let record = NodeRecord {
        node: result.node,
        exit_code: result.exit_code(),
        error: result.error.as_ref().map(|e| e.to_string()),
        stdout,
        stderr,
        elapsed: result.elapsed.as_secs_f64(),
    };
    serde_json::to_writer(&mut *out, &record)?;
    writeln!(out)?;
    Ok(())
}

fn write_stats<W: Write>(
    out: &mut W,
    encoding: Encoding,
    label: &str,
    nodes: usize,
    stats: Option<&ElapsedStats>,
) -> TestbedResult<()> {
    match encoding {
        Encoding::Json => {
            let record = StatsRecord { label, nodes, stats };
            serde_json::to_writer(&mut *out, &record)?;
            writeln!(out)?;
        }
        Encoding::Text => match stats {
            Some(s) => writeln!(
                out,
                "{label}: nodes={nodes} mean={:.6}s stddev={:.6}s min={:.6}s max={:.6}s q1={:.6}s median={:.6}s q3={:.6}s",
                s.mean, s.stddev, s.min, s.max, s.q1, s.median, s.q3
            )?,
            None => writeln!(out, "{label}: nodes=0")?,
        },
    }
    Ok(())
}
