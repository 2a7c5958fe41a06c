use anyhow::{bail, Context, Result};
use std::path::Path;

/// Raw interleaved samples, one per row, with optional per-row time stamps.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrace {
    pub time: Option<Vec<f64>>,
    pub raw: Vec<f64>,
}

impl RawTrace {
    /// Row time stamps, generated from `dt` when the input carried none.
    pub fn row_time(&self, dt: f64) -> Vec<f64> {
        match &self.time {
            Some(time) => time.clone(),
            None => (0..self.raw.len()).map(|i| i as f64 * dt).collect(),
        }
    }
}

/// Parse one sample per line, either `value` or `time,value` (comma, tab or
/// space separated). Blank lines and `#` comments are skipped. Every line
/// must use the same layout.
pub fn parse_raw_trace(text: &str) -> Result<RawTrace> {
    let mut time = Vec::new();
    let mut raw = Vec::new();
    let mut with_time = None;
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();
        let timed = match fields.len() {
            1 => false,
            2 => true,
            n => bail!("line {} has {} fields, expected 1 or 2", idx + 1, n),
        };
        if *with_time.get_or_insert(timed) != timed {
            bail!("line {} mixes timed and untimed samples", idx + 1);
        }
        let parse = |field: &str| -> Result<f64> {
            field
                .parse()
                .with_context(|| format!("line {} is not f64: {}", idx + 1, field))
        };
        if timed {
            time.push(parse(fields[0])?);
        }
        raw.push(parse(fields[fields.len() - 1])?);
    }
    if raw.is_empty() {
        bail!("no numeric samples found");
    }
    Ok(RawTrace {
        time: with_time.unwrap_or(false).then_some(time),
        raw,
    })
}

pub fn read_raw_trace(path: &Path) -> Result<RawTrace> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_raw_trace(&text)
}
