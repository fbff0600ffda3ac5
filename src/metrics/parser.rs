// Parser for the monitoring tool's tabular output
//
// Each device is one line of comma-and-space separated columns:
//   index, utilization, memory-used, memory-total, [temperature], [power]
//
// The contract is deliberately lenient. Only a short line or an unreadable
// index drops a device; every other bad column falls back to its default.

use thiserror::Error;
use tracing::{debug, warn};

use super::GpuMetric;

/// Column separator used by `--format=csv,noheader,nounits`
const FIELD_SEPARATOR: &str = ", ";

/// Marker printed for readings the device does not expose
const NOT_AVAILABLE: &str = "N/A";

/// Index, utilization, memory-used, memory-total
const REQUIRED_FIELDS: usize = 4;

/// Reasons a line was skipped. Never fatal for the cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    #[error("unexpected output format ({fields} fields): {line}")]
    TooFewFields { line: String, fields: usize },

    #[error("invalid GPU index: {value}")]
    InvalidIndex { value: String },
}

/// Result of parsing a whole tool invocation
#[derive(Debug, Default)]
pub struct ParsedOutput {
    /// Parsed devices in line order
    pub gpus: Vec<GpuMetric>,

    /// One entry per skipped line
    pub warnings: Vec<ParseWarning>,
}

/// Parses one line of tool output into a [`GpuMetric`].
///
/// # Rules
/// - fewer than four fields: skipped
/// - index not an integer: skipped
/// - utilization / memory not an integer: left at zero
/// - temperature / power missing, `N/A` or blank: `None`
/// - power is decimal and truncated toward zero
///
/// # Example
/// ```
/// use gpu_metrics::metrics::parser::parse_line;
///
/// let gpu = parse_line("0, 45, 2048, 8192, 65, 120.5").unwrap();
/// assert_eq!(gpu.power_draw_watts, Some(120));
/// ```
pub fn parse_line(line: &str) -> Result<GpuMetric, ParseWarning> {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();

    if fields.len() < REQUIRED_FIELDS {
        return Err(ParseWarning::TooFewFields {
            line: line.to_string(),
            fields: fields.len(),
        });
    }

    let index = fields[0]
        .parse::<i64>()
        .map_err(|_| ParseWarning::InvalidIndex {
            value: fields[0].to_string(),
        })?;

    Ok(GpuMetric {
        index,
        utilization_percent: fields[1].parse().unwrap_or_default(),
        memory_used_mb: fields[2].parse().unwrap_or_default(),
        memory_total_mb: fields[3].parse().unwrap_or_default(),
        temperature_celsius: optional_field(&fields, 4).and_then(|v| v.parse().ok()),
        power_draw_watts: optional_field(&fields, 5).and_then(parse_watts),
    })
}

/// Parses the complete stdout of one tool invocation.
///
/// Surrounding whitespace is trimmed and blank lines are ignored. Skipped
/// lines are logged and reported in [`ParsedOutput::warnings`]; they never
/// stop the remaining lines from being parsed.
pub fn parse_output(output: &str) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();

    for line in output.trim().lines() {
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(gpu) => {
                debug!(
                    "GPU {}: util={}%, mem={}/{} MB, temp={:?}, power={:?}",
                    gpu.index,
                    gpu.utilization_percent,
                    gpu.memory_used_mb,
                    gpu.memory_total_mb,
                    gpu.temperature_celsius,
                    gpu.power_draw_watts
                );
                parsed.gpus.push(gpu);
            }
            Err(warning) => {
                warn!("Skipping line: {}", warning);
                parsed.warnings.push(warning);
            }
        }
    }

    parsed
}

/// Returns the column at `position` unless it is absent, blank or `N/A`
fn optional_field<'a>(fields: &[&'a str], position: usize) -> Option<&'a str> {
    fields
        .get(position)
        .copied()
        .filter(|value| !value.is_empty() && *value != NOT_AVAILABLE)
}

fn parse_watts(value: &str) -> Option<i64> {
    let watts = value.parse::<f64>().ok()?;
    // `as` truncates toward zero
    watts.is_finite().then(|| watts as i64)
}
