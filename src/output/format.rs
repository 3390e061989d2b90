use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use unicode_truncate::UnicodeTruncateStr;

use crate::probe::fields::FieldValue;
use crate::probe::result::ProbeResult;

const NAME_WIDTH: usize = 18;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    #[default]
    Text,
    Json,
    JsonPretty,
    Quiet,
}

fn to_fixed_width(input: &str, width: usize) -> String {
    let (truncated, _) = input.unicode_truncate(width);
    format!("{:<width$}", truncated, width = width)
}

/// One result as a JSON object: identity first, then the filtered fields in
/// table order.
struct Record<'a> {
    result: &'a ProbeResult,
    fields: &'a [(&'static str, FieldValue)],
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let r = self.result;
        let mut map = serializer.serialize_map(Some(4 + self.fields.len()))?;
        map.serialize_entry("Target", &r.target)?;
        map.serialize_entry("IP", &ip_string(r))?;
        map.serialize_entry("Timestamp", &r.timestamp)?;
        map.serialize_entry("Seq", &r.seq)?;
        for (name, value) in self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

fn ip_string(result: &ProbeResult) -> String {
    result.ip.map(|ip| ip.to_string()).unwrap_or_default()
}

#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    mode: OutputMode,
}

impl OutputFormatter {
    pub fn new(mode: OutputMode) -> Self {
        OutputFormatter { mode }
    }

    /// `None` in quiet mode.
    pub fn render(&self, result: &ProbeResult, fields: &[(&'static str, FieldValue)]) -> Option<String> {
        let record = Record { result, fields };
        match self.mode {
            OutputMode::Quiet => None,
            OutputMode::Text => Some(render_text(result, fields)),
            OutputMode::Json => Some(serde_json::to_string(&record).unwrap_or_else(|e| fallback(result, &e))),
            OutputMode::JsonPretty => {
                Some(serde_json::to_string_pretty(&record).unwrap_or_else(|e| fallback(result, &e)))
            }
        }
    }
}

fn fallback(result: &ProbeResult, err: &serde_json::Error) -> String {
    serde_json::json!({
        "Target": result.target,
        "Seq": result.seq,
        "Error": err.to_string(),
    })
    .to_string()
}

fn render_text(result: &ProbeResult, fields: &[(&'static str, FieldValue)]) -> String {
    let ip = match result.ip {
        Some(ip) => ip.to_string(),
        None => "-".to_string(),
    };
    let mut out = format!(
        "Target: {} IP: {} Timestamp: {} Seq: {}",
        result.target, ip, result.timestamp, result.seq
    );
    for (name, value) in fields {
        out.push_str(&format!("\n  {} {}", to_fixed_width(&format!("{name}:"), NAME_WIDTH), value));
    }
    if let Some(err) = &result.error {
        out.push_str(&format!("\n  {} {}", to_fixed_width("Error:", NAME_WIDTH), err));
    }
    out
}
