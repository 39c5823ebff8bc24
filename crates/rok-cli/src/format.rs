// SPDX-License-Identifier: MIT OR Apache-2.0
//! Output formatting for CLI results.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Supported output formats for CLI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Compact JSON (single line).
    Json,
    /// Pretty-printed JSON.
    JsonPretty,
    /// Human-readable multi-line text.
    Text,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::JsonPretty => "json-pretty",
            Self::Text => "text",
        };
        f.write_str(s)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "json-pretty" | "json_pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Renders command results in one of the supported [`OutputFormat`]s.
#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    /// Create a formatter for `format`.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render any serializable result, with `text_lines` supplying the
    /// human-readable rendering when the format is [`OutputFormat::Text`].
    pub fn render<T: Serialize>(&self, value: &T, text_lines: impl FnOnce(&T) -> Vec<String>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(value).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(value).unwrap_or_default(),
            OutputFormat::Text => text_lines(value).join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_round_trips_through_display_and_from_str() {
        for fmt in [OutputFormat::Json, OutputFormat::JsonPretty, OutputFormat::Text] {
            assert_eq!(fmt.to_string().parse::<OutputFormat>().unwrap(), fmt);
        }
    }

    #[test]
    fn from_str_rejects_unknown_formats() {
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn json_render_produces_valid_json() {
        let formatter = Formatter::new(OutputFormat::Json);
        let rendered = formatter.render(&serde_json::json!({"ok": true}), |_| vec!["unused".into()]);
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["ok"], true);
    }

    #[test]
    fn text_render_uses_the_supplied_lines() {
        let formatter = Formatter::new(OutputFormat::Text);
        let rendered = formatter.render(&42, |v| vec![format!("value: {v}")]);
        assert_eq!(rendered, "value: 42");
    }
}
