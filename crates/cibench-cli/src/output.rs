//! Output formatting for the cibench CLI

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Trait for types that can be shown as table rows
pub trait Formattable {
    fn table_headers() -> Vec<String>;
    fn table_row(&self) -> Vec<String>;
}

/// Output formatter
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print `report` for structured formats, or `rows` as a table
    pub fn print_report<R, T>(&self, report: &R, rows: &[T]) -> Result<()>
    where
        R: Serialize,
        T: Formattable,
    {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(report)?),
            OutputFormat::Table if rows.is_empty() => println!("{}", "No items found".dimmed()),
            OutputFormat::Table => println!("{}", render_table(rows)),
        }
        Ok(())
    }

    /// One-line summary; structured formats already carry it in the report
    pub fn print_summary(&self, message: &str, success: bool) {
        if self.format != OutputFormat::Table {
            return;
        }
        if success {
            println!("{} {}", "✓".green().bold(), message.green());
        } else {
            println!("{} {}", "✗".red().bold(), message.red());
        }
    }

    pub fn print_error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                let result = serde_json::json!({ "status": "error", "message": message });
                println!("{}", result);
            }
            OutputFormat::Yaml => {
                println!("status: error");
                println!("message: {}", message);
            }
            OutputFormat::Table => eprintln!("{} {}", "✗".red().bold(), message.red()),
        }
    }
}

fn render_table<T: Formattable>(rows: &[T]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = T::table_headers()
        .iter()
        .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .table_row()
            .into_iter()
            .map(|value| match status_color(&value) {
                Some(color) => Cell::new(value).fg(color),
                None => Cell::new(value),
            })
            .collect();
        table.add_row(cells);
    }
    table
}

/// Color for phase and boolean status values
pub fn status_color(value: &str) -> Option<Color> {
    match value {
        "ok" | "yes" => Some(Color::Green),
        "failed" | "error" | "no" => Some(Color::Red),
        "skipped" => Some(Color::DarkGrey),
        _ => None,
    }
}

pub fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

pub fn format_seconds(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else {
        let whole = seconds.round() as u64;
        format!("{}m {}s", whole / 60, whole % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row(&'static str, &'static str);

    impl Formattable for Row {
        fn table_headers() -> Vec<String> {
            vec!["Scenario".to_string(), "Status".to_string()]
        }

        fn table_row(&self) -> Vec<String> {
            vec![self.0.to_string(), self.1.to_string()]
        }
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
    }

    #[test]
    fn test_render_table() {
        let table = render_table(&[Row("local_single", "ok"), Row("k8s_pd", "failed")]);
        let rendered = table.to_string();
        assert!(rendered.contains("Scenario"));
        assert!(rendered.contains("local_single"));
        assert!(rendered.contains("k8s_pd"));
    }

    #[test]
    fn test_status_color() {
        assert_eq!(status_color("ok"), Some(Color::Green));
        assert_eq!(status_color("failed"), Some(Color::Red));
        assert_eq!(status_color("skipped"), Some(Color::DarkGrey));
        assert_eq!(status_color("qwen3"), None);
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(3.24), "3.2s");
        assert_eq!(format_seconds(90.0), "1m 30s");
        assert_eq!(yes_no(true), "yes");
    }
}
