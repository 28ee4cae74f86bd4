//! Output rendering: text tables or pretty JSON on stdout.

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use runq_engine::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl From<runq_core::config::OutputFormat> for OutputFormat {
    fn from(f: runq_core::config::OutputFormat) -> Self {
        match f {
            runq_core::config::OutputFormat::Text => OutputFormat::Text,
            runq_core::config::OutputFormat::Json => OutputFormat::Json,
        }
    }
}

/// Longest cell rendered in text tables.
const MAX_CELL: usize = 48;

pub fn truncate_cell(value: &str) -> String {
    if value.chars().count() <= MAX_CELL {
        return value.to_string();
    }
    let head: String = value.chars().take(MAX_CELL - 1).collect();
    format!("{head}…")
}

/// Print rows as a table, or `data` as JSON.
///
/// `rows` and `data` describe the same records; the table form may drop
/// or abbreviate fields.
pub fn print_list<R: Tabled, D: Serialize>(rows: &[R], data: &D, empty: &str, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
        OutputFormat::Text if rows.is_empty() => println!("{empty}"),
        OutputFormat::Text => println!("{}", Table::new(rows).with(Style::rounded())),
    }
    Ok(())
}

#[derive(Tabled)]
struct Field {
    #[tabled(rename = "Field")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Print one record: a field/value table, or JSON.
pub fn print_single<T: Serialize>(data: &T, format: OutputFormat) -> anyhow::Result<()> {
    let value = serde_json::to_value(data)?;
    match (format, value) {
        (OutputFormat::Text, serde_json::Value::Object(map)) => {
            let rows: Vec<Field> = map
                .into_iter()
                .map(|(name, v)| Field {
                    name,
                    value: truncate_cell(&plain(&v)),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
        (_, value) => println!("{}", serde_json::to_string_pretty(&value)?),
    }
    Ok(())
}

/// Confirmation line in text mode, `{"status":"success",...}` in JSON mode.
pub fn print_success<T: Serialize>(message: &str, data: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => println!("{message}"),
        OutputFormat::Json => {
            let body = serde_json::json!({
                "status": "success",
                "message": message,
                "data": data,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }
    Ok(())
}

pub fn print_error(err: &anyhow::Error, format: OutputFormat) {
    let code = err
        .downcast_ref::<EngineError>()
        .map(EngineError::code)
        .unwrap_or("ERROR");
    match format {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "status": "error",
                "code": code,
                "message": format!("{err:#}"),
            });
            println!("{body}");
        }
        OutputFormat::Text => eprintln!("Error: {err:#}"),
    }
}

/// Scalar JSON value as display text; `null` renders empty.
pub fn plain(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}
