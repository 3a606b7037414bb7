use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub const SCHEMA_BASE: &str = "https://schemas.3leaps.dev/symact/cli/v1";

#[derive(Serialize)]
struct Envelope<'a> {
    schema_id: String,
    #[serde(flatten)]
    body: &'a Value,
}

/// Print a JSON document in the requested format.
///
/// `schema` names the document kind; JSON output carries it as `schema_id`.
pub fn print_value(schema: &str, value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let line = match value {
                Value::Object(_) => serde_json::to_string(&Envelope {
                    schema_id: format!("{SCHEMA_BASE}/{schema}.schema.json"),
                    body: value,
                }),
                _ => serde_json::to_string(value),
            };
            println!("{}", line.unwrap_or_else(|_| "{}".to_string()));
        }
        OutputFormat::Table => println!("{}", render_table(value)),
        OutputFormat::Pretty => println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        ),
        OutputFormat::Raw => println!("{value}"),
    }
}

fn render_table(value: &Value) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    match value {
        Value::Object(map) => {
            table.set_header(vec!["FIELD", "VALUE"]);
            for (key, field) in map {
                table.add_row(vec![key.to_uppercase(), cell(field)]);
            }
        }
        Value::Array(items) => {
            let columns: Vec<String> = match items.first() {
                Some(Value::Object(first)) => first.keys().cloned().collect(),
                _ => Vec::new(),
            };
            if columns.is_empty() {
                table.set_header(vec!["VALUE"]);
                for item in items {
                    table.add_row(vec![cell(item)]);
                }
            } else {
                table.set_header(columns.iter().map(|c| c.to_uppercase()).collect::<Vec<_>>());
                for item in items {
                    table.add_row(
                        columns
                            .iter()
                            .map(|c| item.get(c).map(cell).unwrap_or_default())
                            .collect::<Vec<_>>(),
                    );
                }
            }
        }
        other => {
            table.set_header(vec!["VALUE"]);
            table.add_row(vec![cell(other)]);
        }
    }
    table
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn object_table_has_a_row_per_field() {
        let table = render_table(&json!({"server_pid": 42, "build": "symact-0.1.0"}));
        let text = table.to_string();
        assert!(text.contains("SERVER_PID"));
        assert!(text.contains("symact-0.1.0"));
    }

    #[test]
    fn array_of_objects_uses_keys_as_columns() {
        let table = render_table(&json!([
            {"id": 0, "name": "A"},
            {"id": 1, "name": "B"}
        ]));
        let text = table.to_string();
        assert!(text.contains("NAME"));
        assert!(text.contains('B'));
    }

    #[test]
    fn null_renders_as_dash() {
        assert_eq!(cell(&Value::Null), "-");
        assert_eq!(cell(&json!("x")), "x");
        assert_eq!(cell(&json!(3)), "3");
    }
}
