use std::collections::HashSet;

use csv::{ReaderBuilder, Trim};
use serde_json::Value;

use crate::error::ImportError;

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedClient {
    pub name: String,
    pub hourly_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Json,
    Csv,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedImport {
    pub format: ImportFormat,
    pub clients: Vec<ImportedClient>,
}

/// Parses pasted client data. Strict JSON is tried first; text that does not
/// look like JSON falls back to `Name,Rate` CSV lines.
pub fn parse(input: &str) -> Result<ParsedImport, ImportError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ImportError::NoClients);
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ (Value::Array(_) | Value::Object(_))) => {
            let clients = parse_json_value(value)?;
            finish(ImportFormat::Json, clients)
        }
        Err(err) if looks_like_json(trimmed) => Err(ImportError::InvalidJson(err.to_string())),
        Ok(_) | Err(_) => {
            let clients = parse_csv(trimmed)?;
            finish(ImportFormat::Csv, clients)
        }
    }
}

/// Drops clients whose name matches an existing client (case-insensitive) or
/// an earlier row of the same import.
pub fn without_duplicates<'a, I>(imported: Vec<ImportedClient>, existing: I) -> Vec<ImportedClient>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: HashSet<String> = existing.into_iter().map(str::to_lowercase).collect();
    imported
        .into_iter()
        .filter(|client| seen.insert(client.name.to_lowercase()))
        .collect()
}

fn finish(format: ImportFormat, clients: Vec<ImportedClient>) -> Result<ParsedImport, ImportError> {
    if clients.is_empty() {
        return Err(ImportError::NoClients);
    }
    Ok(ParsedImport { format, clients })
}

fn looks_like_json(trimmed: &str) -> bool {
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

fn parse_json_value(value: Value) -> Result<Vec<ImportedClient>, ImportError> {
    let records = match value {
        Value::Array(records) => records,
        Value::Object(mut object) => match object.remove("clients") {
            Some(Value::Array(records)) => records,
            _ => return Err(ImportError::UnsupportedShape),
        },
        _ => return Err(ImportError::UnsupportedShape),
    };

    Ok(records.iter().filter_map(json_record).collect())
}

fn json_record(record: &Value) -> Option<ImportedClient> {
    let name = record.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let hourly_rate = ["hourlyRate", "hourly_rate"]
        .iter()
        .filter_map(|key| record.get(*key))
        .find_map(json_rate)
        .unwrap_or(0.0);
    Some(ImportedClient {
        name: name.to_string(),
        hourly_rate,
    })
}

fn json_rate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|rate| *rate != 0.0),
        Value::String(text) => leading_number(text).filter(|rate| *rate != 0.0),
        _ => None,
    }
}

fn parse_csv(text: &str) -> Result<Vec<ImportedClient>, ImportError> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let Some(first) = lines.first() else {
        return Err(ImportError::NoClients);
    };

    let skip = usize::from(is_header(first));
    let body = lines[skip..].join("\n");

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let mut clients = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| ImportError::InvalidCsv(err.to_string()))?;
        let Some(name) = record.get(0).map(strip_quotes).filter(|name| !name.is_empty()) else {
            continue;
        };
        let hourly_rate = record
            .get(1)
            .map(strip_quotes)
            .and_then(leading_number)
            .unwrap_or(0.0);
        clients.push(ImportedClient {
            name: name.to_string(),
            hourly_rate,
        });
    }
    Ok(clients)
}

fn is_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("name") || lower.contains("client") || lower.contains("rate")
}

fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .or_else(|| value.strip_prefix('\''))
        .unwrap_or(value);
    value
        .strip_suffix('"')
        .or_else(|| value.strip_suffix('\''))
        .unwrap_or(value)
        .trim()
}

/// Longest numeric prefix, so `"75/h"` reads as 75 and `"1e3"` as 1000.
fn leading_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let mut end = 0;
    let mut previous = None;
    for (index, ch) in text.char_indices() {
        let accepted = match ch {
            '0'..='9' | '.' | 'e' | 'E' => true,
            '-' | '+' => index == 0 || matches!(previous, Some('e' | 'E')),
            _ => false,
        };
        if !accepted {
            break;
        }
        end = index + ch.len_utf8();
        previous = Some(ch);
    }
    (1..=end)
        .rev()
        .find_map(|len| text[..len].parse::<f64>().ok())
        .filter(|rate| rate.is_finite())
}
