use chrono::{DateTime, Local, SecondsFormat, Utc};
use clap::ValueEnum;
use serde::Serialize;

use crate::dates::{self, DateRange};
use crate::models::{Client, EntryWithClient};
use crate::totals::{elapsed, format_time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportKind {
    /// Full JSON backup
    Json,
    /// Every finished session as CSV
    Csv,
    /// This month's sessions of active clients with totals
    Monthly,
}

impl ExportKind {
    pub fn file_name(self, now: DateTime<Local>) -> String {
        match self {
            ExportKind::Json => backup_file_name(now),
            ExportKind::Csv => csv_file_name(now),
            ExportKind::Monthly => monthly_file_name(now),
        }
    }

    pub fn done_message(self) -> &'static str {
        match self {
            ExportKind::Json => "Data exported",
            ExportKind::Csv => "CSV exported",
            ExportKind::Monthly => "Monthly report exported",
        }
    }
}

pub const CSV_HEADER: &str = "Client Name,Status,Date,Start Time,End Time,Duration,Notes";
pub const MONTHLY_HEADER: &str = "Client Name,Date,Start Time,End Time,Duration,Notes";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<'a> {
    clients: &'a [Client],
    selected_client_id: Option<&'a str>,
    export_date: String,
    user_id: &'a str,
}

/// Full backup of the in-memory client list.
pub fn to_json(
    clients: &[Client],
    selected_client_id: Option<&str>,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<String, serde_json::Error> {
    let snapshot = Snapshot {
        clients,
        selected_client_id,
        export_date: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        user_id,
    };
    serde_json::to_string_pretty(&snapshot)
}

/// One row per finished entry of the joined rows, in their order; running
/// entries are skipped.
pub fn to_csv(rows: &[EntryWithClient]) -> String {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');

    for row in rows {
        let entry = &row.entry;
        let Some(end) = entry.end_time else {
            continue;
        };
        let status = if row.client_archived { "Archived" } else { "Active" };
        let duration = (end - entry.start_time).num_milliseconds().max(0);
        csv.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            quote(&row.client_name),
            status,
            dates::local_date_string(entry.start_time),
            dates::local_time_string(entry.start_time),
            dates::local_time_string(end),
            format_time(duration),
            entry
                .notes
                .as_deref()
                .filter(|notes| !notes.is_empty())
                .map(quote)
                .unwrap_or_default(),
        ));
    }

    csv
}

/// Finished entries of active clients that started in the month of `now`,
/// with a subtotal per client and a grand total.
pub fn monthly_report(clients: &[Client], now: DateTime<Local>) -> String {
    let month = DateRange::month_of(now);
    let mut csv = String::from(MONTHLY_HEADER);
    csv.push('\n');
    let mut grand_total = 0;

    for client in clients.iter().filter(|client| !client.archived) {
        let rows: Vec<_> = client
            .time_entries
            .iter()
            .filter(|entry| month.contains(entry.start_time))
            .filter_map(|entry| entry.end_time.map(|end| (entry, end)))
            .collect();
        if rows.is_empty() {
            continue;
        }

        let mut client_total = 0;
        for (entry, end) in rows {
            let duration = elapsed(entry, end);
            client_total += duration;
            csv.push_str(&format!(
                "{},{},{},{},{},{}\n",
                quote(&client.name),
                dates::local_date_string(entry.start_time),
                dates::local_time_string(entry.start_time),
                dates::local_time_string(end),
                format_time(duration),
                entry.notes.as_deref().map(quote).unwrap_or_default(),
            ));
        }
        grand_total += client_total;

        csv.push_str(&format!(
            "{},,,,{},\n\n",
            quote(&format!("{} TOTAL", client.name)),
            format_time(client_total)
        ));
    }

    csv.push_str(&format!(
        "{},,,,{},\n",
        quote("GRAND TOTAL"),
        format_time(grand_total)
    ));
    csv
}

pub fn backup_file_name(now: DateTime<Local>) -> String {
    format!("time-tracker-backup-{}.json", now.format("%Y-%m-%d"))
}

pub fn csv_file_name(now: DateTime<Local>) -> String {
    format!("time-tracker-export-{}.csv", now.format("%Y-%m-%d"))
}

pub fn monthly_file_name(now: DateTime<Local>) -> String {
    format!("time-tracker-{}.csv", now.format("%B-%Y"))
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
