use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row of the `clients` table.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClientRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Row of the `time_entries` table.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimeEntryRow {
    pub id: String,
    pub client_id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewClient {
    pub user_id: String,
    pub name: String,
    pub archived: bool,
    pub hourly_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ClientUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

/// Timestamps are RFC 3339 strings and are validated by the data access
/// layer before they are sent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewTimeEntry {
    pub client_id: String,
    pub user_id: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TimeEntryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// `Some(None)` clears the note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

/// Time entry joined with its client's name and status, used for bulk exports.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryWithClient {
    pub entry: TimeEntryRow,
    pub client_name: String,
    pub client_archived: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TimeEntry {
    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }
}

impl From<TimeEntryRow> for TimeEntry {
    fn from(row: TimeEntryRow) -> Self {
        Self {
            id: row.id,
            start_time: row.start_time,
            end_time: row.end_time,
            notes: row.notes.filter(|note| !note.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub time_entries: Vec<TimeEntry>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub hourly_rate: f64,
}

impl Client {
    pub fn from_row(row: ClientRow, entries: Vec<TimeEntryRow>) -> Self {
        Self {
            id: row.id,
            name: row.name,
            time_entries: entries.into_iter().map(TimeEntry::from).collect(),
            archived: row.archived,
            hourly_rate: row.hourly_rate.unwrap_or(0.0),
        }
    }

    pub fn active_entry(&self) -> Option<&TimeEntry> {
        self.time_entries.iter().find(|entry| entry.is_running())
    }

    pub fn has_active_timer(&self) -> bool {
        self.active_entry().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_entry_rows_parse_backend_timestamps() {
        let row: TimeEntryRow = serde_json::from_str(
            r#"{
                "id": "e1",
                "client_id": "c1",
                "user_id": "u1",
                "start_time": "2026-02-03T10:00:00.123456+00:00",
                "end_time": null,
                "notes": null,
                "created_at": "2026-02-03T10:00:00+00:00",
                "updated_at": "2026-02-03T10:00:00+00:00"
            }"#,
        )
        .unwrap();

        let entry = TimeEntry::from(row);
        assert!(entry.is_running());
        assert_eq!(entry.start_time.timestamp(), 1_770_112_800);
    }

    #[test]
    fn client_serializes_in_backup_shape() {
        let client = Client {
            id: "c1".to_string(),
            name: "Acme Corp".to_string(),
            time_entries: vec![TimeEntry {
                id: "e1".to_string(),
                start_time: DateTime::from_timestamp_millis(1_000).unwrap(),
                end_time: Some(DateTime::from_timestamp_millis(61_000).unwrap()),
                notes: None,
            }],
            archived: false,
            hourly_rate: 75.0,
        };

        let value = serde_json::to_value(&client).unwrap();
        assert_eq!(value["hourlyRate"], 75.0);
        assert_eq!(value["timeEntries"][0]["startTime"], 1_000);
        assert_eq!(value["timeEntries"][0]["endTime"], 61_000);
        assert!(value["timeEntries"][0].get("notes").is_none());
    }

    #[test]
    fn update_serializes_only_present_fields() {
        let update = TimeEntryUpdate {
            end_time: None,
            notes: Some(None),
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value, serde_json::json!({ "notes": null }));
    }
}
