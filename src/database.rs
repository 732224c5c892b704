use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{Error, RemoteError, Result, ValidationError};
use crate::models::{
    ClientRow, ClientUpdate, EntryWithClient, NewClient, NewTimeEntry, TimeEntryRow,
    TimeEntryUpdate,
};
use crate::store::{Query, Table, TableStore};

pub const MAX_TEXT_LEN: usize = 1000;
pub const MAX_HOURLY_RATE: f64 = 10_000.0;
const MAX_ID_LEN: usize = 128;
const MIN_USER_ID_LEN: usize = 10;
const FUTURE_TOLERANCE_SECS: i64 = 60;

const CLIENT_LIMIT: usize = 1000;
const ENTRY_LIMIT: usize = 10_000;
const EXPORT_LIMIT: usize = 50_000;

/// Validating wrapper over the remote tables. Every check runs before the
/// first remote call; backend errors are passed through untouched.
pub struct Database<S> {
    store: S,
}

impl<S: TableStore> Database<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get_clients(&self, user_id: &str) -> Result<Vec<ClientRow>> {
        validate_user_id(user_id)?;
        let query = Query::new()
            .eq("user_id", user_id)
            .order("created_at", false)
            .limit(CLIENT_LIMIT);
        let rows = self.store.select(Table::Clients, &query)?;
        decode_rows(rows)
    }

    pub fn create_client(&self, client: NewClient) -> Result<ClientRow> {
        validate_user_id(&client.user_id)?;
        let client = NewClient {
            name: sanitize_text(&client.name),
            hourly_rate: clamp_rate(client.hourly_rate),
            ..client
        };
        if client.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }

        debug!(name = %client.name, "creating client");
        let row = self.store.insert(Table::Clients, encode(&client)?)?;
        decode(row)
    }

    pub fn update_client(&self, id: &str, updates: ClientUpdate) -> Result<ClientRow> {
        validate_id("client", id)?;
        let name = match updates.name {
            Some(name) => {
                let name = sanitize_text(&name);
                if name.is_empty() {
                    return Err(ValidationError::EmptyName.into());
                }
                Some(name)
            }
            None => None,
        };
        let updates = ClientUpdate {
            name,
            hourly_rate: updates.hourly_rate.map(clamp_rate),
            archived: updates.archived,
        };

        let patch = stamped(encode(&updates)?);
        let rows = self
            .store
            .update(Table::Clients, &Query::new().eq("id", id), patch)?;
        single(rows)
    }

    /// Removes the client's entries and then the client. The two deletes are
    /// not atomic: if the second fails the client survives without entries.
    pub fn delete_client(&self, id: &str) -> Result<()> {
        validate_id("client", id)?;
        self.store
            .delete(Table::TimeEntries, &Query::new().eq("client_id", id))?;
        if let Err(err) = self.store.delete(Table::Clients, &Query::new().eq("id", id)) {
            warn!(client_id = id, error = %err, "time entries deleted but client delete failed");
            return Err(err.into());
        }
        Ok(())
    }

    pub fn get_time_entries(&self, client_id: &str) -> Result<Vec<TimeEntryRow>> {
        validate_id("client", client_id)?;
        let query = Query::new()
            .eq("client_id", client_id)
            .order("start_time", false)
            .limit(ENTRY_LIMIT);
        let rows = self.store.select(Table::TimeEntries, &query)?;
        decode_rows(rows)
    }

    pub fn create_time_entry(&self, entry: NewTimeEntry) -> Result<TimeEntryRow> {
        validate_user_id(&entry.user_id)?;
        validate_id("client", &entry.client_id)?;
        validate_start_time(&entry.start_time, Utc::now())?;
        let entry = NewTimeEntry {
            notes: entry.notes.as_deref().map(sanitize_text).filter(|note| !note.is_empty()),
            ..entry
        };

        debug!(client_id = %entry.client_id, "creating time entry");
        let row = self.store.insert(Table::TimeEntries, encode(&entry)?)?;
        decode(row)
    }

    pub fn update_time_entry(&self, id: &str, updates: TimeEntryUpdate) -> Result<TimeEntryRow> {
        validate_id("time entry", id)?;
        if let Some(end_time) = &updates.end_time {
            parse_timestamp(end_time, "end time")?;
        }
        let updates = TimeEntryUpdate {
            end_time: updates.end_time,
            notes: updates.notes.map(|note| {
                note.as_deref()
                    .map(sanitize_text)
                    .filter(|note| !note.is_empty())
            }),
        };

        let patch = stamped(encode(&updates)?);
        let rows = self
            .store
            .update(Table::TimeEntries, &Query::new().eq("id", id), patch)?;
        single(rows)
    }

    pub fn delete_time_entry(&self, id: &str) -> Result<()> {
        validate_id("time entry", id)?;
        self.store
            .delete(Table::TimeEntries, &Query::new().eq("id", id))?;
        Ok(())
    }

    /// Every entry of the user with its client's name and status, grouped
    /// by client in list order and newest first within a client. Entries
    /// whose client no longer exists are dropped, as with an inner join.
    pub fn get_all_time_entries(&self, user_id: &str) -> Result<Vec<EntryWithClient>> {
        validate_user_id(user_id)?;
        let clients: HashMap<String, (usize, String, bool)> = self
            .get_clients(user_id)?
            .into_iter()
            .enumerate()
            .map(|(index, client)| (client.id, (index, client.name, client.archived)))
            .collect();

        let query = Query::new()
            .eq("user_id", user_id)
            .order("start_time", false)
            .limit(EXPORT_LIMIT);
        let rows: Vec<TimeEntryRow> = decode_rows(self.store.select(Table::TimeEntries, &query)?)?;

        let mut joined: Vec<(usize, EntryWithClient)> = rows
            .into_iter()
            .filter_map(|entry| {
                let (index, name, archived) = clients.get(&entry.client_id)?;
                Some((
                    *index,
                    EntryWithClient {
                        entry,
                        client_name: name.clone(),
                        client_archived: *archived,
                    },
                ))
            })
            .collect();
        joined.sort_by_key(|(index, _)| *index);
        Ok(joined.into_iter().map(|(_, row)| row).collect())
    }
}

pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn sanitize_text(input: &str) -> String {
    input.trim().chars().take(MAX_TEXT_LEN).collect::<String>().trim_end().to_string()
}

/// Clamps into [0, 10000] and rounds to cents; non-finite rates become 0.
pub fn clamp_rate(rate: f64) -> f64 {
    if !rate.is_finite() {
        return 0.0;
    }
    (rate.clamp(0.0, MAX_HOURLY_RATE) * 100.0).round() / 100.0
}

pub fn validate_id(kind: &'static str, id: &str) -> std::result::Result<(), ValidationError> {
    let plausible = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && !id.chars().any(|ch| ch.is_whitespace() || ch.is_control());
    if plausible {
        Ok(())
    } else {
        Err(ValidationError::InvalidId { kind })
    }
}

pub fn validate_user_id(id: &str) -> std::result::Result<(), ValidationError> {
    validate_id("user", id)?;
    if id.len() < MIN_USER_ID_LEN {
        return Err(ValidationError::InvalidId { kind: "user" });
    }
    Ok(())
}

pub fn validate_start_time(
    value: &str,
    now: DateTime<Utc>,
) -> std::result::Result<DateTime<Utc>, ValidationError> {
    let start = parse_timestamp(value, "start time")?;
    if start > now + Duration::seconds(FUTURE_TOLERANCE_SECS) {
        return Err(ValidationError::FutureStart);
    }
    Ok(start)
}

fn parse_timestamp(
    value: &str,
    what: &'static str,
) -> std::result::Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp(what))
}

fn stamped(mut patch: Value) -> Value {
    if let Value::Object(object) = &mut patch {
        object.insert(
            "updated_at".to_string(),
            Value::String(format_timestamp(Utc::now())),
        );
    }
    patch
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T> {
    serde_json::from_value(row).map_err(|err| Error::Remote(RemoteError::Decode(err.to_string())))
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

fn single<T: DeserializeOwned>(rows: Vec<Value>) -> Result<T> {
    let row = rows
        .into_iter()
        .next()
        .ok_or(Error::Remote(RemoteError::NotFound))?;
    decode(row)
}
