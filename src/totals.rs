use chrono::{DateTime, Local, Utc};

use crate::dates::{self, DateRange};
use crate::models::{Client, TimeEntry};

pub const MS_PER_HOUR: f64 = 3_600_000.0;

/// Milliseconds covered by `entry`, using `now` for a running entry.
pub fn elapsed(entry: &TimeEntry, now: DateTime<Utc>) -> i64 {
    let end = entry.end_time.unwrap_or(now);
    (end - entry.start_time).num_milliseconds().max(0)
}

pub fn total_time(entries: &[TimeEntry], now: DateTime<Utc>) -> i64 {
    entries.iter().map(|entry| elapsed(entry, now)).sum()
}

/// Total of entries that started at or after `window_start`.
pub fn windowed_time(entries: &[TimeEntry], window_start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    entries
        .iter()
        .filter(|entry| entry.start_time >= window_start)
        .map(|entry| elapsed(entry, now))
        .sum()
}

pub fn completed_time(entries: &[TimeEntry]) -> i64 {
    entries
        .iter()
        .filter(|entry| !entry.is_running())
        .map(|entry| elapsed(entry, entry.start_time))
        .sum()
}

pub fn earnings(duration_ms: i64, rate: f64) -> f64 {
    duration_ms as f64 / MS_PER_HOUR * rate
}

pub fn format_time(milliseconds: i64) -> String {
    let total_seconds = milliseconds.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionLine {
    pub id: String,
    pub start: String,
    pub end: String,
    pub duration: String,
    pub earnings: f64,
    pub notes: Option<String>,
}

/// Finished sessions that started today (local time), newest first as stored.
pub fn today_sessions(client: &Client, now: DateTime<Local>) -> Vec<SessionLine> {
    let today = DateRange::day_of(now);
    client
        .time_entries
        .iter()
        .filter(|entry| today.contains(entry.start_time))
        .filter_map(|entry| {
            let end = entry.end_time?;
            let duration_ms = elapsed(entry, end);
            Some(SessionLine {
                id: entry.id.clone(),
                start: dates::local_clock_string(entry.start_time),
                end: dates::local_clock_string(end),
                duration: format_time(duration_ms),
                earnings: earnings(duration_ms, client.hourly_rate),
                notes: entry.notes.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSummary {
    pub total_ms: i64,
    pub total_earnings: f64,
    pub week_ms: i64,
    pub week_earnings: f64,
    pub week_label: String,
    pub month_ms: i64,
    pub month_earnings: f64,
    pub month_label: String,
}

impl ClientSummary {
    pub fn build(client: &Client, now: DateTime<Local>) -> Self {
        let now_utc = now.with_timezone(&Utc);
        let week = DateRange::week_of(now);
        let month = DateRange::month_of(now);

        let total_ms = total_time(&client.time_entries, now_utc);
        let week_ms = windowed_time(&client.time_entries, week.start_utc(), now_utc);
        let month_ms = windowed_time(&client.time_entries, month.start_utc(), now_utc);

        Self {
            total_ms,
            total_earnings: earnings(total_ms, client.hourly_rate),
            week_ms,
            week_earnings: earnings(week_ms, client.hourly_rate),
            week_label: week.label().to_string(),
            month_ms,
            month_earnings: earnings(month_ms, client.hourly_rate),
            month_label: month.label().to_string(),
        }
    }
}
