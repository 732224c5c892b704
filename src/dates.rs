use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Utc};

/// A local-time window with an inclusive start and exclusive end.
#[derive(Debug, Clone)]
pub struct DateRange {
    start: DateTime<Local>,
    end: DateTime<Local>,
    label: String,
}

impl DateRange {
    /// Sunday 00:00:00 of the week containing `now` through the next Sunday.
    pub fn week_of(now: DateTime<Local>) -> Self {
        let today = now.date_naive();
        let first = today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
        let last = first + Duration::days(6);
        let label = format!("{} - {}", first.format("%b %-d"), last.format("%b %-d"));
        Self {
            start: local_datetime(first, 0, 0, 0),
            end: local_datetime(first + Duration::days(7), 0, 0, 0),
            label,
        }
    }

    /// Day 1 00:00:00 of the month containing `now` through the next month.
    pub fn month_of(now: DateTime<Local>) -> Self {
        let today = now.date_naive();
        let first = first_of_month(today.year(), today.month());
        let next = if today.month() == 12 {
            first_of_month(today.year() + 1, 1)
        } else {
            first_of_month(today.year(), today.month() + 1)
        };
        Self {
            start: local_datetime(first, 0, 0, 0),
            end: local_datetime(next, 0, 0, 0),
            label: first.format("%B %Y").to_string(),
        }
    }

    pub fn day_of(now: DateTime<Local>) -> Self {
        let today = now.date_naive();
        Self {
            start: local_datetime(today, 0, 0, 0),
            end: local_datetime(today + Duration::days(1), 0, 0, 0),
            label: today.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.with_timezone(&Utc)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&Local);
        local >= self.start && local < self.end
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    #[cfg(test)]
    pub fn start(&self) -> DateTime<Local> {
        self.start
    }
}

pub fn local_date_string(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

pub fn local_time_string(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&Local).format("%H:%M:%S").to_string()
}

pub fn local_clock_string(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&Local).format("%H:%M").to_string()
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

pub fn local_datetime(date: NaiveDate, hour: u32, minute: u32, second: u32) -> DateTime<Local> {
    let result = Local.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, second);
    result
        .earliest()
        .or_else(|| result.latest())
        .unwrap_or_else(Local::now)
}
