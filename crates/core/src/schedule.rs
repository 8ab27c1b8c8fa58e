use crate::config::{NotificationConfig, ScheduleConfig};
use crate::domain::Mode;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// Time-of-day windows that pick a pipeline mode when none is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    timezone: Tz,
    premarket_start: NaiveTime,
    market_start: NaiveTime,
    postmarket_start: NaiveTime,
    closed_start: NaiveTime,
}

impl Schedule {
    /// # Errors
    /// Returns error if the timezone or any window boundary cannot be parsed.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid schedule timezone {}: {}", config.timezone, e))?;

        Ok(Self {
            timezone,
            premarket_start: parse_time(&config.premarket_start)?,
            market_start: parse_time(&config.market_start)?,
            postmarket_start: parse_time(&config.postmarket_start)?,
            closed_start: parse_time(&config.closed_start)?,
        })
    }

    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Mode for the given instant, or `None` outside every window.
    #[must_use]
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<Mode> {
        let local = now.with_timezone(&self.timezone).time();
        if local >= self.premarket_start && local < self.market_start {
            Some(Mode::Premarket)
        } else if local >= self.market_start && local < self.postmarket_start {
            Some(Mode::Market)
        } else if local >= self.postmarket_start && local < self.closed_start {
            Some(Mode::Postmarket)
        } else {
            None
        }
    }

    #[must_use]
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    #[must_use]
    pub fn is_weekend(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.local_date(now).weekday(),
            Weekday::Sat | Weekday::Sun
        )
    }

    /// UTC bounds `[start, end)` of the local calendar day containing `now`.
    #[must_use]
    pub fn day_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let date = self.local_date(now);
        let start = self.local_midnight(date).unwrap_or(now);
        let end = date
            .succ_opt()
            .and_then(|next| self.local_midnight(next))
            .unwrap_or_else(|| start + chrono::Duration::days(1));
        (start, end)
    }

    fn local_midnight(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.timezone
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Overnight window during which interactive alert channels stay silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    start: NaiveTime,
    end: NaiveTime,
}

impl QuietHours {
    /// # Errors
    /// Returns error if either boundary is not `HH:MM`.
    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        Ok(Self {
            start: parse_time(&config.quiet_hours_start)?,
            end: parse_time(&config.quiet_hours_end)?,
        })
    }

    /// Inclusive at both ends; a start after the end wraps past midnight.
    #[must_use]
    pub fn contains(&self, local: NaiveTime) -> bool {
        if self.start > self.end {
            local >= self.start || local <= self.end
        } else {
            local >= self.start && local <= self.end
        }
    }
}

fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("Invalid time of day '{value}', expected HH:MM"))
}
