//! Cycle arithmetic over the configured slots, window and timezone.
//!
//! Every operation takes the current instant explicitly.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use common::config::ScheduleConfig;
use common::{CycleKey, Error, RefreshCycle};

#[derive(Debug, Clone)]
pub struct Schedule {
    tz: Tz,
    window_start: NaiveTime,
    window_end: NaiveTime,
    slots: Vec<NaiveTime>,
}

impl Schedule {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, Error> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|_| Error::Config(format!("unknown timezone '{}'", config.timezone)))?;
        let window_start = parse_hhmm("schedule.window_start", &config.window_start)?;
        let window_end = parse_hhmm("schedule.window_end", &config.window_end)?;
        let slots = config
            .slots
            .iter()
            .map(|s| parse_hhmm("schedule.slots", s))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(tz, window_start, window_end, slots)
    }

    /// Slots must be strictly increasing and lie inside `[window_start, window_end]`.
    pub fn new(
        tz: Tz,
        window_start: NaiveTime,
        window_end: NaiveTime,
        slots: Vec<NaiveTime>,
    ) -> Result<Self, Error> {
        if window_start >= window_end {
            return Err(Error::Config(format!(
                "window start {} must be before window end {}",
                window_start.format("%H:%M"),
                window_end.format("%H:%M")
            )));
        }
        if slots.is_empty() {
            return Err(Error::Config("at least one refresh slot is required".into()));
        }
        if slots.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(Error::Config("refresh slots must be sorted and unique".into()));
        }
        if let Some(outside) = slots
            .iter()
            .find(|slot| **slot < window_start || **slot > window_end)
        {
            return Err(Error::Config(format!(
                "slot {} lies outside the operating window",
                outside.format("%H:%M")
            )));
        }

        Ok(Self {
            tz,
            window_start,
            window_end,
            slots,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn slots(&self) -> &[NaiveTime] {
        &self.slots
    }

    pub fn window(&self) -> (NaiveTime, NaiveTime) {
        (self.window_start, self.window_end)
    }

    pub fn local(&self, now: DateTime<Utc>) -> DateTime<Tz> {
        now.with_timezone(&self.tz)
    }

    /// Whether `now` falls inside the daily window, both ends inclusive.
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        let minute = local_minute(&self.local(now));
        minute >= self.window_start && minute <= self.window_end
    }

    /// The cycle `now` belongs to: the latest slot at or before the local
    /// time, or the previous day's last slot before the first slot.
    pub fn cycle_at(&self, now: DateTime<Utc>) -> RefreshCycle {
        let local = self.local(now);
        let minute = local_minute(&local);
        let today = local.date_naive();

        let key = match self.slots.iter().rev().find(|slot| **slot <= minute) {
            Some(slot) => CycleKey::new(today, *slot),
            None => {
                let yesterday = today.pred_opt().unwrap_or(today);
                let last = self.slots[self.slots.len() - 1];
                CycleKey::new(yesterday, last)
            }
        };

        self.cycle_for(key)
    }

    /// The cycle following `key`.
    pub fn next_cycle(&self, key: CycleKey) -> RefreshCycle {
        let next = match self.slots.iter().find(|slot| **slot > key.slot) {
            Some(slot) => CycleKey::new(key.date, *slot),
            None => CycleKey::new(key.date.succ_opt().unwrap_or(key.date), self.slots[0]),
        };
        self.cycle_for(next)
    }

    pub fn cycle_for(&self, key: CycleKey) -> RefreshCycle {
        RefreshCycle {
            key,
            scheduled_at: self.to_utc(key.date, key.slot),
            window_label: key.slot.format("%H:%M").to_string(),
        }
    }

    /// "2026-02-13 06:01 Europe/Madrid".
    pub fn local_label(&self, now: DateTime<Utc>) -> String {
        format!("{} {}", self.local(now).format("%Y-%m-%d %H:%M"), self.tz.name())
    }

    fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = NaiveDateTime::new(date, time);
        // Slots inside a DST gap resolve to the first valid instant after it.
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| self.tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    }
}

fn local_minute(local: &DateTime<Tz>) -> NaiveTime {
    let time = local.time();
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

fn parse_hhmm(field: &str, raw: &str) -> Result<NaiveTime, Error> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| Error::Config(format!("{field}: '{raw}' is not a HH:MM time")))
}
