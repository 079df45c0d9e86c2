use std::{collections::BTreeSet, ops::RangeInclusive, sync::Mutex};

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc};

/// Decides whether a periodic task fires at a given instant.
///
/// Stateful implementations keep their memo behind interior mutability so a
/// shared predicate can be queried through `&self`.
pub trait Schedule: Send + Sync {
    fn matches(&self, timestamp: DateTime<Utc>) -> bool;
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("{value:?} is not a valid {field} value")]
    InvalidValue { field: &'static str, value: String },
    #[error("step matching is not supported on day-of-week")]
    StepOnDayOfWeek,
    #[error("interval must be a positive duration")]
    InvalidInterval,
}

/// Crontab-style predicate over five fields.
///
/// Each field accepts `*`, a number, a comma list, a range `m-n`, or a step
/// `*/n` (steps are rejected on day-of-week). Day-of-week runs Sunday=0
/// through Saturday=6; 7 is accepted as another spelling of Sunday.
#[derive(Debug, Clone)]
pub struct Crontab {
    minute: BTreeSet<u32>,
    hour: BTreeSet<u32>,
    day: BTreeSet<u32>,
    month: BTreeSet<u32>,
    day_of_week: BTreeSet<u32>,
}

impl Crontab {
    pub fn new(
        minute: &str,
        hour: &str,
        day: &str,
        month: &str,
        day_of_week: &str,
    ) -> Result<Self, ScheduleError> {
        Ok(Self {
            minute: parse_field("minute", minute, 0..=59, false)?,
            hour: parse_field("hour", hour, 0..=23, false)?,
            day: parse_field("day", day, 1..=31, false)?,
            month: parse_field("month", month, 1..=12, false)?,
            day_of_week: parse_field("day-of-week", day_of_week, 0..=7, true)?,
        })
    }
}

impl Schedule for Crontab {
    fn matches(&self, timestamp: DateTime<Utc>) -> bool {
        self.month.contains(&timestamp.month())
            && self.day.contains(&timestamp.day())
            && self
                .day_of_week
                .contains(&timestamp.weekday().num_days_from_sunday())
            && self.hour.contains(&timestamp.hour())
            && self.minute.contains(&timestamp.minute())
    }
}

fn parse_field(
    field: &'static str,
    value: &str,
    domain: RangeInclusive<u32>,
    is_dow: bool,
) -> Result<BTreeSet<u32>, ScheduleError> {
    let invalid = |piece: &str| ScheduleError::InvalidValue {
        field,
        value: piece.to_string(),
    };
    // Day-of-week accepts 7 as input but matches against 0..=6.
    let normalize = |n: u32| if is_dow { n % 7 } else { n };

    let mut accepted = BTreeSet::new();
    for piece in value.split(',') {
        if piece == "*" {
            accepted.extend(domain.clone().map(normalize));
        } else if let Ok(number) = piece.parse::<u32>() {
            if !domain.contains(&number) {
                return Err(invalid(piece));
            }
            accepted.insert(normalize(number));
        } else if let Some(step) = piece.strip_prefix("*/") {
            if is_dow {
                return Err(ScheduleError::StepOnDayOfWeek);
            }
            let step: usize = step.parse().map_err(|_| invalid(piece))?;
            if step == 0 {
                return Err(invalid(piece));
            }
            accepted.extend(domain.clone().step_by(step));
        } else if let Some((lhs, rhs)) = piece.split_once('-') {
            let lhs: u32 = lhs.parse().map_err(|_| invalid(piece))?;
            let rhs: u32 = rhs.parse().map_err(|_| invalid(piece))?;
            if !domain.contains(&lhs) || !domain.contains(&rhs) {
                return Err(invalid(piece));
            }
            let (lhs, rhs) = (normalize(lhs), normalize(rhs));
            if lhs <= rhs {
                accepted.extend(lhs..=rhs);
            }
        } else {
            return Err(invalid(piece));
        }
    }
    Ok(accepted)
}

/// Fires every `interval` within a daily window.
///
/// When `start > end` the window crosses midnight and the in-range test is
/// inverted. The predicate memoizes the next valid instant: on the first
/// in-range call it seeds from the start of the current window, then
/// advances by `interval` past each queried timestamp, returning true
/// exactly when the memo is overtaken.
pub struct EveryBetween {
    interval: TimeDelta,
    start: NaiveTime,
    end: NaiveTime,
    invert: bool,
    next: Mutex<Option<NaiveDateTime>>,
}

impl EveryBetween {
    pub fn new(
        interval: std::time::Duration,
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    ) -> Result<Self, ScheduleError> {
        let interval =
            TimeDelta::from_std(interval).map_err(|_| ScheduleError::InvalidInterval)?;
        if interval <= TimeDelta::zero() {
            return Err(ScheduleError::InvalidInterval);
        }
        let mut start = start.unwrap_or(NaiveTime::MIN);
        let mut end =
            end.unwrap_or_else(|| NaiveTime::from_hms_opt(23, 59, 59).unwrap());
        let invert = start > end;
        if invert {
            std::mem::swap(&mut start, &mut end);
        }
        Ok(Self {
            interval,
            start,
            end,
            invert,
            next: Mutex::new(None),
        })
    }
}

impl Schedule for EveryBetween {
    fn matches(&self, timestamp: DateTime<Utc>) -> bool {
        let ts = timestamp.naive_utc();
        let ts = ts.with_nanosecond(0).unwrap_or(ts);
        let time = ts.time();
        let in_range = if self.invert {
            time < self.start || time >= self.end
        } else {
            self.start <= time && time < self.end
        };
        if !in_range {
            return false;
        }

        let mut memo = self.next.lock().unwrap();
        let next = memo.get_or_insert_with(|| {
            let mut seed = if self.invert {
                let mut seed = ts.date().and_time(self.end);
                if time < self.start {
                    seed -= TimeDelta::days(1);
                }
                seed
            } else {
                ts.date().and_time(self.start)
            };
            while seed < ts {
                seed += self.interval;
            }
            seed
        });

        if *next <= ts {
            while *next <= ts {
                *next += self.interval;
            }
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        // 2024-01-07 was a Sunday.
        Utc.with_ymd_and_hms(2024, 1, 7, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_crontab_star_matches_everything() {
        let cron = Crontab::new("*", "*", "*", "*", "*").unwrap();
        assert!(cron.matches(at(0, 0)));
        assert!(cron.matches(at(23, 59)));
    }

    #[test]
    fn test_crontab_step_minutes() {
        let cron = Crontab::new("*/15", "*", "*", "*", "*").unwrap();
        for hour in 0..24 {
            for minute in [0, 15, 30, 45] {
                assert!(cron.matches(at(hour, minute)), "{hour}:{minute}");
            }
            assert!(!cron.matches(at(hour, 7)));
        }
    }

    #[test]
    fn test_crontab_lists_and_ranges() {
        let cron = Crontab::new("1,5", "9-17", "*", "*", "*").unwrap();
        assert!(cron.matches(at(9, 1)));
        assert!(cron.matches(at(17, 5)));
        assert!(!cron.matches(at(8, 1)));
        assert!(!cron.matches(at(9, 2)));
    }

    #[test]
    fn test_crontab_sunday_is_zero_and_seven() {
        let zero = Crontab::new("*", "*", "*", "*", "0").unwrap();
        let seven = Crontab::new("*", "*", "*", "*", "7").unwrap();
        let sunday = at(12, 0);
        let monday = Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        assert!(zero.matches(sunday));
        assert!(seven.matches(sunday));
        assert!(!zero.matches(monday));
        assert!(!seven.matches(monday));
    }

    #[test]
    fn test_crontab_rejects_bad_input() {
        assert_eq!(
            Crontab::new("61", "*", "*", "*", "*").unwrap_err(),
            ScheduleError::InvalidValue {
                field: "minute",
                value: "61".to_string()
            }
        );
        assert_eq!(
            Crontab::new("*", "*", "*", "*", "*/2").unwrap_err(),
            ScheduleError::StepOnDayOfWeek
        );
        assert!(Crontab::new("*", "*", "0", "*", "*").is_err());
        assert!(Crontab::new("bogus", "*", "*", "*", "*").is_err());
    }

    #[test]
    fn test_every_between_window() {
        let every = EveryBetween::new(
            Duration::from_secs(5 * 60),
            NaiveTime::from_hms_opt(9, 0, 0),
            NaiveTime::from_hms_opt(17, 0, 0),
        )
        .unwrap();

        assert!(!every.matches(at(8, 59)));
        assert!(every.matches(at(9, 0)));
        assert!(!every.matches(at(9, 4)));
        assert!(every.matches(at(9, 5)));
        assert!(!every.matches(at(17, 0)));
    }

    #[test]
    fn test_every_between_inverted_window() {
        let every = EveryBetween::new(
            Duration::from_secs(30 * 60),
            NaiveTime::from_hms_opt(22, 0, 0),
            NaiveTime::from_hms_opt(2, 0, 0),
        )
        .unwrap();

        assert!(!every.matches(at(12, 0)));
        assert!(every.matches(at(22, 0)));
        assert!(!every.matches(at(22, 15)));
        assert!(every.matches(at(22, 30)));
    }

    #[test]
    fn test_every_between_rejects_zero_interval() {
        assert!(matches!(
            EveryBetween::new(Duration::from_secs(0), None, None),
            Err(ScheduleError::InvalidInterval)
        ));
    }
}
