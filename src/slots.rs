//! Appointment slot calculation.
//!
//! Slots are half-hour "HH:MM" strings. The shop opens at 08:30, closes at
//! 19:00 on weekdays and 17:00 on Saturdays, and is closed on Sundays.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use thiserror::Error;

pub const OPENING_HOUR: u32 = 8;
pub const WEEKDAY_CLOSING_HOUR: u32 = 19;
pub const SATURDAY_CLOSING_HOUR: u32 = 17;

pub const CLOSED_NOTICE: &str = "We are closed on Sundays.";
pub const LOAD_FAILED_NOTICE: &str = "Could not load available times.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("invalid date: {0:?}")]
    InvalidDate(String),
}

impl SlotError {
    /// Text shown to the visitor; the detail only goes to the log.
    pub fn notice(&self) -> &'static str {
        LOAD_FAILED_NOTICE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub date: NaiveDate,
    pub slots: Vec<String>,
    pub notice: Option<&'static str>,
}

impl Availability {
    pub fn is_closed(&self) -> bool {
        self.notice == Some(CLOSED_NOTICE)
    }
}

pub fn parse_date(input: &str) -> Result<NaiveDate, SlotError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| SlotError::InvalidDate(input.to_string()))
}

/// Last hour mark offered on `weekday`, `None` when the shop is closed.
pub fn closing_hour(weekday: Weekday) -> Option<u32> {
    match weekday {
        Weekday::Sun => None,
        Weekday::Sat => Some(SATURDAY_CLOSING_HOUR),
        _ => Some(WEEKDAY_CLOSING_HOUR),
    }
}

pub fn format_slot(hour: u32, minute: u32) -> String {
    format!("{hour:02}:{minute:02}")
}

pub fn available_slots(date: NaiveDate, booked: &HashSet<String>) -> Availability {
    let Some(closing) = closing_hour(date.weekday()) else {
        return Availability {
            date,
            slots: Vec::new(),
            notice: Some(CLOSED_NOTICE),
        };
    };

    let mut slots = Vec::new();
    for hour in OPENING_HOUR..=closing {
        for minute in [0, 30] {
            if hour == OPENING_HOUR && minute == 0 {
                continue;
            }
            if hour == closing && minute == 30 {
                continue;
            }
            let slot = format_slot(hour, minute);
            if !booked.contains(&slot) {
                slots.push(slot);
            }
        }
    }

    // The loop already includes the closing mark; the push keeps it offered
    // if the bound ever changes. Dedup below absorbs the repeat.
    let closing_slot = format_slot(closing, 0);
    if !booked.contains(&closing_slot) {
        slots.push(closing_slot);
    }

    let mut seen = HashSet::new();
    slots.retain(|slot| seen.insert(slot.clone()));
    slots.sort();

    Availability {
        date,
        slots,
        notice: None,
    }
}

/// Whether `time` is a slot the shop offers on `date` at all, ignoring
/// bookings.
pub fn is_offered(date: NaiveDate, time: &str) -> bool {
    available_slots(date, &HashSet::new())
        .slots
        .iter()
        .any(|slot| slot == time.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        parse_date(value).unwrap()
    }

    fn booked(times: &[&str]) -> HashSet<String> {
        times.iter().map(|time| time.to_string()).collect()
    }

    fn expected(first_hour: u32, closing: u32) -> Vec<String> {
        let mut slots = vec![format_slot(first_hour, 30)];
        for hour in first_hour + 1..=closing {
            slots.push(format_slot(hour, 0));
            if hour != closing {
                slots.push(format_slot(hour, 30));
            }
        }
        slots
    }

    #[test]
    fn sunday_is_closed() {
        // 2024-06-02 and 2026-10-18 are Sundays.
        for day in ["2024-06-02", "2026-10-18"] {
            let availability = available_slots(date(day), &HashSet::new());
            assert!(availability.slots.is_empty());
            assert!(availability.is_closed());
            assert_eq!(availability.notice, Some(CLOSED_NOTICE));
        }
    }

    #[test]
    fn saturday_runs_until_five() {
        let availability = available_slots(date("2024-06-01"), &HashSet::new());
        assert_eq!(availability.slots, expected(8, 17));
        assert_eq!(availability.slots.len(), 18);
        assert_eq!(availability.slots.first().map(String::as_str), Some("08:30"));
        assert_eq!(availability.slots.last().map(String::as_str), Some("17:00"));
        assert!(!availability.slots.contains(&"17:30".to_string()));
        assert!(availability.notice.is_none());
    }

    #[test]
    fn weekdays_run_until_seven() {
        // Monday through Friday of the same week.
        for day in ["2024-06-03", "2024-06-04", "2024-06-05", "2024-06-06", "2024-06-07"] {
            let availability = available_slots(date(day), &HashSet::new());
            assert_eq!(availability.slots, expected(8, 19), "day {day}");
            assert_eq!(availability.slots.len(), 22);
            assert!(availability.slots.contains(&"17:30".to_string()));
            assert!(!availability.slots.contains(&"19:30".to_string()));
            assert!(!availability.slots.contains(&"08:00".to_string()));
        }
    }

    #[test]
    fn wednesday_with_one_booking() {
        let availability = available_slots(date("2024-06-05"), &booked(&["10:00"]));
        assert_eq!(availability.slots.len(), 21);
        assert!(!availability.slots.contains(&"10:00".to_string()));
        assert_eq!(availability.slots.first().map(String::as_str), Some("08:30"));
        assert_eq!(availability.slots.last().map(String::as_str), Some("19:00"));
    }

    #[test]
    fn booked_closing_slot_is_not_re_added() {
        let weekday = available_slots(date("2024-06-05"), &booked(&["19:00"]));
        assert!(!weekday.slots.contains(&"19:00".to_string()));
        assert_eq!(weekday.slots.last().map(String::as_str), Some("18:30"));

        let saturday = available_slots(date("2024-06-01"), &booked(&["17:00"]));
        assert!(!saturday.slots.contains(&"17:00".to_string()));
        assert_eq!(saturday.slots.len(), 17);
    }

    #[test]
    fn closing_slot_appears_once() {
        let availability = available_slots(date("2024-06-05"), &HashSet::new());
        let closing = availability
            .slots
            .iter()
            .filter(|slot| slot.as_str() == "19:00")
            .count();
        assert_eq!(closing, 1);
        let mut sorted = availability.slots.clone();
        sorted.sort();
        assert_eq!(sorted, availability.slots);
    }

    #[test]
    fn bookings_outside_opening_hours_change_nothing() {
        let availability = available_slots(date("2024-06-05"), &booked(&["07:00", "21:30", "bogus"]));
        assert_eq!(availability.slots.len(), 22);
    }

    #[test]
    fn malformed_dates_are_rejected() {
        for input in ["", "2024-13-01", "05/06/2024", "tomorrow"] {
            let err = parse_date(input).unwrap_err();
            assert_eq!(err, SlotError::InvalidDate(input.to_string()));
            assert_eq!(err.notice(), LOAD_FAILED_NOTICE);
        }
        assert_eq!(parse_date(" 2024-06-05 ").unwrap(), date("2024-06-05"));
    }

    #[test]
    fn offered_times_follow_the_day() {
        assert!(is_offered(date("2024-06-05"), "18:30"));
        assert!(!is_offered(date("2024-06-01"), "18:30"));
        assert!(!is_offered(date("2024-06-02"), "10:00"));
        assert!(!is_offered(date("2024-06-05"), "08:00"));
    }
}
