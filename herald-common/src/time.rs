//! Time-of-day utilities
//!
//! Slots and scheduler triggers work at minute resolution on the local wall
//! clock. Comparisons use the packed `hour * 100 + minute` form ("HM").

use crate::{Error, Result};
use chrono::{Local, NaiveTime, Timelike};
use std::fmt;
use std::str::FromStr;

/// Local wall-clock time of day, minute resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Latest representable time of day (23:59)
    pub const LAST: TimeOfDay = TimeOfDay { hour: 23, minute: 59 };

    /// Build a time of day, range-checking hour (0-23) and minute (0-59)
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 {
            return Err(Error::Validation(format!(
                "hour {} must be between 0 and 23",
                hour
            )));
        }
        if minute > 59 {
            return Err(Error::Validation(format!(
                "minute {} must be between 0 and 59",
                minute
            )));
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    /// Current local time of day
    pub fn now() -> Self {
        Self::from_naive(Local::now().time())
    }

    /// Truncate a chrono time to minute resolution
    pub fn from_naive(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Packed `hour * 100 + minute` value
    pub fn hm(&self) -> u16 {
        self.hour as u16 * 100 + self.minute as u16
    }

    /// Same time of day as a chrono value (seconds = 0)
    pub fn to_naive(&self) -> NaiveTime {
        // Range is checked on construction
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for TimeOfDay {
    type Err = Error;

    /// Parse `"HH:MM"`; leading zeros are optional
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 {
            return Err(Error::Validation(format!(
                "time [{}] must be separated by ':'",
                s
            )));
        }

        let hour: i64 = parts[0].parse().map_err(|_| {
            Error::Validation(format!("time [{}]: hour part is not an integer", s))
        })?;
        let minute: i64 = parts[1].parse().map_err(|_| {
            Error::Validation(format!("time [{}]: minute part is not an integer", s))
        })?;

        if !(0..=23).contains(&hour) {
            return Err(Error::Validation(format!(
                "time [{}]: hour must be between 0 and 23",
                s
            )));
        }
        if !(0..=59).contains(&minute) {
            return Err(Error::Validation(format!(
                "time [{}]: minute must be between 0 and 59",
                s
            )));
        }

        Self::new(hour as u32, minute as u32)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}
