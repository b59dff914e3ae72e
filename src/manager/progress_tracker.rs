//! Progress extraction from ffmpeg's diagnostic stream.
//!
//! Two kinds of lines matter: `Duration: 00:01:00.00, ...` declares the length
//! of an input, and `... time=00:00:05.00 ...` reports the current position.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::models::progress::ProgressSnapshot;

static DURATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Duration:\s(?P<duration>[0-9:.]+)(,|$)").expect("duration pattern is valid")
});

static PROGRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)time=(?P<progress>[0-9:.]+)\s").expect("progress pattern is valid")
});

pub type ProgressCallback = Box<dyn FnMut(ProgressSnapshot) + Send>;

/// Parses `[hours:]minutes:seconds[.fraction]`.
pub fn parse_timestamp(text: &str) -> Option<Duration> {
    let parts: Vec<&str> = text.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [minutes, seconds] => (None, *minutes, *seconds),
        [hours, minutes, seconds] => (Some(*hours), *minutes, *seconds),
        _ => return None,
    };

    let hours: u64 = match hours {
        Some(hours) => hours.parse().ok()?,
        None => 0,
    };
    let minutes: u64 = minutes.parse().ok()?;
    let (whole, fraction) = match seconds.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (seconds, None),
    };
    let whole: u64 = whole.parse().ok()?;
    if minutes >= 60 || whole >= 60 {
        return None;
    }

    let nanos = match fraction {
        Some(fraction) => {
            if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let digits: String = fraction.chars().take(9).collect();
            let scale = 10u32.pow(9 - digits.len() as u32);
            digits.parse::<u32>().ok()? * scale
        }
        None => 0,
    };

    let secs = hours
        .checked_mul(3600)?
        .checked_add(minutes * 60)?
        .checked_add(whole)?;
    Some(Duration::new(secs, nanos))
}

fn correct_duration(
    declared: Duration,
    seek: Option<Duration>,
    max_duration: Option<Duration>,
) -> Duration {
    if declared.is_zero() {
        return declared;
    }
    let mut total = match seek {
        Some(seek) => declared.saturating_sub(seek),
        None => declared,
    };
    if let Some(max_duration) = max_duration {
        total = total.min(max_duration);
    }
    total
}

/// Turns diagnostic lines into [`ProgressSnapshot`]s.
///
/// Without a callback the tracker is disabled and `parse_line` returns
/// before running any pattern.
pub struct ProgressTracker {
    callback: Option<ProgressCallback>,
    seek: Option<Duration>,
    max_duration: Option<Duration>,
    declared: Duration,
    total: Option<Duration>,
    last: Option<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            seek: None,
            max_duration: None,
            declared: Duration::ZERO,
            total: None,
            last: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn with_seek(mut self, seek: Option<Duration>) -> Self {
        self.seek = seek;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    pub fn last_snapshot(&self) -> Option<ProgressSnapshot> {
        self.last
    }

    pub fn reset(&mut self) {
        self.declared = Duration::ZERO;
        self.total = None;
        self.last = None;
    }

    pub fn parse_line(&mut self, line: &str) {
        if !self.is_enabled() {
            return;
        }

        if let Some(declared) = DURATION_REGEX
            .captures(line)
            .and_then(|caps| parse_timestamp(&caps["duration"]))
        {
            // Each input announces its own duration.
            self.declared = self.declared.saturating_add(declared);
        }

        let Some(position) = PROGRESS_REGEX
            .captures(line)
            .and_then(|caps| parse_timestamp(&caps["progress"]))
        else {
            return;
        };

        // The total is settled by the first position line.
        let total = *self
            .total
            .get_or_insert_with(|| correct_duration(self.declared, self.seek, self.max_duration));
        let processed = match self.last {
            Some(last) => position.max(last.processed),
            None => position,
        };
        let total = if total.is_zero() { processed } else { total };
        self.emit(ProgressSnapshot::new(processed, total));
    }

    /// Reports 100% once the process finished, unless the last snapshot already did.
    pub fn complete(&mut self) {
        if let Some(last) = self.last {
            if last.processed < last.total {
                self.emit(ProgressSnapshot::new(last.total, last.total));
            }
        }
    }

    fn emit(&mut self, snapshot: ProgressSnapshot) {
        self.last = Some(snapshot);
        if let Some(callback) = self.callback.as_mut() {
            callback(snapshot);
        }
    }
}
