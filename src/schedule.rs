//! Translation of standard cron syntax into the dialect understood by the
//! `cron` crate.
//!
//! The `cron` crate expects a leading seconds field and numbers weekdays
//! `1..=7` starting at Sunday, while classic crontab uses five fields and
//! `0..=7` with both `0` and `7` meaning Sunday. Everything here is UTC.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

use crate::error::ScheduleError;

/// A parsed, ready-to-evaluate cron expression.
#[derive(Debug, Clone)]
pub struct CronSpec {
  source: String,
  schedule: CronSchedule,
}

impl CronSpec {
  /// Parses a five-, six- or seven-field expression or an `@descriptor`.
  pub fn parse(spec: &str) -> Result<Self, ScheduleError> {
    let normalized = normalize(spec)?;
    let schedule = CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidSpec {
      spec: spec.to_string(),
      reason: e.to_string(),
    })?;
    Ok(Self {
      source: spec.to_string(),
      schedule,
    })
  }

  /// The expression as supplied by the caller.
  pub fn source(&self) -> &str {
    &self.source
  }

  /// First fire time strictly after `reference_time`.
  pub fn next_after(&self, reference_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    self.schedule.after(&reference_time).next()
  }
}

/// Rewrites `spec` into the `cron` crate's seconds-first dialect.
fn normalize(spec: &str) -> Result<String, ScheduleError> {
  let trimmed = spec.trim();
  if trimmed.starts_with('@') {
    return Ok(trimmed.to_string());
  }

  let fields: Vec<&str> = trimmed.split_whitespace().collect();
  // Index of the day-of-week field once a seconds field is present.
  const DOW: usize = 5;
  let mut fields: Vec<String> = match fields.len() {
    5 => std::iter::once("0")
      .chain(fields.iter().copied())
      .map(str::to_string)
      .collect(),
    6 | 7 => fields.iter().map(|f| f.to_string()).collect(),
    n => {
      return Err(ScheduleError::InvalidSpec {
        spec: spec.to_string(),
        reason: format!("expected 5, 6 or 7 fields, found {}", n),
      })
    }
  };
  fields[DOW] = translate_day_of_week(&fields[DOW]);
  Ok(fields.join(" "))
}

/// Maps crontab weekday numbers (`0`/`7` = Sunday) onto `1..=7` (Sunday = 1).
/// Names (`MON-FRI`), `*`, `?` and `*/n` are left untouched. Numeric items
/// with a step are expanded to an explicit day list, since a shifted range
/// that wraps past Sunday can no longer carry the step.
fn translate_day_of_week(field: &str) -> String {
  field
    .split(',')
    .map(translate_weekday_item)
    .collect::<Vec<_>>()
    .join(",")
}

fn translate_weekday_item(item: &str) -> String {
  let (range, step) = match item.split_once('/') {
    Some((range, step)) => (range, Some(step)),
    None => (item, None),
  };
  let (start, end, is_range) = match range.split_once('-') {
    Some((start, end)) => match (start.parse::<u32>(), end.parse::<u32>()) {
      (Ok(start), Ok(end)) if start <= end && end <= 7 => (start, end, true),
      _ => return item.to_string(),
    },
    None => match range.parse::<u32>() {
      Ok(day) if day <= 7 => (day, day, false),
      _ => return item.to_string(),
    },
  };

  match step.map(str::parse::<usize>) {
    Some(Ok(step)) if step > 0 => {
      // `n/s` runs from n to the end of the crontab week.
      let end = if is_range { end } else { end.max(6) };
      let mut days: Vec<u32> = Vec::new();
      for day in (start..=end).step_by(step) {
        let day = shift_weekday(day);
        if !days.contains(&day) {
          days.push(day);
        }
      }
      days
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
    }
    Some(_) => item.to_string(),
    None if !is_range => shift_weekday(start).to_string(),
    None if end == 7 => {
      // `n-7` runs through Sunday, which wraps to the front in the new numbering.
      let start = shift_weekday(start);
      if start == 1 {
        "1-7".to_string()
      } else {
        format!("{}-7,1", start)
      }
    }
    None => format!("{}-{}", shift_weekday(start), shift_weekday(end)),
  }
}

fn shift_weekday(day: u32) -> u32 {
  (day % 7) + 1
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Datelike, TimeZone, Timelike, Weekday};

  #[test]
  fn five_fields_gain_a_seconds_field() {
    assert_eq!(normalize("* * * * *").unwrap(), "0 * * * * *");
    assert_eq!(normalize("*/5 2 * * *").unwrap(), "0 */5 2 * * *");
  }

  #[test]
  fn six_and_seven_fields_pass_through() {
    assert_eq!(normalize("*/10 * * * * *").unwrap(), "*/10 * * * * *");
    assert_eq!(normalize("0 0 12 * * * 2030").unwrap(), "0 0 12 * * * 2030");
    assert_eq!(normalize("@hourly").unwrap(), "@hourly");
  }

  #[test]
  fn wrong_field_count_is_rejected() {
    assert!(matches!(
      normalize("* * *"),
      Err(ScheduleError::InvalidSpec { .. })
    ));
    assert!(normalize("").is_err());
  }

  #[test]
  fn weekday_numbers_are_shifted() {
    assert_eq!(translate_day_of_week("*"), "*");
    assert_eq!(translate_day_of_week("0"), "1");
    assert_eq!(translate_day_of_week("7"), "1");
    assert_eq!(translate_day_of_week("1-5"), "2-6");
    assert_eq!(translate_day_of_week("0,6"), "1,7");
    assert_eq!(translate_day_of_week("5-7"), "6-7,1");
    assert_eq!(translate_day_of_week("0-7"), "1-7");
    assert_eq!(translate_day_of_week("1-5/2"), "2,4,6");
    assert_eq!(translate_day_of_week("1-7/2"), "2,4,6,1");
    assert_eq!(translate_day_of_week("5-7/2"), "6,1");
    assert_eq!(translate_day_of_week("0-7/3"), "1,4,7");
    assert_eq!(translate_day_of_week("1/3"), "2,5");
    assert_eq!(translate_day_of_week("*/2"), "*/2");
    assert_eq!(translate_day_of_week("MON-FRI"), "MON-FRI");
  }

  #[test]
  fn monday_in_crontab_fires_on_monday() {
    let spec = CronSpec::parse("30 9 * * 1").unwrap();
    // 2024-01-06 is a Saturday.
    let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
    let next = spec.next_after(saturday).unwrap();
    assert_eq!(next.weekday(), Weekday::Mon);
    assert_eq!((next.hour(), next.minute(), next.second()), (9, 30, 0));
  }

  #[test]
  fn stepped_range_through_sunday_fires_on_crontab_days() {
    let spec = CronSpec::parse("0 0 * * 1-7/2").unwrap();
    let mut at = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
    let mut fired = Vec::new();
    for _ in 0..8 {
      at = spec.next_after(at).unwrap();
      fired.push(at.weekday());
    }
    // Saturday 2024-01-06 onwards: Sun, Mon, Wed, Fri, then the same again.
    use Weekday::*;
    assert_eq!(fired, vec![Sun, Mon, Wed, Fri, Sun, Mon, Wed, Fri]);

    let spec = CronSpec::parse("0 0 * * 5-7/2").unwrap();
    let first = spec.next_after(Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap()).unwrap();
    let second = spec.next_after(first).unwrap();
    let third = spec.next_after(second).unwrap();
    assert_eq!(
      [first.weekday(), second.weekday(), third.weekday()],
      [Sun, Fri, Sun]
    );
  }

  #[test]
  fn every_minute_fires_within_a_minute() {
    let spec = CronSpec::parse("* * * * *").unwrap();
    let now = Utc::now();
    let next = spec.next_after(now).unwrap();
    assert!(next > now);
    assert!(next - now <= chrono::Duration::seconds(60));
    assert_eq!(next.second(), 0);
  }

  #[test]
  fn garbage_is_an_invalid_spec() {
    let err = CronSpec::parse("61 * * * *").unwrap_err();
    assert!(matches!(err, ScheduleError::InvalidSpec { ref spec, .. } if spec == "61 * * * *"));
    assert!(CronSpec::parse("not a cron spec at all").is_err());
  }
}
