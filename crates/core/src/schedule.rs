//! Dose-schedule pattern decoding.
//!
//! Timing segments name an administration calendar either as free text or with a coded
//! shorthand. The coded forms decode into the gateway's calendar encodings:
//!
//! | Pattern | Meaning | Encoding | Type |
//! |---|---|---|---|
//! | `Q<n>D` | every n days | 35 day cells, quantity in every n-th cell, start offset n | 18 |
//! | `QJ<digits>` | weekly on the listed days | 7-character `X`/`O` mask, Sunday first | 5 |
//! | `QL<n>[,<n>...]` | listed days of the month | 35 day cells addressed by day number | 20 |
//! | `PRN`, `PRN<freq>` | as needed | one tuple at the default time | 1 |
//! | anything else | literal | `HHMM<qty>` tuples | 1 |

use crate::{EngineError, EngineResult};
use chrono::Weekday;

/// Number of day cells in a monthly calendar pattern.
pub const CALENDAR_CELLS: usize = 35;
/// Administration time used when an as-needed order names none.
pub const DEFAULT_PRN_TIME: &str = "0800";
/// Characters per calendar cell (`000.00`).
pub const CELL_WIDTH: usize = 6;
pub const MAX_CELL_QUANTITY: f64 = 999.99;
/// Largest `Q<n>D` interval; the gateway's start offset holds three digits.
pub const MAX_DAY_INTERVAL: usize = 999;

pub const TYPE_DAILY: u8 = 1;
pub const TYPE_WEEKLY: u8 = 5;
pub const TYPE_EVERY_N_DAYS: u8 = 18;
pub const TYPE_DAYS_OF_MONTH: u8 = 20;

/// Decoded administration calendar.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DoseSchedule {
    /// Normalized pattern name; used as the schedule code.
    pub code: String,
    pub schedule_type: u8,
    pub dose_times_qtys: String,
    /// Sunday-first `X`/`O` mask, weekly schedules only.
    pub days_of_week: String,
    pub start_offset: Option<u32>,
    pub prn: bool,
}

/// Everything the decoder needs from one timing entry.
#[derive(Clone, Debug)]
pub struct ScheduleRequest<'a> {
    pub pattern: &'a str,
    pub quantity: Option<f64>,
    pub times: Vec<String>,
    pub first_day_of_week: Weekday,
    /// Accept zero or missing quantities instead of failing.
    pub allow_zero_quantity: bool,
}

/// Decodes one timing entry.
///
/// # Errors
///
/// `EngineError::FieldValidation` for a zero or missing dose quantity (unless relaxed), a
/// day interval of zero or above [`MAX_DAY_INTERVAL`], a calendar quantity wider than a cell, a
/// weekday digit outside 1-7 or a day of month outside the calendar.
pub fn decode(request: &ScheduleRequest<'_>) -> EngineResult<DoseSchedule> {
    let pattern = request.pattern.trim().to_ascii_uppercase();
    let quantity = dose_quantity(&pattern, request.quantity, request.allow_zero_quantity)?;

    // As-needed orders ignore any pattern suffix and explicit times.
    if pattern.starts_with("PRN") {
        return Ok(DoseSchedule {
            code: pattern,
            schedule_type: TYPE_DAILY,
            dose_times_qtys: format!("{DEFAULT_PRN_TIME}{quantity:.2}"),
            prn: true,
            ..DoseSchedule::default()
        });
    }

    if let Some(interval) = every_n_days(&pattern) {
        let interval = interval?;
        check_cell_quantity(&pattern, quantity)?;
        let cells = (0..CALENDAR_CELLS)
            .map(|i| if i % interval == 0 { quantity } else { 0.0 })
            .collect::<Vec<_>>();
        return Ok(DoseSchedule {
            code: pattern,
            schedule_type: TYPE_EVERY_N_DAYS,
            dose_times_qtys: calendar(&cells),
            start_offset: Some(interval as u32),
            ..DoseSchedule::default()
        });
    }

    if let Some(digits) = pattern.strip_prefix("QJ") {
        let mask = weekday_mask(digits, request.first_day_of_week)?;
        return Ok(DoseSchedule {
            code: pattern.clone(),
            schedule_type: TYPE_WEEKLY,
            dose_times_qtys: literal(&request.times, quantity, true),
            days_of_week: mask,
            ..DoseSchedule::default()
        });
    }

    if let Some(days) = pattern.strip_prefix("QL") {
        check_cell_quantity(&pattern, quantity)?;
        let mut cells = vec![0.0; CALENDAR_CELLS];
        for day in days.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let index = day
                .parse::<usize>()
                .ok()
                .filter(|d| (1..=CALENDAR_CELLS).contains(d))
                .ok_or_else(|| {
                    EngineError::FieldValidation(format!(
                        "day of month '{day}' in {pattern} is outside 1-{CALENDAR_CELLS}"
                    ))
                })?;
            cells[index - 1] = quantity;
        }
        return Ok(DoseSchedule {
            code: pattern.clone(),
            schedule_type: TYPE_DAYS_OF_MONTH,
            dose_times_qtys: calendar(&cells),
            ..DoseSchedule::default()
        });
    }

    let code = if pattern.is_empty() {
        request.times.iter().map(|t| normalize_time(t)).collect::<Vec<_>>().join(" ")
    } else {
        pattern
    };
    Ok(DoseSchedule {
        code,
        schedule_type: TYPE_DAILY,
        dose_times_qtys: literal(&request.times, quantity, false),
        ..DoseSchedule::default()
    })
}

fn dose_quantity(pattern: &str, quantity: Option<f64>, allow_zero: bool) -> EngineResult<f64> {
    match quantity {
        Some(q) if q > 0.0 => Ok(q),
        _ if allow_zero => Ok(quantity.unwrap_or(0.0).max(0.0)),
        _ => {
            let message = format!("dose quantity is zero or missing for schedule '{pattern}'");
            tracing::error!("{message}");
            Err(EngineError::FieldValidation(message))
        }
    }
}

/// `Q<n>D` → `Some(Ok(n))`; `Q0D` → `Some(Err(..))`; anything else → `None`.
fn every_n_days(pattern: &str) -> Option<EngineResult<usize>> {
    let digits = pattern.strip_prefix('Q')?.strip_suffix('D')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(match digits.parse::<usize>() {
        Ok(0) | Err(_) => Err(EngineError::FieldValidation(format!(
            "day interval in {pattern} must be at least 1"
        ))),
        Ok(n) if n > MAX_DAY_INTERVAL => Err(EngineError::FieldValidation(format!(
            "day interval in {pattern} exceeds {MAX_DAY_INTERVAL}"
        ))),
        Ok(n) => Ok(n),
    })
}

/// Calendar cells are fixed width, so larger quantities cannot be encoded.
fn check_cell_quantity(pattern: &str, quantity: f64) -> EngineResult<()> {
    if format!("{quantity:.2}").len() > CELL_WIDTH {
        let message = format!(
            "dose quantity {quantity:.2} for schedule '{pattern}' exceeds {MAX_CELL_QUANTITY:.2}"
        );
        tracing::error!("{message}");
        return Err(EngineError::FieldValidation(message));
    }
    Ok(())
}

fn weekday_mask(digits: &str, first_day: Weekday) -> EngineResult<String> {
    let mut mask = ['O'; 7];
    let offset = first_day.num_days_from_sunday() as usize;
    for c in digits.chars().filter(|c| !c.is_whitespace() && *c != ',') {
        let day = c
            .to_digit(10)
            .filter(|d| (1..=7).contains(d))
            .ok_or_else(|| {
                EngineError::FieldValidation(format!(
                    "weekday '{c}' in QJ{digits} is outside 1-7"
                ))
            })? as usize;
        mask[(offset + day - 1) % 7] = 'X';
    }
    Ok(mask.iter().collect())
}

fn calendar(cells: &[f64]) -> String {
    cells
        .iter()
        .map(|q| format!("{q:0width$.2}", width = CELL_WIDTH))
        .collect()
}

fn literal(times: &[String], quantity: f64, default_time: bool) -> String {
    let times: Vec<String> = times
        .iter()
        .map(|t| normalize_time(t))
        .filter(|t| !t.is_empty())
        .collect();
    if times.is_empty() && default_time {
        return format!("{DEFAULT_PRN_TIME}{quantity:.2}");
    }
    times.iter().map(|t| format!("{t}{quantity:.2}")).collect()
}

/// Normalizes `8:00`, `800`, `0800` or `080000` to `HHMM`. Empty when there are no digits.
pub fn normalize_time(time: &str) -> String {
    let digits: String = time.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        0 => String::new(),
        1 | 2 => format!("{digits:0>2}00"),
        3 => format!("0{digits}"),
        _ => digits[..4].to_string(),
    }
}
