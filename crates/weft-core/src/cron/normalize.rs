//! Schedule normalization.
//!
//! Every accepted schedule string is rewritten to a 6-field cron expression
//! (seconds first) before field parsing.

use super::CronError;

/// Normalize a preset, human-readable schedule or cron expression to a
/// 6-field cron string.
///
/// Supported inputs (case-insensitive):
/// - 5-field cron          -> "0 " prepended for seconds
/// - 6-field cron          -> returned as-is
/// - "@yearly" / "@annually" / "yearly"   -> "0 0 0 1 1 *"
/// - "@monthly" / "monthly"               -> "0 0 0 1 * *"
/// - "@weekly" / "weekly"                 -> "0 0 0 * * 0"
/// - "@daily" / "@midnight" / "daily" / "every day" -> "0 0 0 * * *"
/// - "@hourly" / "hourly" / "every hour"  -> "0 0 * * * *"
/// - "minutely" / "every minute"          -> "0 * * * * *"
/// - "every N seconds"     -> "*/N * * * * *"
/// - "every N minutes"     -> "0 */N * * * *"
/// - "every N hours"       -> "0 0 */N * * *"
/// - "every day at HH:MM"  -> "0 MM HH * * *"
pub fn normalize_schedule(input: &str) -> Result<String, CronError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CronError::Empty);
    }

    let lower = trimmed.to_lowercase();
    if let Some(preset) = preset(&lower) {
        return Ok(preset.to_string());
    }

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if !lower.starts_with("every ") {
        return match parts.len() {
            5 => Ok(format!("0 {}", parts.join(" "))),
            6 => Ok(parts.join(" ")),
            n if trimmed.starts_with('@') || n == 1 => {
                Err(CronError::UnrecognizedSchedule(trimmed.to_string()))
            }
            n => Err(CronError::FieldCount(n)),
        };
    }

    let rest = &lower["every ".len()..];
    let invalid = || CronError::UnrecognizedSchedule(trimmed.to_string());

    if let Some(at_part) = rest.strip_prefix("day at ") {
        let (hour, minute) = at_part.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
        if hour < 24 && minute < 60 {
            return Ok(format!("0 {minute} {hour} * * *"));
        }
        return Err(invalid());
    }

    let words: Vec<&str> = rest.split_whitespace().collect();
    if words.len() != 2 {
        return Err(invalid());
    }
    let n: u32 = words[0].parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(CronError::InvalidField {
            field: "interval",
            value: words[0].to_string(),
            reason: "interval must be > 0".to_string(),
        });
    }
    match words[1].trim_end_matches('s') {
        "second" => Ok(format!("*/{n} * * * * *")),
        "minute" => Ok(format!("0 */{n} * * * *")),
        "hour" => Ok(format!("0 0 */{n} * * *")),
        _ => Err(invalid()),
    }
}

fn preset(lower: &str) -> Option<&'static str> {
    let name = lower.strip_prefix('@').unwrap_or(lower);
    let expr = match name {
        "yearly" | "annually" => "0 0 0 1 1 *",
        "monthly" => "0 0 0 1 * *",
        "weekly" => "0 0 0 * * 0",
        "daily" | "midnight" | "every day" => "0 0 0 * * *",
        "hourly" | "every hour" => "0 0 * * * *",
        "minutely" | "every minute" => "0 * * * * *",
        _ => return None,
    };
    Some(expr)
}
