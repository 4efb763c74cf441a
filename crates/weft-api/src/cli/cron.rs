//! CLI cron subcommands: preview occurrences and check whether an instant
//! matches an expression.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use weft_core::cron::CronSchedule;

use super::Output;

/// Cron subcommands.
#[derive(Subcommand)]
pub enum CronCommand {
    /// Show the next occurrences of an expression.
    Next {
        /// Cron expression, preset (`@daily`) or schedule (`every 5 minutes`).
        expression: String,

        /// IANA timezone the expression is evaluated in.
        #[arg(long, default_value = "UTC")]
        tz: String,

        /// Number of occurrences to show.
        #[arg(long, default_value = "5")]
        count: usize,

        /// Start searching after this RFC 3339 instant (default: now).
        #[arg(long)]
        from: Option<String>,
    },

    /// Check whether an instant matches an expression.
    Check {
        expression: String,

        #[arg(long, default_value = "UTC")]
        tz: String,

        /// RFC 3339 instant to test (default: now).
        #[arg(long)]
        at: Option<String>,
    },
}

/// Handle a cron subcommand. Needs no stores.
pub fn handle_cron_command(cmd: CronCommand, out: Output) -> Result<()> {
    match cmd {
        CronCommand::Next {
            expression,
            tz,
            count,
            from,
        } => handle_next(&expression, &tz, count, from.as_deref(), out),
        CronCommand::Check { expression, tz, at } => {
            handle_check(&expression, &tz, at.as_deref(), out)
        }
    }
}

fn parse_instant(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("Invalid RFC 3339 timestamp '{raw}'")),
        None => Ok(Utc::now()),
    }
}

fn local_time(schedule: &CronSchedule, at: DateTime<Utc>) -> String {
    at.with_timezone(&schedule.timezone())
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string()
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

fn handle_next(
    expression: &str,
    tz: &str,
    count: usize,
    from: Option<&str>,
    out: Output,
) -> Result<()> {
    let schedule = CronSchedule::new(expression, tz)?;
    let from = parse_instant(from)?;
    let upcoming = schedule.upcoming(from, count);

    if out.json {
        let occurrences: Vec<_> = upcoming
            .iter()
            .map(|at| {
                serde_json::json!({
                    "utc": at.to_rfc3339(),
                    "local": local_time(&schedule, *at),
                })
            })
            .collect();
        let result = serde_json::json!({
            "expression": expression,
            "normalized": schedule.expression().normalized(),
            "timezone": tz,
            "from": from.to_rfc3339(),
            "occurrences": occurrences,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if out.quiet {
        for at in &upcoming {
            println!("{}", at.to_rfc3339());
        }
        return Ok(());
    }

    println!();
    println!(
        "  {} {} ({})",
        style("Schedule").bold(),
        style(expression).cyan(),
        style(schedule.expression().normalized()).dim()
    );

    if upcoming.is_empty() {
        println!("  No occurrence within the search window.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("UTC"),
            Cell::new(format!("Local ({tz})")),
        ]);
    for (i, at) in upcoming.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(local_time(&schedule, *at)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

fn handle_check(expression: &str, tz: &str, at: Option<&str>, out: Output) -> Result<()> {
    let schedule = CronSchedule::new(expression, tz)?;
    let at = parse_instant(at)?;
    let matches = schedule.matches(at);
    let previous = schedule.prev_at_or_before(at);
    let next = schedule.next_after(at);

    if out.json {
        let result = serde_json::json!({
            "expression": expression,
            "timezone": tz,
            "at": at.to_rfc3339(),
            "matches": matches,
            "previous": previous.map(|t| t.to_rfc3339()),
            "next": next.map(|t| t.to_rfc3339()),
            "millis_until_next": schedule.millis_until_next(at),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if out.quiet {
        println!("{matches}");
        return Ok(());
    }

    let mark = if matches {
        style("✓").green()
    } else {
        style("✗").red()
    };
    let show = |t: Option<DateTime<Utc>>| {
        t.map(|t| local_time(&schedule, t))
            .unwrap_or_else(|| "none".to_string())
    };

    println!();
    println!("  {mark} {} at {}", style(expression).cyan(), local_time(&schedule, at));
    println!("  Previous: {}", show(previous));
    println!("  Next:     {}", show(next));
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_instant_accepts_offsets() {
        let at = parse_instant(Some("2026-03-01T09:30:00+01:00")).unwrap();
        assert_eq!(at.to_rfc3339(), "2026-03-01T08:30:00+00:00");
        assert!(parse_instant(Some("yesterday")).is_err());
    }

    #[test]
    fn local_time_uses_schedule_timezone() {
        let schedule = CronSchedule::new("0 9 * * *", "Asia/Tokyo").unwrap();
        let at = parse_instant(Some("2026-03-01T00:00:00Z")).unwrap();
        assert_eq!(local_time(&schedule, at), "2026-03-01 09:00:00 JST");
    }

    #[test]
    fn invalid_expression_is_an_error() {
        let out = Output {
            json: true,
            quiet: false,
        };
        assert!(handle_next("61 * * * *", "UTC", 3, None, out).is_err());
        assert!(handle_check("* * * * *", "Nowhere/City", None, out).is_err());
    }
}
