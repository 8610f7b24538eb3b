use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use log::warn;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A recurring window during which an alarm may be evaluated.
///
/// `start` is a cron expression (standard five fields, or the six/seven field
/// form with seconds) evaluated in `timezone` (UTC when absent); each
/// occurrence opens a window lasting `duration` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeConstraint {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start: String,
    pub duration: u64,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Longest window a constraint may open, in seconds.
const MAX_DURATION: u64 = 366 * 24 * 3600;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn day_name(day: &str) -> Result<String> {
    match day.parse::<usize>() {
        Ok(n) if n <= 7 => Ok(DAY_NAMES[n % 7].to_string()),
        Ok(n) => bail!("invalid day of week: {n}"),
        // Already a name
        Err(_) => Ok(day.to_string()),
    }
}

/// Rewrites a standard day-of-week field (0-7, Sunday being 0 or 7) with day
/// names, since the cron parser numbers days from 1 (Sunday).
fn translate_day_of_week(field: &str) -> Result<String> {
    let mut parts = Vec::new();

    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (part, None),
        };

        let base = match base.split_once('-') {
            // Ranges ending on Sunday would wrap around
            Some((from, "7")) if from != "0" && from != "7" => {
                format!("{}-SAT,SUN", day_name(from)?)
            }
            Some((from, to)) => format!("{}-{}", day_name(from)?, day_name(to)?),
            None if base == "*" || base == "?" => base.to_string(),
            None => day_name(base)?,
        };

        match step {
            Some(step) => parts.push(format!("{base}/{step}")),
            None => parts.push(base),
        }
    }

    Ok(parts.join(","))
}

fn parse_schedule(expression: &str) -> Result<Schedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();

    let normalized = if fields.len() == 5 {
        format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            translate_day_of_week(fields[4])?
        )
    } else {
        fields.join(" ")
    };

    Schedule::from_str(&normalized).map_err(|e| anyhow!("invalid cron expression '{expression}': {e}"))
}

impl TimeConstraint {
    fn timezone(&self) -> Result<Tz> {
        match self.timezone.as_deref() {
            None | Some("") => Ok(Tz::UTC),
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow!("unknown timezone '{name}': {e}")),
        }
    }

    fn duration(&self) -> Result<TimeDelta> {
        if self.duration == 0 {
            bail!("time constraint '{}' has a zero duration", self.name);
        }
        if self.duration > MAX_DURATION {
            bail!(
                "time constraint '{}' lasts {}s, more than {MAX_DURATION}s",
                self.name,
                self.duration
            );
        }

        i64::try_from(self.duration)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| anyhow!("duration of time constraint '{}' is out of range", self.name))
    }

    pub fn validate(&self) -> Result<()> {
        parse_schedule(&self.start)?;
        self.timezone()?;
        self.duration()?;

        Ok(())
    }
}

/// Whether `now` falls inside one of the windows opened by `constraint`.
pub fn is_active(now: DateTime<Utc>, constraint: &TimeConstraint) -> Result<bool> {
    let schedule = parse_schedule(&constraint.start)?;
    let timezone = constraint.timezone()?;
    let duration = constraint.duration()?;

    let local = now.with_timezone(&timezone).trunc_subsecs(0);

    // The first occurrence at or after `local - duration` decides: the window
    // it opens covers `local` iff it started no later than `local`
    let earliest_start = local
        .checked_sub_signed(duration)
        .and_then(|start| start.checked_sub_signed(TimeDelta::seconds(1)))
        .ok_or_else(|| anyhow!("time constraint '{}' reaches before the earliest date", constraint.name))?;

    Ok(schedule
        .after(&earliest_start)
        .next()
        .is_some_and(|start| start <= local))
}

/// Alarms without constraints are always active. Malformed constraints never
/// match.
pub fn within_time_constraints(now: DateTime<Utc>, constraints: &[TimeConstraint]) -> bool {
    if constraints.is_empty() {
        return true;
    }

    constraints
        .iter()
        .any(|constraint| match is_active(now, constraint) {
            Ok(active) => active,
            Err(e) => {
                warn!("ignoring time constraint '{}': {e}", constraint.name);
                false
            }
        })
}
