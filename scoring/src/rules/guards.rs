use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Utc};

use crate::{
    error::RuleFault,
    model::{FraudRule, RuleSchedule},
    rate_limit::SlidingWindowCounter,
};

/// Whether `at` falls inside the schedule.
pub fn schedule_allows(schedule: &RuleSchedule, at: DateTime<Utc>) -> Result<bool, RuleFault> {
    let offset = parse_timezone(&schedule.timezone)?;
    let local = at.with_timezone(&offset);

    if !schedule.days_of_week.is_empty()
        && !schedule
            .days_of_week
            .contains(&local.weekday().num_days_from_sunday())
    {
        return Ok(false);
    }

    let start = schedule.start_time.as_deref().map(parse_time).transpose()?;
    let end = schedule.end_time.as_deref().map(parse_time).transpose()?;
    let time = local.time();

    Ok(match (start, end) {
        (None, None) => true,
        (Some(start), None) => time >= start,
        (None, Some(end)) => time < end,
        (Some(start), Some(end)) if start <= end => time >= start && time < end,
        // wraps midnight, e.g. 22:00-06:00
        (Some(start), Some(end)) => time >= start || time < end,
    })
}

fn parse_time(value: &str) -> Result<NaiveTime, RuleFault> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| RuleFault::InvalidSchedule(format!("time '{}': {}", value, e)))
}

fn parse_timezone(value: &str) -> Result<FixedOffset, RuleFault> {
    let value = value.trim();
    let invalid = || RuleFault::InvalidSchedule(format!("timezone '{}'", value));
    if value.is_empty() || value.eq_ignore_ascii_case("utc") || value.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match value.as_bytes()[0] {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Per-rule trigger budget.
///
/// Slots are reserved while a rule fires and handed back with
/// [`release`](Self::release) when the analysis is not stored. Rules
/// without a rate limit are never tracked.
#[derive(Debug)]
pub struct RuleRateLimiter {
    counter: SlidingWindowCounter,
    default_window: Duration,
}

impl RuleRateLimiter {
    pub fn new(default_window: Duration) -> Self {
        Self {
            counter: SlidingWindowCounter::new(),
            default_window,
        }
    }

    fn window(&self, rule: &FraudRule) -> Duration {
        rule.rate_limit
            .as_ref()
            .and_then(|limit| limit.window_secs)
            .map(|secs| Duration::seconds(secs as i64))
            .unwrap_or(self.default_window)
    }

    pub fn is_limited(&self, rule: &FraudRule, now: DateTime<Utc>) -> bool {
        match &rule.rate_limit {
            Some(limit) => self
                .counter
                .is_exhausted(&rule.id, limit.max_triggers, self.window(rule), now),
            None => false,
        }
    }

    /// Claims one trigger slot for `rule`. Always succeeds for unlimited rules.
    pub fn try_reserve(&self, rule: &FraudRule, now: DateTime<Utc>) -> bool {
        match &rule.rate_limit {
            Some(limit) => self
                .counter
                .try_acquire(&rule.id, limit.max_triggers, self.window(rule), now),
            None => true,
        }
    }

    pub fn release(&self, rule_id: &str, at: DateTime<Utc>) {
        self.counter.release(rule_id, at);
    }

    /// Counts a past trigger against a rate-limited rule.
    pub fn record(&self, rule: &FraudRule, at: DateTime<Utc>) {
        if rule.rate_limit.is_some() {
            self.counter.record(&rule.id, self.window(rule), at);
        }
    }

    pub fn recent_triggers(&self, rule: &FraudRule, now: DateTime<Utc>) -> usize {
        self.counter.count(&rule.id, self.window(rule), now)
    }

    pub fn tracked_rules(&self) -> usize {
        self.counter.tracked_keys()
    }
}

impl Default for RuleRateLimiter {
    fn default() -> Self {
        Self::new(Duration::hours(1))
    }
}
