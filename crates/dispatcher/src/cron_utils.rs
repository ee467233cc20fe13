use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use harvester_core::{SchedulerError, SchedulerResult};

const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// 解析CRON表达式
///
/// 标准的五段式表达式 (`分 时 日 月 周`) 会补上秒字段 `0`, 星期字段按标准CRON
/// 解释 (0-7, 0和7都是周日) 并转换成 `cron` crate 的编号 (1-7, 1是周日).
/// 六段和七段表达式原样交给 `cron` crate.
pub fn parse_cron(expr: &str) -> SchedulerResult<Schedule> {
    let invalid = |message: String| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        message,
    };

    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = if let [minute, hour, day, month, dow] = fields[..] {
        let dow =
            standard_day_of_week(dow).ok_or_else(|| invalid(format!("星期字段无效: {dow}")))?;
        format!("0 {minute} {hour} {day} {month} {dow}")
    } else {
        fields.join(" ")
    };
    Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
}

/// 把标准星期字段展开成 `cron` crate 的星期编号列表
fn standard_day_of_week(field: &str) -> Option<String> {
    if field == "*" || field == "?" {
        return Some(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step.parse::<usize>().ok().filter(|s| *s > 0)?)),
            None => (item, None),
        };
        let (start, end) = match base.split_once('-') {
            _ if base == "*" || base == "?" => (0, 6),
            Some((from, to)) => (weekday(from)?, weekday(to)?),
            None => {
                let day = weekday(base)?;
                // `n/step` 表示从n到周六
                (day, if step.is_some() { day.max(6) } else { day })
            }
        };
        if start > end {
            return None;
        }
        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days.insert(day % 7 + 1);
        }
    }

    let days: Vec<String> = days.iter().map(ToString::to_string).collect();
    Some(days.join(","))
}

fn weekday(token: &str) -> Option<usize> {
    if let Ok(n) = token.parse::<usize>() {
        return (n <= 7).then_some(n);
    }
    WEEKDAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
}

/// 获取下一次执行时间
pub fn next_after(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&from).next()
}
