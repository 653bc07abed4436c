//! Publication scheduling
//!
//! 時刻はすべてサイトのローカル時刻（WordPress の `date` フィールド）として扱う。

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::wordpress::PostStatus;

/// `count` publication slots spaced `interval_hours` apart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePlan {
    start: NaiveDateTime,
    interval_hours: u32,
    count: usize,
}

impl SchedulePlan {
    pub fn new(start: NaiveDateTime, interval_hours: u32, count: usize) -> Result<Self> {
        if interval_hours == 0 {
            return Err(Error::InvalidInput(
                "interval must be at least 1 hour".to_string(),
            ));
        }
        if count == 0 {
            return Err(Error::InvalidInput(
                "a schedule needs at least one slot".to_string(),
            ));
        }
        let plan = Self {
            start,
            interval_hours,
            count,
        };
        // 最終スロットが表現できれば途中のスロットも収まる
        if plan.slot(count - 1).is_none() {
            return Err(Error::InvalidInput(format!(
                "{count} slots every {interval_hours} hours do not fit in the calendar"
            )));
        }
        Ok(plan)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `start + i * interval`, `None` on overflow
    fn slot(&self, i: usize) -> Option<NaiveDateTime> {
        let step = Duration::try_hours(i64::from(self.interval_hours))?;
        let offset = step.checked_mul(i32::try_from(i).ok()?)?;
        self.start.checked_add_signed(offset)
    }

    /// `start + i * interval` for every slot
    pub fn slots(&self) -> Vec<NaiveDateTime> {
        (0..self.count).filter_map(|i| self.slot(i)).collect()
    }
}

/// Next `hour:00` strictly after `now`
pub fn next_publish_slot(now: NaiveDateTime, hour: u32) -> Result<NaiveDateTime> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0)
        .ok_or_else(|| Error::InvalidInput(format!("invalid publish hour {hour}")))?;
    let today = now.date().and_time(time);
    Ok(if today > now {
        today
    } else {
        today + Duration::days(1)
    })
}

/// `future` when `publish_at` is after `now`, otherwise publish immediately
pub fn status_for(publish_at: NaiveDateTime, now: NaiveDateTime) -> PostStatus {
    if publish_at > now {
        PostStatus::Future
    } else {
        PostStatus::Publish
    }
}
