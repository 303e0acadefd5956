// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of OptiWatt.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use optiwatt_types::series::{SLOTS_PER_DAY, SLOT_MINUTES};

/// The 96-slot, 15-minute daily frame anchored to local midnight
///
/// Slot indices always count wall-clock quarters of the local day, so the
/// day has 96 fixed slots even across DST transitions. Both instants of an
/// ambiguous (repeated) local time map to the same slot, which realizes the
/// "ambiguous maps to the earlier slot" rule; skipped local times never
/// occur as wall-clock readings, and the anchor itself advances to the
/// nearest later existing moment if midnight is skipped.
///
/// Created once per control tick; immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeGrid {
    tz: Tz,
    date: NaiveDate,
    t0: DateTime<Utc>,
}

impl TimeGrid {
    /// Grid for the local day containing `now`
    pub fn for_instant(tz: Tz, now: DateTime<Utc>) -> Self {
        let date = now.with_timezone(&tz).date_naive();
        let t0 = resolve_local_midnight(tz, date);
        Self { tz, date, t0 }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Local-midnight anchor in UTC
    pub fn t0(&self) -> DateTime<Utc> {
        self.t0
    }

    /// Slot index for a timestamp, `None` when it falls on another day
    pub fn slot_of(&self, ts: DateTime<Utc>) -> Option<usize> {
        let local = ts.with_timezone(&self.tz);
        if local.date_naive() != self.date {
            return None;
        }
        Some(self.day_slot(ts))
    }

    /// Time-of-day slot index, ignoring the date
    ///
    /// Used for mapping 24-hour history windows onto today's frame.
    pub fn day_slot(&self, ts: DateTime<Utc>) -> usize {
        let local = ts.with_timezone(&self.tz);
        (local.hour() as usize * 4 + local.minute() as usize / SLOT_MINUTES as usize)
            .min(SLOTS_PER_DAY - 1)
    }

    /// Start of a slot by fixed 15-minute arithmetic from the anchor
    pub fn slot_start(&self, slot: usize) -> DateTime<Utc> {
        self.t0 + Duration::minutes(SLOT_MINUTES * slot as i64)
    }

    /// Center of a slot (start + 7.5 minutes)
    pub fn slot_center(&self, slot: usize) -> DateTime<Utc> {
        self.slot_start(slot) + Duration::seconds(450)
    }

    /// Local wall-clock hour a slot belongs to
    pub fn slot_hour(&self, slot: usize) -> u32 {
        (slot / 4) as u32
    }
}

/// Resolve local midnight of `date` to a UTC instant
///
/// Ambiguous midnights take the earlier offset; skipped midnights advance
/// in 15-minute steps to the first existing local time.
fn resolve_local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let mut naive = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    loop {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earlier, _) => return earlier.with_timezone(&Utc),
            LocalResult::None => {
                naive += Duration::minutes(SLOT_MINUTES);
            }
        }
    }
}
