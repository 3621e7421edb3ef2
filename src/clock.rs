use chrono::{Datelike, Local, NaiveDateTime, Timelike};

/// First year representable in a FAT date.
const FAT_EPOCH_YEAR: i32 = 1980;
/// Last year representable in a FAT date (7-bit year offset).
const FAT_LAST_YEAR: i32 = FAT_EPOCH_YEAR + 127;

/// Source of the timestamps written into directory entries and the volume serial number.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// The local wall clock.
#[derive(Copy, Clone, Debug, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always reports the same instant.
#[derive(Copy, Clone, Debug)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// A date and time packed the way FAT directory entries store them.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FatTimestamp {
    /// `hour << 11 | minute << 5 | second / 2`
    pub time: u16,
    /// `(year - 1980) << 9 | month << 5 | day`
    pub date: u16,
}

impl FatTimestamp {
    /// Packs the given calendar fields. Years outside `1980..=2107` saturate; a leap second (60)
    /// is clamped to 59 so it fits the 2-second counter.
    pub fn new(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        let year = (year.clamp(FAT_EPOCH_YEAR, FAT_LAST_YEAR) - FAT_EPOCH_YEAR) as u16;
        let second = second.min(59);

        let date = year << 9 | (month as u16 & 0x0F) << 5 | (day as u16 & 0x1F);
        let time = (hour as u16 & 0x1F) << 11 | (minute as u16 & 0x3F) << 5 | (second / 2) as u16;

        Self { time, date }
    }

    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        // chrono reports a leap second as 59 with nanoseconds past one second
        let second = if dt.nanosecond() >= 1_000_000_000 {
            60
        } else {
            dt.second()
        };
        Self::new(
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            second,
        )
    }

    /// Volume serial number derived from this timestamp.
    pub fn serial(&self) -> u32 {
        (self.date as u32) << 16 | self.time as u32
    }
}

#[test]
fn packs_fields() {
    let ts = FatTimestamp::new(2024, 3, 15, 13, 45, 31);
    assert_eq!(ts.date, (44 << 9) | (3 << 5) | 15);
    assert_eq!(ts.time, (13 << 11) | (45 << 5) | 15);
    assert_eq!(ts.serial(), (ts.date as u32) << 16 | ts.time as u32);
}

#[test]
fn leap_second_is_clamped() {
    let ts = FatTimestamp::new(2016, 12, 31, 23, 59, 60);
    assert_eq!(ts.time & 0x1F, 29);

    let leap = chrono::NaiveDate::from_ymd_opt(2016, 12, 31)
        .unwrap()
        .and_hms_milli_opt(23, 59, 59, 1_500)
        .unwrap();
    assert_eq!(FatTimestamp::from_datetime(&leap), ts);
}

#[test]
fn years_saturate() {
    assert_eq!(FatTimestamp::new(1970, 1, 1, 0, 0, 0).date >> 9, 0);
    assert_eq!(FatTimestamp::new(2200, 1, 1, 0, 0, 0).date >> 9, 127);
}

#[test]
fn fixed_clock_is_stable() {
    let dt = chrono::NaiveDate::from_ymd_opt(2025, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 5)
        .unwrap();
    let clock = FixedClock(dt);
    assert_eq!(clock.now(), dt);
    assert_eq!(
        FatTimestamp::from_datetime(&clock.now()),
        FatTimestamp::new(2025, 1, 2, 3, 4, 5)
    );
}
