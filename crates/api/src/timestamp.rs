/// Wotfetch timestamp.
///
/// Internally i64 microseconds from unix epoch.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

const DAY_MICROS: i64 = 24 * 60 * 60 * 1_000_000;

impl Timestamp {
    /// Construct a new timestamp of "now".
    pub fn now() -> Self {
        std::time::SystemTime::now().into()
    }

    /// Construct a timestamp from i64 microseconds since unix epoch.
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Get the i64 microseconds since unix epoch.
    pub fn as_micros(&self) -> i64 {
        self.0
    }

    /// Round down to whole days since unix epoch.
    pub fn round_to_day(&self) -> DayStamp {
        DayStamp(self.0.div_euclid(DAY_MICROS))
    }
}

impl From<std::time::SystemTime> for Timestamp {
    fn from(t: std::time::SystemTime) -> Self {
        Self(
            t.duration_since(std::time::SystemTime::UNIX_EPOCH)
                .expect("invalid system time")
                .as_micros() as i64,
        )
    }
}

/// A timestamp rounded down to whole days since unix epoch.
///
/// Hint dates carry day precision only. The reduced cardinality makes the
/// date a meaningful primary sort key of the hint queue and limits an
/// attacker's ability to win priority ties by timestamp precision.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct DayStamp(i64);

impl DayStamp {
    /// Construct a daystamp from i64 days since unix epoch.
    pub fn from_days(days: i64) -> Self {
        Self(days)
    }

    /// Get the i64 days since unix epoch.
    pub fn as_days(&self) -> i64 {
        self.0
    }
}

impl From<Timestamp> for DayStamp {
    fn from(t: Timestamp) -> Self {
        t.round_to_day()
    }
}
