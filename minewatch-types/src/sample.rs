//! Samples - one probe outcome at one point in time.

/// The outcome of probing a single target.
///
/// A successful probe carries the number of players online. A failed probe
/// (timeout, refused connection, malformed response) carries an error marker
/// so that the slot still exists in the series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Reading {
    /// Players online as reported by the target.
    Value(u64),
    /// The probe failed; the string describes why.
    Error(String),
}

impl Reading {
    /// The player count, if the probe succeeded.
    pub fn value(&self) -> Option<u64> {
        match self {
            Reading::Value(v) => Some(*v),
            Reading::Error(_) => None,
        }
    }

    /// The error marker, if the probe failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Reading::Value(_) => None,
            Reading::Error(e) => Some(e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reading::Error(_))
    }
}

/// A time-stamped probe outcome. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// Unix timestamp in milliseconds of the cycle that produced this sample.
    #[cfg_attr(feature = "serde", serde(rename = "timestamp"))]
    pub timestamp_ms: u64,

    /// Value or error marker.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub reading: Reading,
}

impl Sample {
    pub fn new(timestamp_ms: u64, reading: Reading) -> Self {
        Self {
            timestamp_ms,
            reading,
        }
    }

    /// A successful sample.
    pub fn value(timestamp_ms: u64, players: u64) -> Self {
        Self::new(timestamp_ms, Reading::Value(players))
    }

    /// A failed sample with an error marker.
    pub fn error(timestamp_ms: u64, message: impl Into<String>) -> Self {
        Self::new(timestamp_ms, Reading::Error(message.into()))
    }
}

/// One entry of the aggregate series.
///
/// `value` is `None` when no target answered during the cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AggregatePoint {
    #[cfg_attr(feature = "serde", serde(rename = "timestamp"))]
    pub timestamp_ms: u64,
    pub value: Option<f64>,
}

impl AggregatePoint {
    pub fn new(timestamp_ms: u64, value: Option<f64>) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// What storage remembers about a target across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetRecord {
    /// Most recent persisted sample, error markers included.
    pub latest: Option<Sample>,
    /// Highest player count ever persisted for the target.
    pub peak: Option<Sample>,
}
