pub mod snapshot;

pub use snapshot::Snapshot;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Kind ────────────────────────────────────────────────────────

/// The `type` field of a record. Unknown strings are kept verbatim so a
/// batch carrying one still decodes and is rejected by storage instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricKind {
    Gauge,
    Counter,
    Unknown(String),
}

impl MetricKind {
    pub const GAUGE: &'static str = "gauge";
    pub const COUNTER: &'static str = "counter";

    pub fn as_str(&self) -> &str {
        match self {
            Self::Gauge => Self::GAUGE,
            Self::Counter => Self::COUNTER,
            Self::Unknown(s) => s,
        }
    }
}

impl From<&str> for MetricKind {
    fn from(s: &str) -> Self {
        match s {
            Self::GAUGE => Self::Gauge,
            Self::COUNTER => Self::Counter,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for MetricKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            Self::GAUGE => Self::Gauge,
            Self::COUNTER => Self::Counter,
            _ => Self::Unknown(s),
        }
    }
}

impl From<MetricKind> for String {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Unknown(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Wire record ─────────────────────────────────────────────────

/// One metric as it travels between agent and server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// A value-less record, used to ask the server for the current value.
    pub fn query(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind,
            delta: None,
            value: None,
        }
    }

    /// Check that the kind is known and that exactly its field is set.
    pub fn to_update(&self) -> Result<MetricUpdate<'_>, MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        match (&self.kind, self.value, self.delta) {
            (MetricKind::Gauge, Some(value), None) if !value.is_finite() => {
                Err(MetricError::BadValue(value.to_string()))
            }
            (MetricKind::Gauge, Some(value), None) => Ok(MetricUpdate::Gauge {
                id: &self.id,
                value,
            }),
            (MetricKind::Counter, None, Some(delta)) => Ok(MetricUpdate::Counter {
                id: &self.id,
                delta,
            }),
            (MetricKind::Unknown(kind), _, _) => Err(MetricError::UnknownKind(kind.clone())),
            (kind, _, _) => Err(MetricError::FieldMismatch {
                id: self.id.clone(),
                kind: kind.to_string(),
            }),
        }
    }
}

/// A record that passed validation, borrowing the id from its source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricUpdate<'a> {
    Gauge { id: &'a str, value: f64 },
    Counter { id: &'a str, delta: i64 },
}

impl MetricUpdate<'_> {
    pub fn id(&self) -> &str {
        match self {
            Self::Gauge { id, .. } | Self::Counter { id, .. } => id,
        }
    }
}

/// Parse a path-encoded write (`/update/{kind}/{name}/{value}`).
pub fn parse_path_update(kind: &str, name: &str, raw: &str) -> Result<Metric, MetricError> {
    let metric = match MetricKind::from(kind) {
        MetricKind::Gauge => {
            let value = raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| MetricError::BadValue(raw.to_string()))?;
            Metric::gauge(name, value)
        }
        MetricKind::Counter => {
            let delta = raw
                .parse::<i64>()
                .map_err(|_| MetricError::BadValue(raw.to_string()))?;
            Metric::counter(name, delta)
        }
        MetricKind::Unknown(kind) => return Err(MetricError::UnknownKind(kind)),
    };
    metric.to_update()?;
    Ok(metric)
}

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("metric id must not be empty")]
    EmptyId,

    #[error("unknown metric type '{0}'")]
    UnknownKind(String),

    #[error("metric '{id}' of type {kind} does not carry exactly its own value field")]
    FieldMismatch { id: String, kind: String },

    #[error("cannot parse metric value '{0}'")]
    BadValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_omits_absent_fields() {
        let json = serde_json::to_string(&Metric::counter("hits", 3)).unwrap();
        assert_eq!(json, r#"{"id":"hits","type":"counter","delta":3}"#);

        let json = serde_json::to_string(&Metric::gauge("cpu", 0.5)).unwrap();
        assert_eq!(json, r#"{"id":"cpu","type":"gauge","value":0.5}"#);
    }

    #[test]
    fn unknown_kind_decodes_but_fails_validation() {
        let m: Metric = serde_json::from_str(r#"{"id":"x","type":"histogram","value":1}"#).unwrap();
        assert_eq!(m.kind, MetricKind::Unknown("histogram".into()));
        assert_eq!(
            m.to_update(),
            Err(MetricError::UnknownKind("histogram".into()))
        );
    }

    #[test]
    fn kind_must_match_populated_field() {
        let gauge_with_delta = Metric {
            id: "x".into(),
            kind: MetricKind::Gauge,
            delta: Some(1),
            value: None,
        };
        assert!(matches!(
            gauge_with_delta.to_update(),
            Err(MetricError::FieldMismatch { .. })
        ));

        let counter_with_both = Metric {
            id: "x".into(),
            kind: MetricKind::Counter,
            delta: Some(1),
            value: Some(1.0),
        };
        assert!(counter_with_both.to_update().is_err());

        assert_eq!(Metric::gauge("", 1.0).to_update(), Err(MetricError::EmptyId));
    }

    #[test]
    fn path_updates_parse_per_kind() {
        assert_eq!(
            parse_path_update("gauge", "cpu", "0.5").unwrap(),
            Metric::gauge("cpu", 0.5)
        );
        assert_eq!(
            parse_path_update("counter", "requests", "-7").unwrap(),
            Metric::counter("requests", -7)
        );
        assert!(matches!(
            parse_path_update("counter", "requests", "1.5"),
            Err(MetricError::BadValue(_))
        ));
        assert!(matches!(
            parse_path_update("gauge", "cpu", "none"),
            Err(MetricError::BadValue(_))
        ));
        assert!(matches!(
            parse_path_update("timer", "t", "1"),
            Err(MetricError::UnknownKind(_))
        ));
    }

    #[test]
    fn non_finite_gauges_are_rejected() {
        for raw in ["NaN", "nan", "inf", "-inf", "infinity"] {
            assert!(
                matches!(parse_path_update("gauge", "x", raw), Err(MetricError::BadValue(_))),
                "{raw} accepted"
            );
        }
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                Metric::gauge("x", value).to_update(),
                Err(MetricError::BadValue(_))
            ));
        }
        assert!(Metric::gauge("x", f64::MAX).to_update().is_ok());
    }
}
