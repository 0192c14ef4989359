use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Area identifier used to join observations onto features.
///
/// Codes arrive as JSON numbers or strings (`1`, `"1"`, `"01"`, `1.0`). Any
/// integer-valued code normalises to its plain decimal text so all of those
/// forms compare equal; other strings are trimmed and kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AreaCode(String);

impl AreaCode {
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(n) = trimmed.parse::<i64>() {
            return Self(n.to_string());
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if let Some(n) = integral(f) {
                return Self(n.to_string());
            }
        }
        Self(trimmed.to_string())
    }

    /// Read a code from a JSON property value. Null, booleans, arrays and
    /// objects are not codes.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self::new(s)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self(i.to_string()))
                } else {
                    let f = n.as_f64()?;
                    Some(Self(integral(f).map_or_else(|| f.to_string(), |i| i.to_string())))
                }
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

impl fmt::Display for AreaCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AreaCode {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Observations keyed by area code. Replaced wholesale on every model change.
///
/// Non-finite observations may be stored but are never reported: they read
/// back as missing and are excluded from [`ValueMap::values`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueMap(BTreeMap<AreaCode, f64>);

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object of `code → number`. Anything else yields an
    /// empty map; entries whose value is not numeric are skipped.
    pub fn from_json(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            if !value.is_null() {
                debug!(kind = json_kind(value), "value map is not an object, treating as empty");
            }
            return Self::new();
        };

        let mut map = Self::new();
        for (key, raw) in object {
            let number = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match number {
                Some(v) => map.insert(AreaCode::new(key), v),
                None => debug!(key = %key, "skipping non-numeric observation"),
            }
        }
        map
    }

    pub fn insert(&mut self, code: AreaCode, value: f64) {
        self.0.insert(code, value);
    }

    /// Finite observation for `code`, if any.
    pub fn get(&self, code: &AreaCode) -> Option<f64> {
        self.0.get(code).copied().filter(|v| v.is_finite())
    }

    /// All finite observations, in code order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.values().copied().filter(|v| v.is_finite())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(AreaCode, f64)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (AreaCode, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A sampled elevation point.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PointSample {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
}

impl PointSample {
    fn is_valid(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite() && self.alt.is_finite()
    }
}

/// Parse a JSON array of `{lon, lat, alt}` records, dropping malformed or
/// non-finite entries. A missing or non-array value yields no samples.
pub fn samples_from_json(value: &Value) -> Vec<PointSample> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    let samples: Vec<PointSample> = items
        .iter()
        .filter_map(|item| serde_json::from_value::<PointSample>(item.clone()).ok())
        .filter(PointSample::is_valid)
        .collect();
    if samples.len() < items.len() {
        debug!(dropped = items.len() - samples.len(), "dropped invalid point samples");
    }
    samples
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_normalise_across_representations() {
        let expected = AreaCode::new("1");
        assert_eq!(AreaCode::new("01"), expected);
        assert_eq!(AreaCode::new(" 1 "), expected);
        assert_eq!(AreaCode::from_json(&json!(1)).unwrap(), expected);
        assert_eq!(AreaCode::from_json(&json!(1.0)).unwrap(), expected);
        assert_eq!(AreaCode::from_json(&json!("1.0")).unwrap(), expected);
        assert_eq!(AreaCode::new("Saint-Germain-l'Auxerrois").as_str(), "Saint-Germain-l'Auxerrois");
        assert!(AreaCode::from_json(&json!(null)).is_none());
        assert!(AreaCode::from_json(&json!("  ")).is_none());
    }

    #[test]
    fn value_map_from_json_object() {
        let map = ValueMap::from_json(&json!({"1": 10, "02": "20.5", "3": "n/a", "4": null}));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&AreaCode::new("1")), Some(10.0));
        assert_eq!(map.get(&AreaCode::new("2")), Some(20.5));
        assert_eq!(map.get(&AreaCode::new("3")), None);
    }

    #[test]
    fn value_map_from_non_object_is_empty() {
        assert!(ValueMap::from_json(&json!([1, 2])).is_empty());
        assert!(ValueMap::from_json(&Value::Null).is_empty());
    }

    #[test]
    fn non_finite_observations_read_as_missing() {
        let map: ValueMap = [
            (AreaCode::new("1"), f64::NAN),
            (AreaCode::new("2"), 4.0),
            (AreaCode::new("3"), f64::INFINITY),
        ]
        .into_iter()
        .collect();
        assert_eq!(map.get(&AreaCode::new("1")), None);
        assert_eq!(map.values().collect::<Vec<_>>(), vec![4.0]);
    }

    #[test]
    fn samples_skip_malformed_entries() {
        let samples = samples_from_json(&json!([
            {"lon": 2.35, "lat": 48.85, "alt": 35.2},
            {"lon": 2.36, "lat": 48.86},
            {"lon": "x", "lat": 48.86, "alt": 1.0},
        ]));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].alt, 35.2);
        assert!(samples_from_json(&json!({"not": "a list"})).is_empty());
    }
}
