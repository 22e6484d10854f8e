// crates/fleet-core/src/fingerprint.rs
//
// Deterministic configuration fingerprints.
//
// A fingerprint is SHA-256 over a canonical serialization of a declared
// subset of fields, truncated to 9 bytes and encoded as 12 URL-safe base64
// characters (72 bits). At 10,000 units the birthday collision probability
// is about 1e-14.

use std::collections::BTreeSet;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::error::FleetError;

/// Length of every fingerprint string.
pub const FINGERPRINT_LEN: usize = 12;

/// Digest bytes kept before encoding (`FINGERPRINT_LEN * 6 / 8`).
const DIGEST_PREFIX_BYTES: usize = 9;

/// Fields that decide whether a new data snapshot is needed.
pub const DATA_FIELDS: &[&str] = &["features", "cutoff_date", "source_version"];

/// Fields that decide whether a model needs retraining.
pub const TRAINING_FIELDS: &[&str] = &[
    "features",
    "cutoff_date",
    "source_version",
    "hyperparameters",
    "environment_version",
    "code_version",
];

/// The two fingerprint flavors. They must never be compared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintKind {
    Data,
    Training,
}

impl FingerprintKind {
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            FingerprintKind::Data => DATA_FIELDS,
            FingerprintKind::Training => TRAINING_FIELDS,
        }
    }
}

/// Opaque fixed-length fingerprint string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a fingerprint read back from a tag or a stage record.
    pub fn parse(s: &str) -> Result<Self, FleetError> {
        let valid = s.len() == FINGERPRINT_LEN
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Fingerprint(s.to_string()))
        } else {
            Err(FleetError::Config(format!("malformed fingerprint '{}'", s)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of `config` over the declared `fields`.
///
/// `config` must be a JSON object. Keys outside `fields` are ignored; a
/// declared field that is absent hashes the same as an explicit `null`.
/// The field list is treated as a set, so its order is irrelevant.
pub fn fingerprint(config: &Value, fields: &[&str]) -> Result<Fingerprint, FleetError> {
    let object = config
        .as_object()
        .ok_or_else(|| FleetError::Config("fingerprint input must be an object".to_string()))?;

    let declared: BTreeSet<&str> = fields.iter().copied().collect();
    if declared.is_empty() {
        return Err(FleetError::Config(
            "fingerprint requires at least one field".to_string(),
        ));
    }

    let mut canonical = String::new();
    canonical.push('{');
    for (i, field) in declared.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        write_string(field, &mut canonical)?;
        canonical.push(':');
        write_canonical(object.get(*field).unwrap_or(&Value::Null), &mut canonical)?;
    }
    canonical.push('}');

    let digest = Sha256::digest(canonical.as_bytes());
    Ok(Fingerprint(
        URL_SAFE_NO_PAD.encode(&digest[..DIGEST_PREFIX_BYTES]),
    ))
}

/// Write `value` with object keys sorted at every depth and no whitespace.
fn write_canonical(value: &Value, out: &mut String) -> Result<(), FleetError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out)?;
                out.push(':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Integral floats collapse to integers so `1` and `1.0` agree.
fn write_number(n: &Number, out: &mut String) {
    const I64_BOUND: f64 = 9_223_372_036_854_775_808.0; // 2^63

    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f >= -I64_BOUND && f < I64_BOUND {
            out.push_str(&(f as i64).to_string());
        } else {
            out.push_str(&f.to_string());
        }
    }
}

fn write_string(s: &str, out: &mut String) -> Result<(), FleetError> {
    out.push_str(&serde_json::to_string(s)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn base() -> Value {
        json!({
            "plant_id": "PLANT001",
            "circuit_id": "CIRCUIT01",
            "features": ["load", "temp"],
            "cutoff_date": "2025-12-11",
            "source_version": 7,
            "hyperparameters": {"learning_rate": 0.001, "epochs": 100, "batch_size": 32}
        })
    }

    #[test]
    fn test_fixed_length_and_charset() {
        let fp = fingerprint(&base(), DATA_FIELDS).unwrap();
        assert_eq!(fp.as_str().len(), FINGERPRINT_LEN);
        assert!(Fingerprint::parse(fp.as_str()).is_ok());
    }

    #[test]
    fn test_repeatable() {
        let hashes: HashSet<Fingerprint> = (0..5)
            .map(|_| fingerprint(&base(), TRAINING_FIELDS).unwrap())
            .collect();
        assert_eq!(hashes.len(), 1);
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let a = base();
        let b: Value = serde_json::from_str(
            r#"{
                "hyperparameters": {"batch_size": 32, "epochs": 100, "learning_rate": 0.001},
                "source_version": 7,
                "cutoff_date": "2025-12-11",
                "features": ["load", "temp"],
                "circuit_id": "CIRCUIT01",
                "plant_id": "PLANT001"
            }"#,
        )
        .unwrap();
        assert_eq!(
            fingerprint(&a, TRAINING_FIELDS).unwrap(),
            fingerprint(&b, TRAINING_FIELDS).unwrap()
        );
        // Declared field order is irrelevant too.
        let reversed: Vec<&str> = TRAINING_FIELDS.iter().rev().copied().collect();
        assert_eq!(
            fingerprint(&a, TRAINING_FIELDS).unwrap(),
            fingerprint(&a, &reversed).unwrap()
        );
    }

    #[test]
    fn test_undeclared_fields_are_isolated() {
        let a = base();
        let mut b = base();
        b["metadata"] = json!({"config_hash": "0123456789ab", "generated_at": "2025-12-11T00:00:00Z"});
        b["hyperparameters"]["dropout"] = json!(0.2);
        assert_eq!(
            fingerprint(&a, DATA_FIELDS).unwrap(),
            fingerprint(&b, DATA_FIELDS).unwrap()
        );
        // The hyperparameter change is visible to the training flavor only.
        assert_ne!(
            fingerprint(&a, TRAINING_FIELDS).unwrap(),
            fingerprint(&b, TRAINING_FIELDS).unwrap()
        );
    }

    #[test]
    fn test_declared_field_changes_are_detected() {
        let a = fingerprint(&base(), TRAINING_FIELDS).unwrap();

        let mut cutoff = base();
        cutoff["cutoff_date"] = json!("2025-12-18");
        assert_ne!(a, fingerprint(&cutoff, TRAINING_FIELDS).unwrap());

        let mut lr = base();
        lr["hyperparameters"]["learning_rate"] = json!(0.01);
        assert_ne!(a, fingerprint(&lr, TRAINING_FIELDS).unwrap());

        let mut type_change = base();
        type_change["source_version"] = json!("7");
        assert_ne!(a, fingerprint(&type_change, TRAINING_FIELDS).unwrap());
    }

    #[test]
    fn test_integral_floats_match_integers() {
        let mut a = base();
        a["hyperparameters"]["epochs"] = json!(100);
        let mut b = base();
        b["hyperparameters"]["epochs"] = json!(100.0);
        assert_eq!(
            fingerprint(&a, TRAINING_FIELDS).unwrap(),
            fingerprint(&b, TRAINING_FIELDS).unwrap()
        );

        let mut c = base();
        c["hyperparameters"]["epochs"] = json!(100.5);
        assert_ne!(
            fingerprint(&a, TRAINING_FIELDS).unwrap(),
            fingerprint(&c, TRAINING_FIELDS).unwrap()
        );
    }

    #[test]
    fn test_absent_field_equals_null() {
        let mut with_null = base();
        with_null["environment_version"] = Value::Null;
        assert_eq!(
            fingerprint(&base(), TRAINING_FIELDS).unwrap(),
            fingerprint(&with_null, TRAINING_FIELDS).unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            fingerprint(&json!([1, 2, 3]), DATA_FIELDS),
            Err(FleetError::Config(_))
        ));
        assert!(matches!(
            fingerprint(&base(), &[]),
            Err(FleetError::Config(_))
        ));
        assert!(Fingerprint::parse("short").is_err());
        assert!(Fingerprint::parse("has space!!!").is_err());
    }

    #[test]
    fn test_no_collisions_across_a_large_fleet() {
        let mut seen = HashSet::new();
        for plant in 0..50 {
            for circuit in 0..60 {
                let cfg = json!({
                    "features": [format!("p{}c{}", plant, circuit)],
                    "cutoff_date": "2025-12-11",
                    "source_version": plant * 100 + circuit,
                });
                assert!(seen.insert(fingerprint(&cfg, DATA_FIELDS).unwrap()));
            }
        }
        assert_eq!(seen.len(), 3000);
    }
}
