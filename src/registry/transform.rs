//! Response transforms applied to successful gateway responses before caching.

use crate::constants::MMOL_TO_MG_DL;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Closed set of pure response transforms
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseTransform {
    #[default]
    Identity,
    /// Extract a sub-document with an RFC 6901 pointer
    Pointer { pointer: String },
    /// Normalize Tidepool `cbg`/`smbg` records into mg/dL readings
    TidepoolReadings,
}

impl ResponseTransform {
    pub fn apply(&self, body: Value) -> Result<Value, String> {
        match self {
            Self::Identity => Ok(body),
            Self::Pointer { pointer } => body
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| format!("response has no value at '{pointer}'")),
            Self::TidepoolReadings => normalize_tidepool(body),
        }
    }
}

fn normalize_tidepool(body: Value) -> Result<Value, String> {
    let Value::Array(records) = body else {
        return Err("expected an array of Tidepool records".to_string());
    };

    let readings = records
        .into_iter()
        .filter_map(|record| {
            let kind = record.get("type")?.as_str()?;
            if kind != "cbg" && kind != "smbg" {
                return None;
            }
            let value = record.get("value")?.as_f64()?;
            // Tidepool reports mmol/L unless the record says otherwise
            let mg_dl = match record.get("units").and_then(Value::as_str) {
                Some("mg/dL") | Some("mg/dl") => value,
                _ => value * MMOL_TO_MG_DL,
            };
            Some(json!({
                "glucose_mg_dl": (mg_dl * 10.0).round() / 10.0,
                "measured_at": record.get("time").cloned().unwrap_or(Value::Null),
                "kind": kind,
                "source": "tidepool",
            }))
        })
        .collect();

    Ok(Value::Array(readings))
}
