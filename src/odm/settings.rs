use serde::{Deserialize, Serialize};

use crate::firestore::constants::MAX_IN_FILTER_VALUES;

use super::constants::DEFAULT_HYDRATION_CHUNK_SIZE;
use super::error::{invalid_argument, OdmResult};

/// Tunables for a [`Database`](super::Database).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OdmSettings {
    /// Number of referenced documents fetched per hydration query.
    pub hydration_chunk_size: usize,
}

impl Default for OdmSettings {
    fn default() -> Self {
        Self {
            hydration_chunk_size: DEFAULT_HYDRATION_CHUNK_SIZE,
        }
    }
}

impl OdmSettings {
    pub fn with_hydration_chunk_size(mut self, size: usize) -> Self {
        self.hydration_chunk_size = size;
        self
    }

    pub fn validate(&self) -> OdmResult<()> {
        if self.hydration_chunk_size == 0 || self.hydration_chunk_size > MAX_IN_FILTER_VALUES {
            return Err(invalid_argument(format!(
                "hydrationChunkSize must be between 1 and {MAX_IN_FILTER_VALUES}, got {}",
                self.hydration_chunk_size
            )));
        }
        Ok(())
    }

    /// Parses settings from JSON, filling omitted keys with defaults.
    pub fn from_json(json: &str) -> OdmResult<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|err| invalid_argument(format!("Invalid ODM settings: {err}")))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_store_filter_limit() {
        let settings = OdmSettings::default();
        assert_eq!(settings.hydration_chunk_size, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn parses_partial_json() {
        let settings = OdmSettings::from_json(r#"{"hydrationChunkSize": 4}"#).unwrap();
        assert_eq!(settings.hydration_chunk_size, 4);
        assert_eq!(OdmSettings::from_json("{}").unwrap(), OdmSettings::default());
    }

    #[test]
    fn rejects_out_of_range_chunk_size() {
        for size in [0, MAX_IN_FILTER_VALUES + 1] {
            let err = OdmSettings::default()
                .with_hydration_chunk_size(size)
                .validate()
                .unwrap_err();
            assert_eq!(err.code_str(), "odm/invalid-argument");
        }
        assert!(OdmSettings::from_json(r#"{"hydrationChunkSize": "ten"}"#).is_err());
    }
}
