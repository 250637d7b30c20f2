use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Invalid query: {0}")]
    InvalidEnvelope(String),

    #[error("Adapter does not implement action: {0}")]
    UnsupportedOperation(String),

    #[error("DB connect failed: {0}")]
    ConnectionFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Populate lookup for `{field}` failed: {source}")]
    PopulateLookupFailed {
        field: String,
        source: Box<AdapterError>,
    },

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Returns the innermost error of a populate failure chain.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::PopulateLookupFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_failure_exposes_root_cause() {
        let inner = AdapterError::Storage("socket reset".into());
        let outer = AdapterError::PopulateLookupFailed {
            field: "tags".into(),
            source: Box::new(AdapterError::PopulateLookupFailed {
                field: "owner".into(),
                source: Box::new(inner),
            }),
        };
        assert!(matches!(outer.root_cause(), AdapterError::Storage(m) if m == "socket reset"));
        assert!(outer.to_string().contains("`tags`"));
    }

    #[test]
    fn messages_name_the_offending_value() {
        let e = AdapterError::UnsupportedOperation("bogus".into());
        assert_eq!(e.to_string(), "Adapter does not implement action: bogus");
        let e = AdapterError::InvalidEnvelope("requires .do and .on".into());
        assert_eq!(e.to_string(), "Invalid query: requires .do and .on");
    }
}
