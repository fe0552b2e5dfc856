/// Schema registry errors.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema {name} is not valid JSON: {source}")]
    Parse {
        name: String,
        source: serde_json::Error,
    },

    #[error("schema {name} failed to compile: {reason}")]
    Compile { name: String, reason: String },
}
