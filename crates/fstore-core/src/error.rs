/// Errors from fstore-core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("element is not a JSON object")]
    NotAnObject,

    #[error("element needs to have a type")]
    MissingDiscriminator,

    #[error("element of type {discriminator} must not contain a field named {discriminator}")]
    SelfTitledField { discriminator: String },
}
