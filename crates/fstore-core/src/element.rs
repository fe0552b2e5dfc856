use serde_json::Value;
use uuid::Uuid;

use crate::error::CoreError;

/// Extract the discriminator (the `type` field) of an element.
pub fn discriminator(element: &Value) -> Option<&str> {
    element.get("type").and_then(Value::as_str)
}

/// Extract the discriminator, enforcing the structural rules every stored
/// element must satisfy: it is a JSON object, it carries a string `type`,
/// and it has no field whose name equals that type.
pub fn require_discriminator(element: &Value) -> Result<&str, CoreError> {
    let object = element.as_object().ok_or(CoreError::NotAnObject)?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CoreError::MissingDiscriminator)?;
    if object.contains_key(kind) {
        return Err(CoreError::SelfTitledField {
            discriminator: kind.to_string(),
        });
    }
    Ok(kind)
}

/// Extract the `id` field of an element.
pub fn element_id(element: &Value) -> Option<&str> {
    element.get("id").and_then(Value::as_str)
}

/// Mint a fresh element identifier of the form `<type>--<uuid v4>`.
pub fn mint_id(discriminator: &str) -> String {
    format!("{}--{}", discriminator, Uuid::new_v4())
}

/// Return the element's id, minting and inserting one when absent.
///
/// The element must already satisfy [`require_discriminator`].
pub fn ensure_id(element: &mut Value) -> Result<String, CoreError> {
    if let Some(id) = element_id(element) {
        return Ok(id.to_string());
    }
    let kind = require_discriminator(element)?.to_string();
    let id = mint_id(&kind);
    tracing::debug!(id = %id, "minted element id");
    let object = element.as_object_mut().ok_or(CoreError::NotAnObject)?;
    object.insert("id".to_string(), Value::String(id.clone()));
    Ok(id)
}
