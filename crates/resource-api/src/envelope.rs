//! Response envelope used by every resource API endpoint

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ClientError, Result};

/// `{"errorNumber": 0, "errorMessage": null, "body": {...}}`
///
/// Fields default when absent so that arbitrary error bodies still parse and
/// can be told apart from a real envelope by `errorMessage`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub error_number: i64,
    #[serde(default)]
    pub error_message: Option<String>,
    pub body: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Provider-reported message, when it carries one.
    pub fn message(&self) -> Option<&str> {
        self.error_message.as_deref().filter(|m| !m.trim().is_empty())
    }

    /// Success requires `errorNumber == 0` and a non-null body.
    pub fn into_result(self) -> Result<T> {
        if self.error_number != 0 {
            let code = self.error_number;
            return Err(ClientError::Api {
                code,
                message: self
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("provider error {code}")),
            });
        }
        self.body.ok_or(ClientError::EmptyBody)
    }
}

/// Decode a 2xx body into `T` through the envelope.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: ApiEnvelope<Value> = serde_json::from_slice(bytes)
        .map_err(|e| ClientError::Decode(format!("response is not an API envelope: {e}")))?;
    let body = envelope.into_result()?;
    serde_json::from_value(body).map_err(|e| ClientError::Decode(e.to_string()))
}
