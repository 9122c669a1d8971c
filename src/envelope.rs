use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::{Classifier, SUCCESS_CODE};
use crate::error::ApiError;

/// Backend response wrapper: `{ code, message, data }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub data: T,
}

/// How response bodies are unwrapped.
///
/// The two shapes cannot be told apart reliably from the body alone, so the
/// choice is explicit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnvelopeMode {
    /// `{ code, message, data }`; success requires a 2xx status and `code == 200`.
    #[default]
    Wrapped,
    /// Bare `data`; success is a 2xx status.
    Bare,
}

impl std::str::FromStr for EnvelopeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wrapped" => Ok(Self::Wrapped),
            "bare" => Ok(Self::Bare),
            other => Err(format!("unknown envelope mode '{other}' (expected wrapped|bare)")),
        }
    }
}

/// Error body shape tolerated in bare mode.
#[derive(Debug, Deserialize)]
struct BareError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default, alias = "msg", alias = "error")]
    message: String,
}

impl EnvelopeMode {
    /// Unwrap a response body into `T`, or classify it into an [`ApiError`].
    pub(crate) fn unwrap<T: DeserializeOwned>(
        self,
        http_status: u16,
        body: &[u8],
        classifier: &Classifier,
    ) -> Result<T, ApiError> {
        let success_status = (200..300).contains(&http_status);

        match self {
            Self::Wrapped => match serde_json::from_slice::<Envelope<Value>>(body) {
                Ok(envelope) if success_status && envelope.code == SUCCESS_CODE => {
                    decode_data(envelope.data, envelope.code)
                }
                Ok(envelope) => Err(classifier.error(http_status, Some(&envelope))),
                Err(e) if success_status => Err(ApiError::unknown(
                    i64::from(http_status),
                    format!("malformed response envelope: {e}"),
                )),
                Err(_) => Err(classifier.error::<Value>(http_status, None)),
            },
            Self::Bare if success_status => {
                let data = if body.iter().all(u8::is_ascii_whitespace) {
                    Value::Null
                } else {
                    serde_json::from_slice(body).map_err(|e| {
                        ApiError::unknown(
                            i64::from(http_status),
                            format!("malformed response body: {e}"),
                        )
                    })?
                };
                decode_data(data, i64::from(http_status))
            }
            Self::Bare => {
                let envelope = serde_json::from_slice::<BareError>(body)
                    .ok()
                    .map(|e| Envelope {
                        code: e.code.unwrap_or(i64::from(http_status)),
                        message: e.message,
                        data: Value::Null,
                    });
                Err(classifier.error(http_status, envelope.as_ref()))
            }
        }
    }
}

fn decode_data<T: DeserializeOwned>(data: Value, code: i64) -> Result<T, ApiError> {
    serde_json::from_value(data)
        .map_err(|e| ApiError::unknown(code, format!("unexpected response payload: {e}")))
}
