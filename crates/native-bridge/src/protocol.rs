//! Wire types for the content ↔ host bridge.
//!
//! Content sends a [`BridgeRequest`] as one JSON string. The host answers by
//! injecting a script that dispatches a `nativeBridgeResponse` DOM event whose
//! detail is a [`BridgeResponseEvent`].

use crate::{BridgeError, BridgeResult};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// DOM event name used for host → content messages.
pub const RESPONSE_EVENT: &str = "nativeBridgeResponse";

const SCRIPT_PREFIX: &str = "window.dispatchEvent(new CustomEvent(\"nativeBridgeResponse\", { detail: ";
const SCRIPT_SUFFIX: &str = " }));";

/// A content → host request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    #[serde(rename = "type")]
    pub feature_type: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
}

impl BridgeRequest {
    pub fn new(feature_type: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            feature_type: feature_type.into(),
            action: action.into(),
            payload: None,
            callback_id: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_callback_id(mut self, callback_id: impl Into<String>) -> Self {
        self.callback_id = Some(callback_id.into());
        self
    }

    pub fn from_json(raw: &str) -> BridgeResult<Self> {
        serde_json::from_str(raw).map_err(|e| BridgeError::Protocol(e.to_string()))
    }

    pub fn to_json(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `{success, data|error}` result of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<Value, String> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "Unknown bridge error".to_string()))
        }
    }
}

/// Detail of a host → content `nativeBridgeResponse` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponseEvent {
    #[serde(rename = "type")]
    pub feature_type: String,
    pub action: String,
    pub response: BridgeOutcome,
    #[serde(default)]
    pub callback_id: Option<String>,
}

impl BridgeResponseEvent {
    pub fn reply(request: &BridgeRequest, response: BridgeOutcome) -> Self {
        Self {
            feature_type: request.feature_type.clone(),
            action: request.action.clone(),
            response,
            callback_id: request.callback_id.clone(),
        }
    }

    /// An unsolicited host event. Carries no callback id.
    pub fn push(feature_type: impl Into<String>, action: impl Into<String>, data: Value) -> Self {
        Self {
            feature_type: feature_type.into(),
            action: action.into(),
            response: BridgeOutcome::ok(data),
            callback_id: None,
        }
    }

    pub fn from_json(raw: &str) -> BridgeResult<Self> {
        serde_json::from_str(raw).map_err(|e| BridgeError::Protocol(e.to_string()))
    }
}

/// Render the script that dispatches `event` in the embedded surface.
///
/// U+2028/U+2029 are valid in JSON but terminate lines in older JS engines,
/// and `</` could close an enclosing `<script>` tag, so both are escaped.
pub fn render_dispatch_script(event: &BridgeResponseEvent) -> BridgeResult<String> {
    let detail = serde_json::to_string(event)?
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
        .replace("</", "<\\/");
    Ok(format!("{SCRIPT_PREFIX}{detail}{SCRIPT_SUFFIX}"))
}

/// Recover the event detail from a script built by [`render_dispatch_script`].
///
/// This is what the content-side listener receives.
pub fn parse_dispatch_script(script: &str) -> BridgeResult<BridgeResponseEvent> {
    let detail = script
        .strip_prefix(SCRIPT_PREFIX)
        .and_then(|rest| rest.strip_suffix(SCRIPT_SUFFIX))
        .ok_or_else(|| BridgeError::Protocol("not a bridge dispatch script".to_string()))?;
    BridgeResponseEvent::from_json(detail)
}

/// Best-effort `callbackId` from a message that failed to parse as a request.
pub fn salvage_callback_id(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value
        .get("callbackId")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Salvage a string field from a partially valid message.
pub(crate) fn salvage_field(raw: &str, field: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get(field).and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default()
}

/// Fresh callback id: `cb_<unix millis>_<random suffix>`.
pub fn new_callback_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("cb_{millis}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = BridgeRequest::new("LOCATION", "GET_CURRENT").with_callback_id("cb_1");
        let value: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "LOCATION", "action": "GET_CURRENT", "callbackId": "cb_1"})
        );
    }

    #[test]
    fn test_response_wire_shape() {
        let request = BridgeRequest::new("LOCATION", "GET_CURRENT").with_callback_id("cb_1");
        let event = BridgeResponseEvent::reply(
            &request,
            BridgeOutcome::ok(json!({"latitude": 37.5, "longitude": 127.0})),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "LOCATION",
                "action": "GET_CURRENT",
                "response": {"success": true, "data": {"latitude": 37.5, "longitude": 127.0}},
                "callbackId": "cb_1"
            })
        );
    }

    #[test]
    fn test_script_escapes_line_separators() {
        let event = BridgeResponseEvent::push(
            "DEVICE",
            "NOTICE",
            json!({"text": "a\u{2028}b\u{2029}c</script>"}),
        );
        let script = render_dispatch_script(&event).unwrap();
        assert!(script.starts_with("window.dispatchEvent(new CustomEvent(\"nativeBridgeResponse\""));
        assert!(!script.contains('\u{2028}'));
        assert!(!script.contains('\u{2029}'));
        assert!(!script.contains("</script>"));

        assert_eq!(parse_dispatch_script(&script).unwrap(), event);
    }

    #[test]
    fn test_salvage_callback_id() {
        assert_eq!(
            salvage_callback_id(r#"{"callbackId": "cb_9", "action": 3}"#).as_deref(),
            Some("cb_9")
        );
        assert_eq!(salvage_callback_id("{not json"), None);
    }

    #[test]
    fn test_callback_ids_have_expected_shape() {
        let id = new_callback_id();
        let parts: Vec<_> = id.splitn(3, '_').collect();
        assert_eq!(parts[0], "cb");
        assert!(parts[1].parse::<u128>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert_ne!(new_callback_id(), new_callback_id());
    }
}
