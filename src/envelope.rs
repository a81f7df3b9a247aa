// SPDX-License-Identifier: MIT

//! Flow invocation envelope
//!
//! The message format used by the flow task queue and control interface.
//! On the wire it is a JSON object with exactly one of the keys `start`,
//! `schedule`, `runScheduled`, `retry`, `resume` or `state`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

const VARIANTS: [&str; 6] = ["start", "schedule", "runScheduled", "retry", "resume", "state"];

/// Start a new flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// Schedule a new flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Delay in seconds before the first run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
}

/// Reference to an existing flow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FlowRef {
    pub flow_id: String,
}

/// Resume an interrupted flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResumeMessage {
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Control-plane command describing what to do with a flow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowInvokeEnvelopeMessage {
    /// Create and immediately run a new flow instance
    Start(StartMessage),
    /// Create a flow instance whose first run is deferred
    Schedule(ScheduleMessage),
    /// Fire a previously scheduled instance now
    RunScheduled(FlowRef),
    /// Re-attempt a retryable FAILED instance
    Retry(FlowRef),
    /// Continue an INTERRUPTED instance with new input
    Resume(ResumeMessage),
    /// Read-only status check
    State(FlowRef),
}

impl FlowInvokeEnvelopeMessage {
    pub fn start(input: Option<Value>) -> Self {
        Self::Start(StartMessage { input })
    }

    pub fn schedule(input: Option<Value>, delay: Option<f64>) -> Self {
        Self::Schedule(ScheduleMessage { input, delay })
    }

    pub fn run_scheduled(flow_id: impl Into<String>) -> Self {
        Self::RunScheduled(FlowRef {
            flow_id: flow_id.into(),
        })
    }

    pub fn retry(flow_id: impl Into<String>) -> Self {
        Self::Retry(FlowRef {
            flow_id: flow_id.into(),
        })
    }

    pub fn resume(flow_id: impl Into<String>, payload: Option<Value>) -> Self {
        Self::Resume(ResumeMessage {
            flow_id: flow_id.into(),
            payload,
        })
    }

    pub fn state(flow_id: impl Into<String>) -> Self {
        Self::State(FlowRef {
            flow_id: flow_id.into(),
        })
    }

    /// Wire key of the populated variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Schedule(_) => "schedule",
            Self::RunScheduled(_) => "runScheduled",
            Self::Retry(_) => "retry",
            Self::Resume(_) => "resume",
            Self::State(_) => "state",
        }
    }

    /// Target flow id for messages that address an existing instance
    pub fn flow_id(&self) -> Option<&str> {
        match self {
            Self::RunScheduled(r) | Self::Retry(r) | Self::State(r) => Some(&r.flow_id),
            Self::Resume(r) => Some(&r.flow_id),
            Self::Start(_) | Self::Schedule(_) => None,
        }
    }

    /// Parse and validate an envelope from a JSON string
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Parse and validate an envelope from a JSON value.
    ///
    /// Rejects objects with zero or several populated variants, unknown
    /// keys and bodies that do not match their variant.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(map) = &value else {
            return Err(ValidationError::Malformed(
                "envelope must be a JSON object".to_string(),
            ));
        };

        if let Some(unknown) = map.keys().find(|k| !VARIANTS.contains(&k.as_str())) {
            return Err(ValidationError::UnknownVariant(unknown.clone()));
        }

        let populated: Vec<String> = map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.clone())
            .collect();
        match populated.len() {
            0 => return Err(ValidationError::EmptyEnvelope),
            1 => {}
            _ => return Err(ValidationError::MultipleVariants(populated)),
        }

        let key = &populated[0];
        let single = Value::Object(
            std::iter::once((key.clone(), map[key.as_str()].clone())).collect(),
        );
        let message: Self = serde_json::from_value(single)
            .map_err(|e| ValidationError::Malformed(format!("{}: {}", key, e)))?;
        message.validate()?;
        Ok(message)
    }

    /// Field-level checks serde cannot express
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(flow_id) = self.flow_id() {
            if flow_id.trim().is_empty() {
                return Err(ValidationError::Malformed(format!(
                    "{}: flowId must not be empty",
                    self.kind()
                )));
            }
        }
        if let Self::Schedule(ScheduleMessage {
            delay: Some(delay), ..
        }) = self
        {
            if !delay.is_finite() || *delay < 0.0 {
                return Err(ValidationError::Malformed(format!(
                    "schedule: delay must be a non-negative number of seconds, got {}",
                    delay
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_each_variant() {
        let cases = vec![
            (json!({"start": {"input": {"x": 1}}}), "start"),
            (json!({"schedule": {"delay": 30}}), "schedule"),
            (json!({"runScheduled": {"flowId": "f1"}}), "runScheduled"),
            (json!({"retry": {"flowId": "f1"}}), "retry"),
            (json!({"resume": {"flowId": "f1", "payload": "yes"}}), "resume"),
            (json!({"state": {"flowId": "f1"}}), "state"),
        ];
        for (value, kind) in cases {
            let msg = FlowInvokeEnvelopeMessage::from_value(value).unwrap();
            assert_eq!(msg.kind(), kind);
        }
    }

    #[test]
    fn test_start_without_input() {
        let msg = FlowInvokeEnvelopeMessage::from_json(r#"{"start": {}}"#).unwrap();
        assert_eq!(msg, FlowInvokeEnvelopeMessage::start(None));
        assert_eq!(msg.flow_id(), None);
    }

    #[test]
    fn test_rejects_empty_envelope() {
        let err = FlowInvokeEnvelopeMessage::from_value(json!({})).unwrap_err();
        assert_eq!(err, ValidationError::EmptyEnvelope);

        let err = FlowInvokeEnvelopeMessage::from_value(json!({"start": null})).unwrap_err();
        assert_eq!(err, ValidationError::EmptyEnvelope);
    }

    #[test]
    fn test_rejects_multiple_variants() {
        let err = FlowInvokeEnvelopeMessage::from_value(json!({
            "start": {},
            "retry": {"flowId": "f1"}
        }))
        .unwrap_err();
        match err {
            ValidationError::MultipleVariants(keys) => {
                assert!(keys.contains(&"start".to_string()));
                assert!(keys.contains(&"retry".to_string()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_variant() {
        let err = FlowInvokeEnvelopeMessage::from_value(json!({"cancel": {"flowId": "f"}}))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownVariant("cancel".to_string()));
    }

    #[test]
    fn test_rejects_malformed_bodies() {
        for value in [
            json!({"retry": {}}),
            json!({"resume": {"flowId": 7}}),
            json!({"state": {"flowId": "  "}}),
            json!({"schedule": {"delay": -1}}),
            json!({"start": {"input": 1, "extra": true}}),
            json!(["start"]),
        ] {
            let err = FlowInvokeEnvelopeMessage::from_value(value.clone()).unwrap_err();
            assert!(
                matches!(err, ValidationError::Malformed(_)),
                "{} gave {:?}",
                value,
                err
            );
        }
    }

    #[test]
    fn test_serializes_single_key() {
        let msg = FlowInvokeEnvelopeMessage::resume("f1", Some(json!({"ok": true})));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"resume": {"flowId": "f1", "payload": {"ok": true}}})
        );

        let msg = FlowInvokeEnvelopeMessage::run_scheduled("f2");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"runScheduled": {"flowId": "f2"}})
        );
    }
}
