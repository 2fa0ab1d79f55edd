//! Wire messages on the observer channel.
//!
//! Server→client messages are JSON objects tagged by `type`; the variants
//! here mirror the server's envelope in `foreman-events`. Anything that
//! fails to decode is logged and dropped by the link driver without
//! tearing down the connection.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A decoded server→client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A job changed status or made progress.
    JobUpdate {
        #[serde(default)]
        job_id: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        progress: Option<u64>,
        #[serde(default)]
        data: serde_json::Value,
    },
    /// A worker came online, went stale, or disconnected.
    WorkerStatus {
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Domain-specific passthrough payload, forwarded untouched.
    AccountCreated {
        #[serde(default)]
        data: serde_json::Value,
    },
    /// An error fact surfaced by the server.
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl ServerMessage {
    /// Decode a raw text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Build the keepalive payload sent on the client's ping interval.
///
/// The server is not required to reply; the traffic itself defends against
/// the server-side idle timeout.
pub fn keepalive_ping() -> String {
    json!({
        "type": "ping",
        "timestamp": chrono::Utc::now().timestamp_millis(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_job_update() {
        let text = r#"{"type":"job_update","job_id":"abc","status":"running","progress":3,"data":{"successful":2}}"#;
        let msg = ServerMessage::parse(text).unwrap();
        match msg {
            ServerMessage::JobUpdate {
                job_id,
                status,
                progress,
                data,
            } => {
                assert_eq!(job_id.as_deref(), Some("abc"));
                assert_eq!(status.as_deref(), Some("running"));
                assert_eq!(progress, Some(3));
                assert_eq!(data["successful"], 2);
            }
            other => panic!("expected job_update, got {other:?}"),
        }
    }

    #[test]
    fn parses_an_account_created_passthrough() {
        let text = r#"{"type":"account_created","data":{"username":"new-user"}}"#;
        let msg = ServerMessage::parse(text).unwrap();
        assert!(matches!(msg, ServerMessage::AccountCreated { .. }));
    }

    #[test]
    fn parses_an_error_with_message() {
        let text = r#"{"type":"error","message":"queue stalled"}"#;
        match ServerMessage::parse(text).unwrap() {
            ServerMessage::Error { message, .. } => {
                assert_eq!(message.as_deref(), Some("queue stalled"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_payloads_fail_to_parse() {
        assert!(ServerMessage::parse("not json").is_err());
        assert!(ServerMessage::parse(r#"{"type":"mystery"}"#).is_err());
        assert!(ServerMessage::parse(r#"{"no_type":true}"#).is_err());
    }

    #[test]
    fn variant_tags_match_the_server_constants() {
        use foreman_core::wire::{
            MSG_TYPE_ACCOUNT_CREATED, MSG_TYPE_ERROR, MSG_TYPE_JOB_UPDATE, MSG_TYPE_WORKER_STATUS,
        };

        let tag = |msg: &ServerMessage| {
            serde_json::to_value(msg).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string()
        };

        let update = ServerMessage::JobUpdate {
            job_id: None,
            status: None,
            progress: None,
            data: serde_json::Value::Null,
        };
        assert_eq!(tag(&update), MSG_TYPE_JOB_UPDATE);

        let worker = ServerMessage::WorkerStatus {
            data: serde_json::Value::Null,
        };
        assert_eq!(tag(&worker), MSG_TYPE_WORKER_STATUS);

        let created = ServerMessage::AccountCreated {
            data: serde_json::Value::Null,
        };
        assert_eq!(tag(&created), MSG_TYPE_ACCOUNT_CREATED);

        let error = ServerMessage::Error {
            message: None,
            data: serde_json::Value::Null,
        };
        assert_eq!(tag(&error), MSG_TYPE_ERROR);
    }

    #[test]
    fn keepalive_ping_has_type_and_timestamp() {
        let ping: serde_json::Value = serde_json::from_str(&keepalive_ping()).unwrap();
        assert_eq!(ping["type"], "ping");
        assert!(ping["timestamp"].is_i64());
    }
}
