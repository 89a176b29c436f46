// signalr-protocol: SignalR Hub Protocol v1 (JSON) message types and framing.
//
// All messages are JSON objects discriminated by a numeric `type` field and
// terminated on the wire by the record separator byte `0x1E`. This crate
// owns the shapes and the split/encode logic; it does not know about
// transports, timers, or connection state.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// The byte SignalR uses to delimit successive JSON records within one
/// transport message.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Numeric `type` discriminants, frozen by the v1 protocol.
pub mod type_codes {
    pub const INVOCATION: u8 = 1;
    pub const STREAM_ITEM: u8 = 2;
    pub const COMPLETION: u8 = 3;
    pub const STREAM_INVOCATION: u8 = 4;
    pub const CANCEL_INVOCATION: u8 = 5;
    pub const PING: u8 = 6;
    pub const CLOSE: u8 = 7;
}

/// The literal handshake request record, already including the trailing
/// record separator.
pub fn handshake_request() -> Vec<u8> {
    let mut bytes = br#"{"protocol":"json","version":1}"#.to_vec();
    bytes.push(RECORD_SEPARATOR);
    bytes
}

/// The handshake response as the server's stream reports it: `Some(error)`
/// on failure, `None` on success (the usual `{}` body).
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Outgoing invocation (SendCore / InvokeCoreAsync)
// ---------------------------------------------------------------------------

/// An outgoing `Invocation` record.
///
/// `invocation_id` is empty for fire-and-forget sends. `stream_ids` is
/// always empty in this client (streaming invocations are a non-goal) but
/// is still emitted as a literal array, matching what a v1 server expects
/// to see even when unused.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingInvocation {
    #[serde(rename = "type")]
    pub message_type: u8,
    #[serde(rename = "invocationId")]
    pub invocation_id: String,
    pub target: String,
    pub arguments: Vec<serde_json::Value>,
    #[serde(rename = "streamIds")]
    pub stream_ids: Vec<String>,
}

impl OutgoingInvocation {
    pub fn new(invocation_id: String, target: String, arguments: Vec<serde_json::Value>) -> Self {
        Self {
            message_type: type_codes::INVOCATION,
            invocation_id,
            target,
            arguments,
            stream_ids: Vec::new(),
        }
    }

    /// Encode to a single wire record, including the trailing `0x1E`.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(RECORD_SEPARATOR);
        Ok(bytes)
    }
}

/// The literal outgoing `Ping` record, including the trailing `0x1E`.
pub fn ping_record() -> Vec<u8> {
    let mut bytes = format!(r#"{{"type": {}}}"#, type_codes::PING).into_bytes();
    bytes.push(RECORD_SEPARATOR);
    bytes
}

/// The outgoing `Close` record, with or without an error message.
pub fn close_record(error: Option<&str>) -> Vec<u8> {
    let mut bytes = match error {
        None => format!(r#"{{"type":{}}}"#, type_codes::CLOSE).into_bytes(),
        Some(msg) => {
            let escaped = serde_json::to_string(msg).unwrap_or_else(|_| "\"\"".to_owned());
            format!(r#"{{"type":{},"error":{escaped}}}"#, type_codes::CLOSE).into_bytes()
        }
    };
    bytes.push(RECORD_SEPARATOR);
    bytes
}

// ---------------------------------------------------------------------------
// Incoming records
// ---------------------------------------------------------------------------

/// A single incoming record, decoded far enough to dispatch on but keeping
/// invocation arguments as raw JSON so the handler table can deserialize
/// each one into the type its callback expects.
#[derive(Debug)]
pub enum IncomingRecord {
    Invocation {
        target: String,
        arguments: Vec<Box<RawValue>>,
        invocation_id: Option<String>,
    },
    /// `StreamItem`, `StreamInvocation`, `CancelInvocation` — streaming is a
    /// non-goal; these are recognized only so they can be logged and
    /// dropped rather than treated as an unknown message type.
    StreamingUnsupported {
        type_code: u8,
    },
    Completion {
        invocation_id: String,
        result: Option<Box<RawValue>>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// A record whose `type` field this client does not recognize.
    Unknown {
        type_code: Option<u8>,
    },
}

/// The field-driven shape every incoming record is parsed through before
/// being narrowed into an [`IncomingRecord`].
#[derive(Debug, Deserialize)]
struct RawRecord<'a> {
    #[serde(rename = "type")]
    message_type: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(rename = "invocationId", default)]
    invocation_id: Option<String>,
    #[serde(default, borrow)]
    arguments: Option<Vec<&'a RawValue>>,
    #[serde(default, borrow)]
    result: Option<&'a RawValue>,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "allowReconnect", default)]
    allow_reconnect: bool,
}

/// Parse a single non-empty record fragment (already split on `0x1E`, still
/// possibly missing that trailing byte for the best-effort case).
pub fn parse_record(fragment: &[u8]) -> Result<IncomingRecord, serde_json::Error> {
    let text = std::str::from_utf8(fragment)
        .map_err(|e| serde::de::Error::custom(format!("invalid utf-8: {e}")))?;
    let raw: RawRecord = serde_json::from_str(text)?;
    Ok(match raw.message_type {
        type_codes::INVOCATION => IncomingRecord::Invocation {
            target: raw.target.unwrap_or_default(),
            arguments: raw
                .arguments
                .unwrap_or_default()
                .into_iter()
                .map(RawValue::to_owned)
                .collect(),
            invocation_id: raw.invocation_id,
        },
        type_codes::COMPLETION => IncomingRecord::Completion {
            invocation_id: raw.invocation_id.unwrap_or_default(),
            result: raw.result.map(RawValue::to_owned),
            error: raw.error,
        },
        type_codes::PING => IncomingRecord::Ping,
        type_codes::CLOSE => IncomingRecord::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect,
        },
        type_codes::STREAM_ITEM | type_codes::STREAM_INVOCATION | type_codes::CANCEL_INVOCATION => {
            IncomingRecord::StreamingUnsupported {
                type_code: raw.message_type,
            }
        }
        other => IncomingRecord::Unknown {
            type_code: Some(other),
        },
    })
}

/// Split one transport message into its constituent records and parse each.
///
/// A trailing empty fragment produced by the terminating `0x1E` is
/// discarded. If the message's last byte is not the record separator this
/// is logged by the caller as a "non-SignalR message" but the fragments
/// that *were* found are still parsed, matching the best-effort behavior
/// described for the codec.
pub fn split_records(message: &[u8]) -> Vec<&[u8]> {
    let mut fragments: Vec<&[u8]> = message.split(|&b| b == RECORD_SEPARATOR).collect();
    if fragments.last().is_some_and(|f| f.is_empty()) {
        fragments.pop();
    }
    fragments.into_iter().filter(|f| !f.is_empty()).collect()
}

/// `true` when the raw transport message ends with the record separator,
/// i.e. is a well-formed SignalR payload rather than a stray frame.
pub fn is_well_terminated(message: &[u8]) -> bool {
    message.last() == Some(&RECORD_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_request_is_literal_and_terminated() {
        let bytes = handshake_request();
        assert_eq!(
            bytes,
            br#"{"protocol":"json","version":1}"#
                .iter()
                .copied()
                .chain(std::iter::once(RECORD_SEPARATOR))
                .collect::<Vec<u8>>()
        );
    }

    #[test]
    fn outgoing_invocation_encodes_type_as_unquoted_number() {
        let invocation = OutgoingInvocation::new(
            String::new(),
            "Echo".to_owned(),
            vec![serde_json::Value::String("hi".to_owned())],
        );
        let bytes = invocation.encode().unwrap();
        assert_eq!(bytes.last(), Some(&RECORD_SEPARATOR));
        let text = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(
            text,
            r#"{"type":1,"invocationId":"","target":"Echo","arguments":["hi"],"streamIds":[]}"#
        );
    }

    #[test]
    fn ping_record_matches_wire_literal() {
        assert_eq!(ping_record(), b"{\"type\": 6}\x1e");
    }

    #[test]
    fn close_record_without_error() {
        assert_eq!(close_record(None), b"{\"type\":7}\x1e");
    }

    #[test]
    fn close_record_with_error_escapes_quotes() {
        let bytes = close_record(Some(r#"boom "bad""#));
        let text = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(text, r#"{"type":7,"error":"boom \"bad\""}"#);
    }

    #[test]
    fn split_records_drops_trailing_empty_fragment() {
        let message = b"{\"type\":6}\x1e{\"type\":6}\x1e";
        let fragments = split_records(message);
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn split_records_handles_missing_final_separator() {
        let message = b"{\"type\":6}\x1e{\"type\":6}";
        let fragments = split_records(message);
        assert_eq!(fragments.len(), 2);
        assert!(!is_well_terminated(message));
    }

    #[test]
    fn parse_record_round_trips_invocation_target_and_id() {
        let invocation =
            OutgoingInvocation::new("7".to_owned(), "Add".to_owned(), vec![2.into(), 3.into()]);
        let bytes = invocation.encode().unwrap();
        let fragments = split_records(&bytes);
        let record = parse_record(fragments[0]).unwrap();
        match record {
            IncomingRecord::Invocation {
                target,
                arguments,
                invocation_id,
            } => {
                assert_eq!(target, "Add");
                assert_eq!(invocation_id.as_deref(), Some("7"));
                assert_eq!(arguments.len(), 2);
                assert_eq!(arguments[0].get(), "2");
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn parse_record_completion_with_result() {
        let record = parse_record(br#"{"type":3,"invocationId":"0","result":5}"#).unwrap();
        match record {
            IncomingRecord::Completion {
                invocation_id,
                result,
                error,
            } => {
                assert_eq!(invocation_id, "0");
                assert_eq!(result.unwrap().get(), "5");
                assert!(error.is_none());
            }
            other => panic!("expected Completion, got {other:?}"),
        }
    }

    #[test]
    fn parse_record_completion_with_error() {
        let record = parse_record(br#"{"type":3,"invocationId":"0","error":"boom"}"#).unwrap();
        match record {
            IncomingRecord::Completion {
                invocation_id,
                result,
                error,
            } => {
                assert_eq!(invocation_id, "0");
                assert!(result.is_none());
                assert_eq!(error.as_deref(), Some("boom"));
            }
            other => panic!("expected Completion, got {other:?}"),
        }
    }

    #[test]
    fn parse_record_close_with_reconnect() {
        let record =
            parse_record(br#"{"type":7,"allowReconnect":true,"error":"restart"}"#).unwrap();
        match record {
            IncomingRecord::Close {
                error,
                allow_reconnect,
            } => {
                assert!(allow_reconnect);
                assert_eq!(error.as_deref(), Some("restart"));
            }
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[test]
    fn parse_record_unknown_type_is_not_an_error() {
        let record = parse_record(br#"{"type":42}"#).unwrap();
        assert!(matches!(record, IncomingRecord::Unknown { type_code: Some(42) }));
    }

    #[test]
    fn parse_record_streaming_types_are_recognized_but_unsupported() {
        for code in [
            type_codes::STREAM_ITEM,
            type_codes::STREAM_INVOCATION,
            type_codes::CANCEL_INVOCATION,
        ] {
            let record = parse_record(format!(r#"{{"type":{code}}}"#).as_bytes()).unwrap();
            assert!(matches!(
                record,
                IncomingRecord::StreamingUnsupported { type_code } if type_code == code
            ));
        }
    }
}
