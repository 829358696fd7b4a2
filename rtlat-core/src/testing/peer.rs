//! Exchange-side protocol replies
//!
//! Answers requests the way the reference mock exchange does: every request
//! gets exactly one reply, carrying back the `client_id` and instrument it was
//! sent with, plus the extra fields a real exchange adds.

use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Default)]
pub struct ConformingPeer {
    account: Option<String>,
    reject_token: Option<String>,
    booked: u64,
    done: u64,
}

impl ConformingPeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer AUTHENTICATE for `token` with an ERROR
    pub fn rejecting(token: u32) -> Self {
        Self {
            reject_token: Some(token.to_string()),
            ..Self::default()
        }
    }

    pub fn booked(&self) -> u64 {
        self.booked
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    /// Replies to one inbound text frame; empty for anything it ignores
    pub fn respond(&mut self, text: &str) -> Vec<String> {
        let Ok(request) = serde_json::from_str::<Value>(text) else {
            return Vec::new();
        };
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let reply = match request["type"].as_str() {
            Some("AUTHENTICATE") => {
                let token = request["api_token"].as_str().unwrap_or_default().to_string();
                if self.reject_token.as_deref() == Some(token.as_str()) {
                    json!({"type": "ERROR", "error": "INVALID_API_TOKEN"})
                } else {
                    self.account = Some(token);
                    json!({"type": "AUTHENTICATED"})
                }
            }
            Some("SUBSCRIBE") => {
                let channels: Vec<Value> = request["channels"]
                    .as_array()
                    .map(|channels| {
                        channels
                            .iter()
                            .map(|c| json!({"account_id": self.account, "name": c["name"]}))
                            .collect()
                    })
                    .unwrap_or_default();
                json!({"type": "SUBSCRIPTIONS", "channels": channels, "time": time})
            }
            Some("CREATE_ORDER") => {
                self.booked += 1;
                let order = &request["order"];
                json!({
                    "type": "BOOKED",
                    "order_book_sequence": self.booked,
                    "side": order["side"],
                    "uid": self.account,
                    "amount": order["amount"],
                    "price": order["price"],
                    "instrument_code": order["instrument_code"],
                    "client_id": order["client_id"],
                    "order_id": uuid::Uuid::new_v4().to_string(),
                    "channel_name": "TRADING",
                    "time": time,
                })
            }
            Some("CANCEL_ORDER") => {
                self.done += 1;
                json!({
                    "type": "DONE",
                    "status": "CANCELLED",
                    "order_book_sequence": self.done,
                    "uid": self.account,
                    "instrument_code": request["instrument_code"],
                    "client_id": request["client_id"],
                    "order_id": uuid::Uuid::new_v4().to_string(),
                    "channel_name": "TRADING",
                    "time": time,
                })
            }
            _ => return Vec::new(),
        };
        vec![reply.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ApiToken, CorrelationId};
    use crate::protocol::{Codec, Message, Request};
    use std::sync::Arc;

    #[test]
    fn test_replies_decode() {
        let mut peer = ConformingPeer::new();
        let mut codec = Codec::new();

        let auth = codec
            .encode_request(&Request::Authenticate(ApiToken(3001)))
            .unwrap()
            .to_string();
        let reply = peer.respond(&auth);
        assert_eq!(Codec::decode(&reply[0]).unwrap(), Message::Authenticated);

        let id = CorrelationId::new_v4();
        let order = codec
            .encode_request(&Request::CreateOrder {
                client_id: id,
                instrument: Arc::from("BTC_EUR"),
            })
            .unwrap()
            .to_string();
        let reply = peer.respond(&order);
        match Codec::decode(&reply[0]).unwrap() {
            Message::Booked {
                client_id,
                instrument_code,
            } => {
                assert_eq!(client_id, id.to_string());
                assert_eq!(instrument_code.as_deref(), Some("BTC_EUR"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(peer.booked(), 1);
    }

    #[test]
    fn test_rejecting_peer() {
        let mut peer = ConformingPeer::rejecting(7);
        let reply = peer.respond(r#"{"type":"AUTHENTICATE","api_token":"7"}"#);
        assert!(matches!(Codec::decode(&reply[0]).unwrap(), Message::Error { .. }));
        let reply = peer.respond(r#"{"type":"AUTHENTICATE","api_token":"8"}"#);
        assert_eq!(Codec::decode(&reply[0]).unwrap(), Message::Authenticated);
    }

    #[test]
    fn test_ignores_garbage() {
        let mut peer = ConformingPeer::new();
        assert!(peer.respond("not json").is_empty());
        assert!(peer.respond(r#"{"type":"PING"}"#).is_empty());
    }
}
