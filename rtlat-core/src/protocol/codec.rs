//! Text codec for the exchange protocol
//!
//! Encoding renders into a buffer owned by the codec, so a session that keeps
//! one `Codec` for its lifetime stops allocating once the buffer has grown to
//! the largest message (an order, a few hundred bytes). Correlation ids are
//! formatted into a stack buffer.
//!
//! Decoding borrows strings from the inbound frame and classifies by the `type`
//! field first. Unknown types decode to [`Message::Unknown`] whatever else the
//! frame carries; only malformed JSON and known types with a missing or
//! mistyped field are errors.

use super::message::{
    Message, Request, ORDER_AMOUNT, ORDER_PRICE, ORDER_SIDE, ORDER_TYPE, ORDERS_CHANNEL,
    TIME_IN_FORCE,
};
use crate::core::{ProtocolError, SerializationError};
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;

/// Length of a hyphenated UUID
pub const UUID_TEXT_LEN: usize = 36;

const INITIAL_BUFFER_CAPACITY: usize = 512;

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WireOut<'m> {
    Authenticate {
        #[serde(serialize_with = "token_as_str")]
        api_token: u32,
    },
    Subscribe {
        channels: [ChannelName<'m>; 1],
    },
    CreateOrder {
        order: OrderBody<'m>,
    },
    CancelOrder {
        client_id: &'m str,
        instrument_code: &'m str,
    },
    Authenticated,
    Subscriptions,
    Booked {
        client_id: &'m str,
        #[serde(skip_serializing_if = "Option::is_none")]
        instrument_code: Option<&'m str>,
    },
    Done {
        client_id: &'m str,
    },
    Error {
        error: &'m str,
    },
}

#[derive(Serialize)]
struct ChannelName<'m> {
    name: &'m str,
}

#[derive(Serialize)]
struct OrderBody<'m> {
    instrument_code: &'m str,
    client_id: &'m str,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    price: &'static str,
    amount: &'static str,
    time_in_force: &'static str,
}

impl<'m> OrderBody<'m> {
    fn buy(instrument_code: &'m str, client_id: &'m str) -> Self {
        Self {
            instrument_code,
            client_id,
            side: ORDER_SIDE,
            order_type: ORDER_TYPE,
            price: ORDER_PRICE,
            amount: ORDER_AMOUNT,
            time_in_force: TIME_IN_FORCE,
        }
    }
}

/// The token travels as a JSON string
fn token_as_str<S: Serializer>(token: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(token)
}

/// A string borrowed from the frame unless it contains escapes
///
/// serde only borrows a `Cow` that is the field type itself, so optional
/// fields go through this newtype.
#[derive(Deserialize)]
struct Text<'a>(#[serde(borrow)] Cow<'a, str>);

/// Just the discriminator; every other field is skipped unread
#[derive(Deserialize)]
struct Header<'a> {
    #[serde(rename = "type", borrow)]
    kind: Cow<'a, str>,
}

/// Types with a payload shape this codec knows
const KNOWN_KINDS: [&str; 9] = [
    "BOOKED",
    "DONE",
    "AUTHENTICATED",
    "SUBSCRIPTIONS",
    "ERROR",
    "AUTHENTICATE",
    "SUBSCRIBE",
    "CREATE_ORDER",
    "CANCEL_ORDER",
];

/// Every field a known inbound message may carry; the rest are ignored
#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "type", borrow)]
    kind: Cow<'a, str>,
    #[serde(default, borrow)]
    client_id: Option<Text<'a>>,
    #[serde(default, borrow)]
    instrument_code: Option<Text<'a>>,
    #[serde(default, borrow)]
    api_token: Option<Text<'a>>,
    #[serde(default, borrow)]
    order: Option<OrderEnvelope<'a>>,
    #[serde(default, borrow)]
    error: Option<Text<'a>>,
}

#[derive(Deserialize)]
struct OrderEnvelope<'a> {
    #[serde(default, borrow)]
    client_id: Option<Text<'a>>,
    #[serde(default, borrow)]
    instrument_code: Option<Text<'a>>,
}

// ============================================================================
// Codec
// ============================================================================

#[derive(Debug)]
pub struct Codec {
    buf: Vec<u8>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Current capacity of the reusable output buffer
    pub fn buffer_capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Render a session request
    ///
    /// The returned text borrows the codec buffer and is valid until the next
    /// encode call.
    pub fn encode_request(&mut self, request: &Request) -> Result<&str, SerializationError> {
        let mut id_buf = [0u8; UUID_TEXT_LEN];
        match request {
            Request::Authenticate(token) => self.write(
                &WireOut::Authenticate {
                    api_token: token.get(),
                },
                "AUTHENTICATE",
            ),
            Request::Subscribe => self.write(
                &WireOut::Subscribe {
                    channels: [ChannelName { name: ORDERS_CHANNEL }],
                },
                "SUBSCRIBE",
            ),
            Request::CreateOrder {
                client_id,
                instrument,
            } => {
                let id = client_id.hyphenated().encode_lower(&mut id_buf);
                self.write(
                    &WireOut::CreateOrder {
                        order: OrderBody::buy(instrument, id),
                    },
                    "CREATE_ORDER",
                )
            }
            Request::CancelOrder {
                client_id,
                instrument,
            } => {
                let id = client_id.hyphenated().encode_lower(&mut id_buf);
                self.write(
                    &WireOut::CancelOrder {
                        client_id: id,
                        instrument_code: instrument,
                    },
                    "CANCEL_ORDER",
                )
            }
        }
    }

    /// Render any message with a wire form (everything but `Unknown`)
    pub fn encode(&mut self, message: &Message<'_>) -> Result<&str, SerializationError> {
        let wire = match message {
            Message::Authenticate { api_token } => WireOut::Authenticate {
                api_token: *api_token,
            },
            Message::Subscribe => WireOut::Subscribe {
                channels: [ChannelName { name: ORDERS_CHANNEL }],
            },
            Message::CreateOrder {
                client_id,
                instrument_code,
            } => WireOut::CreateOrder {
                order: OrderBody::buy(instrument_code, client_id),
            },
            Message::CancelOrder {
                client_id,
                instrument_code,
            } => WireOut::CancelOrder {
                client_id,
                instrument_code,
            },
            Message::Authenticated => WireOut::Authenticated,
            Message::Subscriptions => WireOut::Subscriptions,
            Message::Booked {
                client_id,
                instrument_code,
            } => WireOut::Booked {
                client_id,
                instrument_code: instrument_code.as_deref(),
            },
            Message::Done { client_id } => WireOut::Done { client_id },
            Message::Error { detail } => WireOut::Error { error: detail },
            Message::Unknown { .. } => return Err(SerializationError::Unencodable("Unknown")),
        };
        let kind = static_kind(message);
        self.write(&wire, kind)
    }

    /// Classify an inbound text frame
    pub fn decode(text: &str) -> Result<Message<'_>, ProtocolError> {
        let header: Header<'_> = serde_json::from_str(text)?;
        if !KNOWN_KINDS.contains(&header.kind.as_ref()) {
            return Ok(Message::Unknown { kind: header.kind });
        }
        let envelope: Envelope<'_> = serde_json::from_str(text)?;
        classify(envelope)
    }

    /// Classify an inbound frame given as raw bytes
    pub fn decode_bytes(bytes: &[u8]) -> Result<Message<'_>, ProtocolError> {
        let header: Header<'_> = serde_json::from_slice(bytes)?;
        if !KNOWN_KINDS.contains(&header.kind.as_ref()) {
            return Ok(Message::Unknown { kind: header.kind });
        }
        let envelope: Envelope<'_> = serde_json::from_slice(bytes)?;
        classify(envelope)
    }

    fn write(
        &mut self,
        wire: &WireOut<'_>,
        kind: &'static str,
    ) -> Result<&str, SerializationError> {
        self.buf.clear();
        serde_json::to_writer(&mut self.buf, wire)
            .map_err(|source| SerializationError::Json { kind, source })?;
        std::str::from_utf8(&self.buf).map_err(|_| SerializationError::InvalidUtf8(kind))
    }
}

fn static_kind(message: &Message<'_>) -> &'static str {
    match message {
        Message::Authenticate { .. } => "AUTHENTICATE",
        Message::Subscribe => "SUBSCRIBE",
        Message::CreateOrder { .. } => "CREATE_ORDER",
        Message::CancelOrder { .. } => "CANCEL_ORDER",
        Message::Authenticated => "AUTHENTICATED",
        Message::Subscriptions => "SUBSCRIPTIONS",
        Message::Booked { .. } => "BOOKED",
        Message::Done { .. } => "DONE",
        Message::Error { .. } => "ERROR",
        Message::Unknown { .. } => "UNKNOWN",
    }
}

fn classify(envelope: Envelope<'_>) -> Result<Message<'_>, ProtocolError> {
    let Envelope {
        kind,
        client_id,
        instrument_code,
        api_token,
        order,
        error,
    } = envelope;
    let client_id = client_id.map(|t| t.0);
    let instrument_code = instrument_code.map(|t| t.0);
    let api_token = api_token.map(|t| t.0);
    let error = error.map(|t| t.0);

    let message = match kind.as_ref() {
        "BOOKED" => Message::Booked {
            client_id: client_id.ok_or(ProtocolError::MissingField {
                kind: "BOOKED",
                field: "client_id",
            })?,
            instrument_code,
        },
        "DONE" => Message::Done {
            client_id: client_id.ok_or(ProtocolError::MissingField {
                kind: "DONE",
                field: "client_id",
            })?,
        },
        "AUTHENTICATED" => Message::Authenticated,
        "SUBSCRIPTIONS" => Message::Subscriptions,
        "ERROR" => Message::Error {
            detail: error.unwrap_or(Cow::Borrowed("")),
        },
        "AUTHENTICATE" => {
            let raw = api_token.ok_or(ProtocolError::MissingField {
                kind: "AUTHENTICATE",
                field: "api_token",
            })?;
            let api_token = raw.parse::<u32>().map_err(|e| ProtocolError::Malformed {
                reason: format!("api_token '{}': {}", raw, e),
            })?;
            Message::Authenticate { api_token }
        }
        "SUBSCRIBE" => Message::Subscribe,
        "CREATE_ORDER" => {
            let order = order.ok_or(ProtocolError::MissingField {
                kind: "CREATE_ORDER",
                field: "order",
            })?;
            Message::CreateOrder {
                client_id: order
                    .client_id
                    .map(|t| t.0)
                    .ok_or(ProtocolError::MissingField {
                        kind: "CREATE_ORDER",
                        field: "order.client_id",
                    })?,
                instrument_code: order.instrument_code.map(|t| t.0).ok_or(
                    ProtocolError::MissingField {
                        kind: "CREATE_ORDER",
                        field: "order.instrument_code",
                    },
                )?,
            }
        }
        "CANCEL_ORDER" => Message::CancelOrder {
            client_id: client_id.ok_or(ProtocolError::MissingField {
                kind: "CANCEL_ORDER",
                field: "client_id",
            })?,
            instrument_code: instrument_code.ok_or(ProtocolError::MissingField {
                kind: "CANCEL_ORDER",
                field: "instrument_code",
            })?,
        },
        _ => Message::Unknown { kind },
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ApiToken, CorrelationId};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn order_id() -> CorrelationId {
        CorrelationId::parse_str("7f1d8f4e-3c2b-4a59-9e0d-1b2c3d4e5f60").unwrap()
    }

    #[test]
    fn test_encode_authenticate() {
        let mut codec = Codec::new();
        let text = codec.encode_request(&Request::Authenticate(ApiToken(3001))).unwrap();
        assert_eq!(text, r#"{"type":"AUTHENTICATE","api_token":"3001"}"#);
    }

    #[test]
    fn test_encode_subscribe() {
        let mut codec = Codec::new();
        let text = codec.encode_request(&Request::Subscribe).unwrap();
        assert_eq!(text, r#"{"type":"SUBSCRIBE","channels":[{"name":"ORDERS"}]}"#);
    }

    #[test]
    fn test_encode_create_order() {
        let mut codec = Codec::new();
        let request = Request::CreateOrder {
            client_id: order_id(),
            instrument: Arc::from("BTC_EUR"),
        };
        let text = codec.encode_request(&request).unwrap();
        assert_eq!(
            text,
            concat!(
                r#"{"type":"CREATE_ORDER","order":{"instrument_code":"BTC_EUR","#,
                r#""client_id":"7f1d8f4e-3c2b-4a59-9e0d-1b2c3d4e5f60","side":"BUY","#,
                r#""type":"LIMIT","price":"1","amount":"1","time_in_force":"GOOD_TILL_CANCELLED"}}"#
            )
        );
    }

    #[test]
    fn test_encode_cancel_order() {
        let mut codec = Codec::new();
        let request = Request::CancelOrder {
            client_id: order_id(),
            instrument: Arc::from("BTC_USDT"),
        };
        let text = codec.encode_request(&request).unwrap();
        assert_eq!(
            text,
            r#"{"type":"CANCEL_ORDER","client_id":"7f1d8f4e-3c2b-4a59-9e0d-1b2c3d4e5f60","instrument_code":"BTC_USDT"}"#
        );
    }

    #[test]
    fn test_request_and_message_encodings_agree() {
        let mut codec = Codec::new();
        let request = Request::CreateOrder {
            client_id: order_id(),
            instrument: Arc::from("BTC_CHF"),
        };
        let from_request = codec.encode_request(&request).unwrap().to_string();
        let id = order_id().to_string();
        let message = Message::CreateOrder {
            client_id: Cow::Borrowed(&id),
            instrument_code: Cow::Borrowed("BTC_CHF"),
        };
        assert_eq!(codec.encode(&message).unwrap(), from_request);
    }

    #[test]
    fn test_encode_server_messages() {
        let mut codec = Codec::new();
        assert_eq!(codec.encode(&Message::Authenticated).unwrap(), r#"{"type":"AUTHENTICATED"}"#);
        assert_eq!(
            codec
                .encode(&Message::Booked {
                    client_id: Cow::Borrowed("abc"),
                    instrument_code: Some(Cow::Borrowed("BTC_EUR")),
                })
                .unwrap(),
            r#"{"type":"BOOKED","client_id":"abc","instrument_code":"BTC_EUR"}"#
        );
        assert_eq!(
            codec
                .encode(&Message::Done {
                    client_id: Cow::Borrowed("abc")
                })
                .unwrap(),
            r#"{"type":"DONE","client_id":"abc"}"#
        );
    }

    #[test]
    fn test_encode_unknown_fails() {
        let mut codec = Codec::new();
        let err = codec
            .encode(&Message::Unknown {
                kind: Cow::Borrowed("TICKER"),
            })
            .unwrap_err();
        assert!(matches!(err, SerializationError::Unencodable(_)));
    }

    #[test]
    fn test_buffer_reused() {
        let mut codec = Codec::new();
        let request = Request::CreateOrder {
            client_id: order_id(),
            instrument: Arc::from("BTC_USDC"),
        };
        codec.encode_request(&request).unwrap();
        let capacity = codec.buffer_capacity();
        for _ in 0..1000 {
            codec.encode_request(&request).unwrap();
        }
        assert_eq!(codec.buffer_capacity(), capacity);
    }

    #[test]
    fn test_decode_booked_from_exchange() {
        let text = r#"{"type":"BOOKED","order_book_sequence":-42,"side":"BUY","uid":"3001",
            "amount":"1","price":"1","instrument_code":"BTC_EUR",
            "client_id":"7f1d8f4e-3c2b-4a59-9e0d-1b2c3d4e5f60",
            "order_id":"0b7e","channel_name":"TRADING","time":1700000000000}"#;
        match Codec::decode(text).unwrap() {
            Message::Booked {
                client_id,
                instrument_code,
            } => {
                assert_eq!(client_id, "7f1d8f4e-3c2b-4a59-9e0d-1b2c3d4e5f60");
                assert!(matches!(client_id, Cow::Borrowed(_)));
                assert_eq!(instrument_code.as_deref(), Some("BTC_EUR"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_done_and_control() {
        assert_eq!(
            Codec::decode(r#"{"type":"DONE","status":"CANCELLED","client_id":"x"}"#).unwrap(),
            Message::Done {
                client_id: Cow::Borrowed("x")
            }
        );
        assert_eq!(Codec::decode(r#"{"type":"AUTHENTICATED"}"#).unwrap(), Message::Authenticated);
        assert_eq!(
            Codec::decode(
                r#"{"type":"SUBSCRIPTIONS","channels":[{"name":"ORDERS","account_id":"1"}],"time":1}"#
            )
            .unwrap(),
            Message::Subscriptions
        );
        assert_eq!(
            Codec::decode(r#"{"type":"ERROR","error":"INVALID_API_TOKEN"}"#).unwrap(),
            Message::Error {
                detail: Cow::Borrowed("INVALID_API_TOKEN")
            }
        );
    }

    #[test]
    fn test_decode_client_messages() {
        assert_eq!(
            Codec::decode(r#"{"type":"AUTHENTICATE","api_token":"3001"}"#).unwrap(),
            Message::Authenticate { api_token: 3001 }
        );
        let order = Codec::decode(
            r#"{"type":"CREATE_ORDER","order":{"instrument_code":"BTC_EUR","client_id":"c1","side":"BUY"}}"#,
        )
        .unwrap();
        assert_eq!(
            order,
            Message::CreateOrder {
                client_id: Cow::Borrowed("c1"),
                instrument_code: Cow::Borrowed("BTC_EUR"),
            }
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        let message = Codec::decode(r#"{"type":"TICKER","price":"1"}"#).unwrap();
        assert_eq!(message.kind(), "TICKER");
        assert!(matches!(message, Message::Unknown { .. }));
    }

    #[test]
    fn test_decode_unknown_type_ignores_foreign_fields() {
        let frames = [
            r#"{"type":"HEARTBEAT","error":{"code":7},"api_token":3001}"#,
            r#"{"type":"ORDER_UPDATE","order":"filled","client_id":42}"#,
            r#"{"type":"TRADE","instrument_code":["BTC","EUR"]}"#,
        ];
        for frame in frames {
            let message = Codec::decode(frame).unwrap();
            assert!(matches!(message, Message::Unknown { .. }), "{}", frame);
            assert!(matches!(
                Codec::decode_bytes(frame.as_bytes()).unwrap(),
                Message::Unknown { .. }
            ));
        }
        assert_eq!(
            Codec::decode(frames[0]).unwrap(),
            Message::Unknown {
                kind: Cow::Borrowed("HEARTBEAT")
            }
        );
    }

    #[test]
    fn test_decode_known_type_with_mistyped_field() {
        assert!(matches!(
            Codec::decode(r#"{"type":"DONE","client_id":42}"#).unwrap_err(),
            ProtocolError::Malformed { .. }
        ));
    }

    #[test]
    fn test_decode_missing_field() {
        let err = Codec::decode(r#"{"type":"BOOKED"}"#).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::MissingField {
                kind: "BOOKED",
                field: "client_id"
            }
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            Codec::decode("not json").unwrap_err(),
            ProtocolError::Malformed { .. }
        ));
        assert!(matches!(
            Codec::decode(r#"{"client_id":"x"}"#).unwrap_err(),
            ProtocolError::Malformed { .. }
        ));
        assert!(matches!(
            Codec::decode(r#"{"type":"AUTHENTICATE","api_token":"abc"}"#).unwrap_err(),
            ProtocolError::Malformed { .. }
        ));
    }

    #[test]
    fn test_decode_escaped_strings_are_owned() {
        let message = Codec::decode(r#"{"type":"DONE","client_id":"a\"b"}"#).unwrap();
        match message {
            Message::Done { client_id } => {
                assert_eq!(client_id, "a\"b");
                assert!(matches!(client_id, Cow::Owned(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_bytes() {
        let bytes = br#"{"type":"DONE","client_id":"x"}"#;
        assert_eq!(
            Codec::decode_bytes(bytes).unwrap(),
            Message::Done {
                client_id: Cow::Borrowed("x")
            }
        );
    }

    #[test]
    fn test_decode_never_panics() {
        proptest!(|(text in ".{0,128}")| {
            let _ = Codec::decode(&text);
        });
    }
}
