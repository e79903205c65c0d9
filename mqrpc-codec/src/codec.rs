use std::fmt;

use bytes::Bytes;
use serde_json::{Map, Value};

/// Turns domain payloads into transport payloads and back.
///
/// `decode` never fails: malformed input degrades to an empty value and the
/// message keeps flowing through classification.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, value: &Value) -> Bytes;

    fn decode(&self, data: &[u8]) -> Value;
}

/// JSON text codec, the default for every engine.
///
/// ```
/// use mqrpc_codec::{Codec, JsonCodec};
/// use serde_json::json;
///
/// let codec = JsonCodec;
/// let data = codec.encode(&json!({"a": 1}));
/// assert_eq!(codec.decode(&data), json!({"a": 1}));
/// assert_eq!(codec.decode(b"{not json"), json!({}));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    #[inline]
    fn encode(&self, value: &Value) -> Bytes {
        match serde_json::to_vec(value) {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                log::warn!("json encode error, {e}");
                Bytes::new()
            }
        }
    }

    #[inline]
    fn decode(&self, data: &[u8]) -> Value {
        serde_json::from_slice(data).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// A codec assembled from an encoder and a decoder function.
pub struct FnCodec<E, D> {
    encoder: E,
    decoder: D,
}

impl<E, D> FnCodec<E, D>
where
    E: Fn(&Value) -> Bytes + Send + Sync + 'static,
    D: Fn(&[u8]) -> Value + Send + Sync + 'static,
{
    #[inline]
    pub fn new(encoder: E, decoder: D) -> Self {
        Self { encoder, decoder }
    }
}

impl<E, D> Codec for FnCodec<E, D>
where
    E: Fn(&Value) -> Bytes + Send + Sync + 'static,
    D: Fn(&[u8]) -> Value + Send + Sync + 'static,
{
    #[inline]
    fn encode(&self, value: &Value) -> Bytes {
        (self.encoder)(value)
    }

    #[inline]
    fn decode(&self, data: &[u8]) -> Value {
        (self.decoder)(data)
    }
}

impl<E, D> fmt::Debug for FnCodec<E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnCodec")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let codec = JsonCodec;
        for v in [
            json!({"a": 1, "b": [true, null, "x"]}),
            json!([1, 2, {"c": 3.5}]),
            json!("text"),
            json!(42),
            json!(false),
            Value::Null,
        ] {
            assert_eq!(codec.decode(&codec.encode(&v)), v);
        }
    }

    #[test]
    fn test_json_decode_malformed() {
        let codec = JsonCodec;
        assert_eq!(codec.decode(b""), json!({}));
        assert_eq!(codec.decode(b"{\"a\":"), json!({}));
        assert_eq!(codec.decode(&[0xff, 0x00]), json!({}));
    }

    #[test]
    fn test_fn_codec() {
        let codec = FnCodec::new(
            |v: &Value| Bytes::from(v.to_string().to_uppercase()),
            |data: &[u8]| Value::String(String::from_utf8_lossy(data).into_owned()),
        );
        let data = codec.encode(&json!("abc"));
        assert_eq!(&data[..], b"\"ABC\"");
        assert_eq!(codec.decode(b"raw"), json!("raw"));
    }
}
