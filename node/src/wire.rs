//! The wire codec: an 8-byte ASCII decimal length header, space-padded,
//! followed by exactly that many bytes of UTF-8 JSON. A message is always
//! a single-key JSON object `{tag: payload}`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of the length header, in bytes.
pub const HEADER: usize = 8;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("length header was not a valid decimal integer")]
    BadLengthHeader,
    #[error("payload was not valid JSON")]
    BadJson(#[from] serde_json::Error),
    #[error("message must be a JSON object with exactly one key, got {0} keys")]
    NotSingleTag(usize),
}

/// Encodes `tag` and `payload` as a single-key object and writes it to
/// `stream` framed with an 8-byte length header.
pub async fn send_message<W, T>(stream: &mut W, tag: &str, payload: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut object = Map::new();
    object.insert(tag.to_string(), serde_json::to_value(payload)?);
    let body = serde_json::to_vec(&Value::Object(object))?;

    let header = format!("{:<width$}", body.len(), width = HEADER);
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads exactly one framed message from `stream`, returning the single
/// tag and its payload still as a [`Value`] (callers deserialize the
/// payload into the type their handler expects).
pub async fn recv_message<R>(stream: &mut R) -> Result<(String, Value), WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER];
    stream.read_exact(&mut header).await?;
    let header_str = std::str::from_utf8(&header).map_err(|_| WireError::BadLengthHeader)?;
    let length: usize = header_str
        .trim()
        .parse()
        .map_err(|_| WireError::BadLengthHeader)?;

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;

    let value: Value = serde_json::from_slice(&body)?;
    let object = match value {
        Value::Object(map) => map,
        _ => return Err(WireError::NotSingleTag(0)),
    };
    if object.len() != 1 {
        return Err(WireError::NotSingleTag(object.len()));
    }
    let (tag, payload) = object.into_iter().next().expect("checked len == 1");
    Ok((tag, payload))
}

/// Deserializes a message payload already extracted by [`recv_message`].
pub fn decode_payload<T: DeserializeOwned>(value: Value) -> Result<T, WireError> {
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[tokio::test]
    async fn round_trips_through_duplex_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let payload = Sample {
            a: 7,
            b: "hello".to_string(),
        };
        send_message(&mut client, "greet", &payload).await.unwrap();

        let (tag, value) = recv_message(&mut server).await.unwrap();
        assert_eq!(tag, "greet");
        let decoded: Sample = decode_payload(value).unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn header_is_exactly_eight_bytes() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        send_message(&mut client, "t", &serde_json::json!(1)).await.unwrap();

        let mut header = [0u8; HEADER];
        server.read_exact(&mut header).await.unwrap();
        let parsed: usize = std::str::from_utf8(&header).unwrap().trim().parse().unwrap();
        assert!(parsed > 0);
    }

    #[tokio::test]
    async fn rejects_multi_key_object() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let raw = serde_json::json!({"a": 1, "b": 2});
        let body = serde_json::to_vec(&raw).unwrap();
        let header = format!("{:<width$}", body.len(), width = HEADER);
        client.write_all(header.as_bytes()).await.unwrap();
        client.write_all(&body).await.unwrap();
        client.flush().await.unwrap();

        let result = recv_message(&mut server).await;
        assert!(matches!(result, Err(WireError::NotSingleTag(2))));
    }
}
