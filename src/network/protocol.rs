use crate::{ReplayError, ReplayResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Frames larger than this are rejected instead of allocated.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Request {
    Authenticate(AuthenticateRequest),
    ListTopics,
    Produce(ProduceRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthenticateRequest {
    pub mechanism: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProduceRequest {
    pub topic: String,
    pub partition: u32,
    pub record: ProduceRecord,
}

/// A record as it travels to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProduceRecord {
    pub id: Uuid,
    pub topic: String,
    pub partition: u32,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub headers: HashMap<String, String>,
}

impl ProduceRecord {
    pub fn new(topic: String, partition: u32, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            partition,
            key: None,
            payload,
            timestamp: Utc::now(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Response {
    AuthenticateSuccess,
    ListTopicsSuccess { topics: Vec<String> },
    ProduceSuccess { offset: u64 },
    Error { message: String },
}

pub fn encode<T: Serialize>(value: &T) -> ReplayResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Writes one length-prefixed frame (big-endian u32 length, then payload).
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> ReplayResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            ReplayError::Protocol(format!("frame of {} bytes is too large", payload.len()))
        })?;

    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> ReplayResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(ReplayError::Protocol(format!(
            "incoming frame of {} bytes exceeds limit",
            len
        )));
    }

    let mut buffer = vec![0; len as usize];
    reader.read_exact(&mut buffer).await?;
    Ok(buffer)
}

pub async fn write_request<W>(writer: &mut W, request: &Request) -> ReplayResult<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &encode(request)?).await
}

pub async fn read_request<R>(reader: &mut R) -> ReplayResult<Request>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader).await?;
    Ok(bincode::deserialize(&frame)?)
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> ReplayResult<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &encode(response)?).await
}

pub async fn read_response<R>(reader: &mut R) -> ReplayResult<Response>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader).await?;
    Ok(bincode::deserialize(&frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let record = ProduceRecord::new("logs".to_string(), 0, b"{\"a\":1}".to_vec());
        let request = Request::Produce(ProduceRequest {
            topic: "logs".to_string(),
            partition: 0,
            record,
        });

        write_request(&mut client, &request).await.unwrap();
        assert_eq!(read_request(&mut server).await.unwrap(), request);

        write_response(&mut server, &Response::ProduceSuccess { offset: 7 })
            .await
            .unwrap();
        assert_eq!(
            read_response(&mut client).await.unwrap(),
            Response::ProduceSuccess { offset: 7 }
        );
    }

    #[tokio::test]
    async fn test_oversized_incoming_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(MAX_FRAME_LEN + 1).await.unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(ReplayError::Protocol(_))
        ));
    }
}
