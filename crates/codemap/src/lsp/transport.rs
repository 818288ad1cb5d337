//! JSON-RPC framing over a child process's stdio.
//!
//! Frames are `Content-Length: N\r\n\r\n<N bytes of UTF-8 JSON>`. The writer
//! serializes one message at a time; callers hold the per-client write lock.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{IndexError, Result};

/// Serialize `msg` and write one framed message.
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(msg)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next framed message body.
///
/// Headers other than `Content-Length` are ignored. A missing or malformed
/// `Content-Length` header is a protocol violation; EOF mid-frame surfaces
/// as an I/O error.
pub async fn read_message<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "language server closed its stdout",
            )));
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            let parsed = value.trim().parse::<usize>().map_err(|_| {
                IndexError::Protocol(format!("invalid Content-Length header: {value:?}"))
            })?;
            content_length = Some(parsed);
        }
    }

    let len = content_length
        .ok_or_else(|| IndexError::Protocol("frame missing Content-Length header".to_string()))?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let mut buf = Vec::new();
        let msg = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        write_message(&mut buf, &msg).await.unwrap();

        let mut reader = std::io::Cursor::new(buf);
        let body = read_message(&mut reader).await.unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded["method"], "initialize");
        assert_eq!(decoded["id"], 1);
    }

    #[tokio::test]
    async fn test_read_ignores_extra_headers() {
        let body = br#"{"jsonrpc":"2.0","id":7,"result":null}"#;
        let frame = format!(
            "Content-Length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n",
            body.len()
        );
        let mut data = frame.into_bytes();
        data.extend_from_slice(body);

        let mut reader = std::io::Cursor::new(data);
        let got = read_message(&mut reader).await.unwrap();
        assert_eq!(got, body);
    }

    #[tokio::test]
    async fn test_read_missing_content_length_is_protocol_error() {
        let mut reader = std::io::Cursor::new(b"Content-Type: text/plain\r\n\r\n".to_vec());
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, IndexError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_eof_is_io_error() {
        let mut reader = std::io::Cursor::new(Vec::new());
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));
    }

    #[tokio::test]
    async fn test_read_two_consecutive_frames() {
        let mut buf = Vec::new();
        write_message(&mut buf, &json!({"id": 1})).await.unwrap();
        write_message(&mut buf, &json!({"id": 2})).await.unwrap();

        let mut reader = std::io::Cursor::new(buf);
        let first: serde_json::Value =
            serde_json::from_slice(&read_message(&mut reader).await.unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_slice(&read_message(&mut reader).await.unwrap()).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(second["id"], 2);
    }
}
