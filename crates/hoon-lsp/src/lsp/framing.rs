//! LSP base protocol framing.
//!
//! Each message is a header block followed by a JSON body:
//!
//! ```text
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of UTF-8 JSON>
//! ```
//!
//! `Content-Type` and any other headers are accepted and ignored.

use crate::error::{BridgeError, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CONTENT_LENGTH: &str = "content-length";

/// Read one framed message body.
///
/// Returns `None` on clean EOF before a header block starts.
pub async fn read_message<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Vec<u8>>> {
    let mut content_length = None;
    let mut line = String::new();
    let mut in_headers = false;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            if in_headers {
                return Err(BridgeError::Protocol {
                    message: "EOF inside message header".to_string(),
                });
            }
            return Ok(None);
        }

        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            if !in_headers {
                // Stray blank line between messages.
                continue;
            }
            break;
        }
        in_headers = true;

        let Some((name, value)) = header.split_once(':') else {
            return Err(BridgeError::Protocol {
                message: format!("Malformed header line: {:?}", header),
            });
        };
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let length = value.trim().parse::<usize>().map_err(|_| BridgeError::Protocol {
                message: format!("Invalid Content-Length: {:?}", value.trim()),
            })?;
            content_length = Some(length);
        }
    }

    let length = content_length.ok_or_else(|| BridgeError::Protocol {
        message: "Message without Content-Length".to_string(),
    })?;
    if length > max_size {
        return Err(BridgeError::MessageTooLarge {
            size: length,
            limit: max_size,
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one framed message body and flush.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    const LIMIT: usize = 1024;

    #[tokio::test]
    async fn test_read_two_messages() {
        let input = b"Content-Length: 2\r\n\r\n{}Content-Length: 4\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\nnull";
        let mut reader = BufReader::new(&input[..]);

        assert_eq!(
            read_message(&mut reader, LIMIT).await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert_eq!(
            read_message(&mut reader, LIMIT).await.unwrap(),
            Some(b"null".to_vec())
        );
        assert_eq!(read_message(&mut reader, LIMIT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_header_name_is_case_insensitive() {
        let input = b"content-length: 2\n\n[]";
        let mut reader = BufReader::new(&input[..]);
        assert_eq!(
            read_message(&mut reader, LIMIT).await.unwrap(),
            Some(b"[]".to_vec())
        );
    }

    #[tokio::test]
    async fn test_body_length_counts_bytes() {
        let body = "{\"text\":\"~zod ≠ ~nec\"}";
        let mut framed = Vec::new();
        write_message(&mut framed, body.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(&framed[..]);
        let read = read_message(&mut reader, LIMIT).await.unwrap().unwrap();
        assert_eq!(String::from_utf8(read).unwrap(), body);
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let input = b"Content-Type: text/plain\r\n\r\n{}";
        let mut reader = BufReader::new(&input[..]);
        let result = read_message(&mut reader, LIMIT).await;
        assert!(matches!(result, Err(BridgeError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_oversized_message() {
        let input = b"Content-Length: 4096\r\n\r\n";
        let mut reader = BufReader::new(&input[..]);
        let result = read_message(&mut reader, LIMIT).await;
        assert!(matches!(
            result,
            Err(BridgeError::MessageTooLarge { size: 4096, .. })
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_headers() {
        let input = b"Content-Length: 2\r\n";
        let mut reader = BufReader::new(&input[..]);
        let result = read_message(&mut reader, LIMIT).await;
        assert!(matches!(result, Err(BridgeError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_write_message_header() {
        let mut out = Vec::new();
        write_message(&mut out, b"{\"a\":1}").await.unwrap();
        assert_eq!(out, b"Content-Length: 7\r\n\r\n{\"a\":1}".to_vec());
    }
}
