//! Newline-delimited framing over a byte stream.
//!
//! Reads never assume a `recv` boundary lines up with a message: a frame is
//! complete only once its `\n` has arrived.

use anyhow::{bail, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use swarm_kernel::{ProtocolError, MAX_LINE_BYTES};

/// Read one line.
///
/// Returns `None` when the peer closed the stream, including mid-line.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader
        .take(MAX_LINE_BYTES as u64)
        .read_line(&mut line)
        .await?;

    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        if line.len() >= MAX_LINE_BYTES {
            bail!(ProtocolError::TooLong {
                limit: MAX_LINE_BYTES
            });
        }
        // EOF in the middle of a frame
        return Ok(None);
    }
    Ok(Some(line))
}

/// Write one already-terminated line and flush it.
pub async fn write_frame<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug_assert!(line.ends_with('\n'));
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reads_lines_across_split_writes() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = BufReader::new(server);
        let (_, mut writer) = tokio::io::split(client);

        let write = tokio::spawn(async move {
            writer.write_all(b"WORKER_UP").await.unwrap();
            tokio::task::yield_now().await;
            writer.write_all(b"DATE id:1 steps:2 reward:3\nACK\n").await.unwrap();
        });

        assert_eq!(
            read_frame(&mut reader).await.unwrap().as_deref(),
            Some("WORKER_UPDATE id:1 steps:2 reward:3\n")
        );
        assert_eq!(read_frame(&mut reader).await.unwrap().as_deref(), Some("ACK\n"));
        write.await.unwrap();
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_partial_line_at_eof_is_close() {
        let mut reader = BufReader::new(&b"WORKER_UPDATE id:1"[..]);
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversize_line_is_error() {
        let data = vec![b'x'; MAX_LINE_BYTES + 10];
        let mut reader = BufReader::new(&data[..]);
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_write_frame_flushes_line() {
        let mut out = Vec::new();
        write_frame(&mut out, "ACK\n").await.unwrap();
        assert_eq!(out, b"ACK\n");
    }
}
