//! Line-delimited JSON framing for recorded notification streams.

use anyhow::{Context, Result};
use backend_api::BackendEvent;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Read the next event, skipping blank lines. `None` at end of input.
pub async fn read_event<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<BackendEvent>> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event = serde_json::from_str(trimmed)
            .with_context(|| format!("malformed event line: {trimmed}"))?;
        return Ok(Some(event));
    }
}

/// Write a value as a single JSON line and flush.
pub async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let s = serde_json::to_string(value)?;
    writer.write_all(s.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_api::{ChangeKind, ProfilePatch, ProfileRecord};
    use tokio::io::BufReader;

    #[tokio::test]
    async fn events_survive_a_write_read_cycle() {
        let event = BackendEvent::Profile {
            kind: ChangeKind::Update,
            record: ProfileRecord {
                id: "1".into(),
                fields: ProfilePatch::status("Busy"),
            },
        };
        let mut buf = Vec::new();
        write_line(&mut buf, &event).await.unwrap();
        buf.extend_from_slice(b"\n\n");
        let mut reader = BufReader::new(buf.as_slice());
        assert_eq!(read_event(&mut reader).await.unwrap(), Some(event));
        assert_eq!(read_event(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_is_an_error() {
        let mut reader = BufReader::new(&b"{not json}\n"[..]);
        assert!(read_event(&mut reader).await.is_err());
    }
}
