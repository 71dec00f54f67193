//! Line-delimited stdio framing: newline-delimited JSON, one object per
//! line (spec §6.1.1).

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CoreError, CoreResult};

/// Large enough for any realistic single ELN page/entry payload, small
/// enough to bound memory against a misbehaving client.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

pub trait FrameReader: AsyncBufRead + Unpin + Send {}
impl<T: AsyncBufRead + Unpin + Send> FrameReader for T {}

pub trait FrameWriter: AsyncWrite + Unpin + Send {}
impl<T: AsyncWrite + Unpin + Send> FrameWriter for T {}

/// Read the next non-empty line from `reader`. Returns `Ok(None)` on EOF.
pub async fn read_frame<R: FrameReader>(reader: &mut R, buf: &mut String) -> CoreResult<Option<String>> {
    loop {
        buf.clear();
        let bytes_read = reader.read_line(buf).await?;
        if bytes_read == 0 {
            return Ok(None);
        }

        let trimmed = buf.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.len() > MAX_MESSAGE_SIZE {
            return Err(CoreError::InvalidParams(format!(
                "message exceeds maximum size of {MAX_MESSAGE_SIZE} bytes"
            )));
        }

        return Ok(Some(trimmed.to_string()));
    }
}

/// Write one frame terminated by a newline and flush, so the client sees it
/// immediately rather than buffered.
pub async fn write_frame<W: FrameWriter>(writer: &mut W, line: &str) -> CoreResult<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
