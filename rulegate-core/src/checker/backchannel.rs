//! Byte channel carrying a helper runner's result back to the scheduler.
//!
//! Both ends are created before the runner is spawned. The runner writes a
//! single frame (big-endian `u32` length followed by an rkyv archive of the
//! response lines) and closes its end; the scheduler reads to end-of-stream
//! once the runner has finished.

use rkyv::rancor::Error as RkyvError;
use rkyv::string::ArchivedString;
use rkyv::util::AlignedVec;
use rkyv::{from_bytes, to_bytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::warn;

use crate::error::{CheckerError, Result};

/// Capacity of the channel. A full frame always fits, so the writer never
/// waits on the reader.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

const LENGTH_PREFIX_BYTES: usize = 4;
// Budget for the archived lines, each charged its bytes plus its entry in
// the archived vector. The rest of the frame covers the vector header.
const MAX_LINE_BYTES: usize = MAX_FRAME_BYTES / 2;
const LINE_OVERHEAD_BYTES: usize = std::mem::size_of::<ArchivedString>();

/// Create both ends of a backchannel.
pub fn channel() -> (BackchannelReader, BackchannelWriter) {
    let (reader, writer) = tokio::io::duplex(MAX_FRAME_BYTES);
    (
        BackchannelReader { stream: reader },
        BackchannelWriter { stream: writer },
    )
}

/// Runner side. Consumed by [`BackchannelWriter::send`].
#[derive(Debug)]
pub struct BackchannelWriter {
    stream: DuplexStream,
}

impl BackchannelWriter {
    pub async fn send(mut self, lines: &[String]) -> Result<()> {
        let lines = truncate_lines(lines);
        let archive = to_bytes::<RkyvError>(&lines)
            .map_err(|err| CheckerError::Backchannel(format!("encode failed: {err}")))?;

        if archive.len() + LENGTH_PREFIX_BYTES > MAX_FRAME_BYTES {
            return Err(CheckerError::Backchannel(format!(
                "frame of {} bytes exceeds channel capacity",
                archive.len()
            )));
        }

        self.stream.write_u32(archive.len() as u32).await?;
        self.stream.write_all(&archive).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Scheduler side.
#[derive(Debug)]
pub struct BackchannelReader {
    stream: DuplexStream,
}

impl BackchannelReader {
    /// Read the runner's frame. Zero bytes means the runner never reported.
    pub async fn receive(mut self) -> Result<Vec<String>> {
        let mut raw = Vec::new();
        self.stream.read_to_end(&mut raw).await?;
        decode_frame(&raw)
    }
}

fn decode_frame(raw: &[u8]) -> Result<Vec<String>> {
    if raw.is_empty() {
        return Err(CheckerError::Backchannel("read zero bytes".into()));
    }
    let Some((prefix, payload)) = raw.split_first_chunk::<LENGTH_PREFIX_BYTES>() else {
        return Err(CheckerError::Decode(format!(
            "short frame of {} bytes",
            raw.len()
        )));
    };

    let declared = u32::from_be_bytes(*prefix) as usize;
    if declared != payload.len() {
        return Err(CheckerError::Decode(format!(
            "frame declares {declared} bytes but carries {}",
            payload.len()
        )));
    }

    let mut aligned: AlignedVec = AlignedVec::with_capacity(payload.len());
    aligned.extend_from_slice(payload);
    from_bytes::<Vec<String>, RkyvError>(&aligned)
        .map_err(|err| CheckerError::Decode(err.to_string()))
}

fn truncate_lines(lines: &[String]) -> Vec<String> {
    let mut budget = MAX_LINE_BYTES;
    let mut kept = Vec::with_capacity(lines.len());
    for line in lines {
        let cost = line.len() + LINE_OVERHEAD_BYTES;
        if cost > budget {
            warn!(
                target: "scan::checker",
                dropped = lines.len() - kept.len(),
                "helper output exceeds backchannel budget, truncating"
            );
            break;
        }
        budget -= cost;
        kept.push(line.clone());
    }
    kept
}
