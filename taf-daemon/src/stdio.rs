//! JSON-lines framing between stdio and the engine.

use serde::Serialize;
use taf_engine::{Envelope, Outbound};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::DaemonError;

/// One stdout line: the envelope fields plus the topic it is addressed to.
#[derive(Serialize)]
struct OutboundLine<'a> {
    topic: &'a str,
    #[serde(flatten)]
    envelope: &'a Envelope,
}

/// Decodes one input line; blank lines yield `None`.
///
/// # Errors
/// Returns [`DaemonError::Json`] if the line is not an envelope.
pub fn decode_line(line: &str) -> Result<Option<Envelope>, DaemonError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Encodes an outbound envelope as a single line without the trailing
/// newline.
///
/// # Errors
/// Returns [`DaemonError::Json`] if the envelope cannot be serialized.
pub fn encode_outbound(outbound: &Outbound) -> Result<String, DaemonError> {
    let line = OutboundLine { topic: &outbound.topic, envelope: &outbound.envelope };
    Ok(serde_json::to_string(&line)?)
}

/// Forwards envelopes from `reader` to `sink` until EOF or until the
/// engine stops. Malformed lines are logged and skipped.
///
/// Returns the number of envelopes forwarded.
///
/// # Errors
/// Returns [`DaemonError::Io`] if reading fails.
pub async fn read_envelopes<R>(reader: R, sink: mpsc::Sender<Envelope>) -> Result<usize, DaemonError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    let mut line_no = 0_usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let envelope = match decode_line(&line) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "discarding input line");
                continue;
            }
        };
        tracing::debug!(message_type = %envelope.message_type, "inbound");
        if sink.send(envelope).await.is_err() {
            tracing::info!("engine stopped, no longer reading input");
            break;
        }
        forwarded += 1;
    }
    Ok(forwarded)
}

/// Writes every outbound envelope to `writer`, one line each, until all
/// transport handles are dropped.
///
/// Returns the number of lines written.
///
/// # Errors
/// Returns [`DaemonError::Io`] if writing fails.
pub async fn write_outbound<W>(mut rx: mpsc::Receiver<Outbound>, writer: &mut W) -> Result<usize, DaemonError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(outbound) = rx.recv().await {
        let mut line = match encode_outbound(&outbound) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(topic = %outbound.topic, error = %e, "dropping unencodable envelope");
                continue;
            }
        };
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}
