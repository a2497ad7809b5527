//! Wire codecs.
//!
//! The sentinel codec carries content and control in one character stream:
//! every message is followed by [`SEPARATOR`], and a segment that equals a
//! reserved sentinel is a phase marker rather than content. During the
//! build phase the model reply is over, so segments there are JSON
//! [`BuildInfo`] payloads.
//!
//! The JSON-lines codec frames one tagged [`StreamMessage`] object per line.

use log::debug;

use super::{
    message::{BuildInfo, StreamMessage},
    state::{Phase, PlanStreamState},
};
use crate::error::{PlanError, Result};

pub const SEPARATOR: &str = "@@PX@@";
pub const SENTINEL_FINISHED: &str = "@@PXEND@@";
pub const SENTINEL_DESCRIBE: &str = "@@PXDESC@@";
pub const SENTINEL_BUILD: &str = "@@PXBUILD@@";
pub const SENTINEL_ABORT: &str = "@@PXABORT@@";
/// Prefix of an error terminal; the error text follows it.
pub const SENTINEL_ERROR: &str = "@@PXERROR@@";

/// Encoding used on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Sentinel,
    JsonLines,
}

impl WireFormat {
    /// Encodes one message including its frame terminator.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Serialization` if a JSON payload cannot be
    /// serialized.
    pub fn encode(self, message: &StreamMessage) -> Result<String> {
        match self {
            Self::Sentinel => encode_sentinel(message),
            Self::JsonLines => {
                let mut line = serde_json::to_string(message)?;
                line.push('\n');
                Ok(line)
            }
        }
    }

    pub fn decoder(self) -> Box<dyn FrameDecoder + Send> {
        match self {
            Self::Sentinel => Box::new(SentinelDecoder::new()),
            Self::JsonLines => Box::new(JsonLineDecoder::new()),
        }
    }
}

fn encode_sentinel(message: &StreamMessage) -> Result<String> {
    let body = match message {
        StreamMessage::Content { content } => content.clone(),
        StreamMessage::Describing => SENTINEL_DESCRIBE.to_string(),
        StreamMessage::Building => SENTINEL_BUILD.to_string(),
        StreamMessage::BuildInfo(info) => serde_json::to_string(info)?,
        StreamMessage::Finished => SENTINEL_FINISHED.to_string(),
        StreamMessage::Aborted => SENTINEL_ABORT.to_string(),
        StreamMessage::Error { message } => format!("{SENTINEL_ERROR}{message}"),
    };
    Ok(body + SEPARATOR)
}

/// Splits raw bytes into messages. Frames may arrive split across calls.
pub trait FrameDecoder {
    /// Consumes `bytes`, returning every message completed by them.
    ///
    /// # Errors
    ///
    /// Returns an error for a frame that is not valid UTF-8 or not a valid
    /// message for the codec.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamMessage>>;

    /// Bytes received but not yet terminated by a frame boundary.
    fn pending(&self) -> usize;
}

fn take_frames(buf: &mut Vec<u8>, delimiter: &[u8]) -> Result<Vec<String>> {
    let mut frames = Vec::new();
    while let Some(pos) = buf.windows(delimiter.len()).position(|w| w == delimiter) {
        let frame: Vec<u8> = buf.drain(..pos + delimiter.len()).take(pos).collect();
        let frame = String::from_utf8(frame).map_err(|e| {
            PlanError::invalid_input("stream").with_reason(format!("frame is not UTF-8: {e}"))
        })?;
        frames.push(frame);
    }
    Ok(frames)
}

/// Decoder for the sentinel codec.
#[derive(Debug, Default)]
pub struct SentinelDecoder {
    buf: Vec<u8>,
    building: bool,
}

impl SentinelDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_segment(&mut self, segment: String) -> StreamMessage {
        match segment.as_str() {
            SENTINEL_DESCRIBE => StreamMessage::Describing,
            SENTINEL_BUILD => {
                self.building = true;
                StreamMessage::Building
            }
            SENTINEL_FINISHED => StreamMessage::Finished,
            SENTINEL_ABORT => StreamMessage::Aborted,
            s if s.starts_with(SENTINEL_ERROR) => StreamMessage::error(&s[SENTINEL_ERROR.len()..]),
            _ if self.building => match serde_json::from_str::<BuildInfo>(&segment) {
                Ok(info) => StreamMessage::BuildInfo(info),
                Err(e) => {
                    debug!("Non-JSON segment during build phase: {e}");
                    StreamMessage::Content { content: segment }
                }
            },
            _ => StreamMessage::Content { content: segment },
        }
    }
}

impl FrameDecoder for SentinelDecoder {
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamMessage>> {
        self.buf.extend_from_slice(bytes);
        let segments = take_frames(&mut self.buf, SEPARATOR.as_bytes())?;
        Ok(segments
            .into_iter()
            .map(|segment| self.decode_segment(segment))
            .collect())
    }

    fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Decoder for the JSON-lines codec.
#[derive(Debug, Default)]
pub struct JsonLineDecoder {
    buf: Vec<u8>,
}

impl JsonLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameDecoder for JsonLineDecoder {
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamMessage>> {
        self.buf.extend_from_slice(bytes);
        take_frames(&mut self.buf, b"\n")?
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(PlanError::from))
            .collect()
    }

    fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Client side of a plan stream.
///
/// Decodes bytes with the stream's codec and checks every phase marker
/// against a local [`PlanStreamState`], so a marker the table does not
/// allow is reported instead of silently followed.
pub struct PlanStreamReader {
    decoder: Box<dyn FrameDecoder + Send>,
    state: PlanStreamState,
}

impl PlanStreamReader {
    pub fn new(format: WireFormat) -> Self {
        Self {
            decoder: format.decoder(),
            state: PlanStreamState::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Feeds raw bytes and returns the messages they complete, in order.
    ///
    /// # Errors
    ///
    /// Returns a decode error, or `PlanError::InvalidTransition` when a
    /// phase marker is not allowed from the current phase.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamMessage>> {
        let messages = self.decoder.push(bytes)?;
        for message in &messages {
            if let Some(event) = message.event() {
                let phase = self.state.fire(event)?;
                debug!("Stream reader entered phase {phase}");
            }
        }
        Ok(messages)
    }

    /// Continues an aborted plan with a revised prompt.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::InvalidTransition` unless the stream is aborted.
    pub fn revise(&mut self) -> Result<Phase> {
        self.state.fire(super::StreamEvent::Revise)
    }

    /// Gives up on an aborted plan.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::InvalidTransition` unless the stream is aborted.
    pub fn cancel(&mut self) -> Result<Phase> {
        self.state.fire(super::StreamEvent::Cancel)
    }

    /// Whether the execution being read has ended. An aborted stream is
    /// done until [`Self::revise`] is called for a continued plan.
    pub fn is_done(&self) -> bool {
        self.state.is_terminal() || self.state.phase() == Phase::Aborted
    }
}
