//! Interleaved framing: media frames inside the RTSP TCP connection.
//!
//! Each frame on the control connection's byte stream is:
//!
//! ```text
//! +------+---------+----------------+-------------------+
//! | '$'  | channel | length (u16 BE)| payload (length)  |
//! +------+---------+----------------+-------------------+
//! ```
//!
//! The channel id encodes the track and flow: `2 * track` for RTP and
//! `2 * track + 1` for RTCP. Anything not starting with `$` is RTSP text.

use std::io::{self, BufRead, Read, Write};

use bytes::Bytes;

use crate::error::{RelayError, Result};
use crate::session::transport::FlowKind;

/// First byte of every interleaved frame.
pub const MARKER: u8 = b'$';

/// Upper bound for an RTSP request body (`Content-Length`).
const MAX_BODY_LEN: usize = 1 << 20;

/// Upper bound for a request line plus headers.
const MAX_HEAD_LEN: usize = 16 * 1024;

/// Channel id for `(track, flow)`, or `None` if it does not fit in a byte.
pub fn channel_id(track: usize, flow: FlowKind) -> Option<u8> {
    let base = track.checked_mul(2)?;
    let id = match flow {
        FlowKind::Primary => base,
        FlowKind::Feedback => base.checked_add(1)?,
    };
    u8::try_from(id).ok()
}

/// Inverse of [`channel_id`].
pub fn split_channel(channel: u8) -> (usize, FlowKind) {
    let flow = if channel % 2 == 0 {
        FlowKind::Primary
    } else {
        FlowKind::Feedback
    };
    (usize::from(channel / 2), flow)
}

/// Write one interleaved frame.
pub fn write_frame<W: Write>(writer: &mut W, channel: u8, payload: &[u8]) -> Result<()> {
    let len = u16::try_from(payload.len()).map_err(|_| RelayError::FrameTooLarge(payload.len()))?;
    let [hi, lo] = len.to_be_bytes();
    writer.write_all(&[MARKER, channel, hi, lo])?;
    writer.write_all(payload)?;
    Ok(())
}

/// Read the remainder of an interleaved frame, marker included.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<(u8, Bytes)> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    if header[0] != MARKER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing interleaved marker",
        ));
    }
    let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok((header[1], Bytes::from(payload)))
}

/// One message read off a control connection.
#[derive(Debug, PartialEq, Eq)]
pub enum Message {
    /// Complete RTSP request text: header block plus any body.
    Request(String),
    Frame { channel: u8, payload: Bytes },
}

/// Read the next message, telling frames and requests apart by the
/// first byte. Returns `Ok(None)` on a clean end of stream.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<Message>> {
    loop {
        let first = {
            let buf = reader.fill_buf()?;
            match buf.first() {
                Some(&byte) => byte,
                None => return Ok(None),
            }
        };

        match first {
            MARKER => {
                let (channel, payload) = read_frame(reader)?;
                return Ok(Some(Message::Frame { channel, payload }));
            }
            // Stray line endings between messages.
            b'\r' | b'\n' => reader.consume(1),
            _ => return read_request(reader).map(|text| text.map(Message::Request)),
        }
    }
}

fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut request_text = String::new();
    loop {
        let remaining = MAX_HEAD_LEN.saturating_sub(request_text.len()) as u64;
        let mut line = String::new();
        if reader.by_ref().take(remaining).read_line(&mut line)? == 0 {
            if remaining == 0 {
                return Err(head_too_large());
            }
            return Ok(None);
        }
        if !line.ends_with('\n') && request_text.len() + line.len() >= MAX_HEAD_LEN {
            return Err(head_too_large());
        }
        request_text.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    let content_length = request_text
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    if content_length > MAX_BODY_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "request body too large",
        ));
    }

    if content_length > 0 {
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body)?;
        request_text.push_str(&String::from_utf8_lossy(&body));
    }

    Ok(Some(request_text))
}

fn head_too_large() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "request head too large")
}
