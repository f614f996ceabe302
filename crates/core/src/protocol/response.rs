use std::fmt;

use crate::error::SessionError;

/// Server identification sent with every response.
pub const SERVER_AGENT: &str = "rtsp-relay/0.1";

/// Reason phrase for the status codes the relay emits.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        461 => "Unsupported Transport",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

/// Response to one RTSP request.
///
/// `Display` renders the wire form; `Content-Length` follows the body.
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status: u16) -> Self {
        RtspResponse {
            status,
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    /// Rejection for a request that failed with `error`.
    pub fn rejected(error: &SessionError) -> Self {
        Self::new(error.status())
    }

    /// 400 for bytes that did not parse as a request, echoing their
    /// `CSeq` when one can be found.
    pub fn malformed(raw: &str) -> Self {
        let cseq = raw.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case("CSeq").then_some(value.trim())
        });
        match cseq {
            Some(cseq) => Self::bad_request().header("CSeq", cseq),
            None => Self::bad_request(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Attach an SDP body.
    pub fn sdp(mut self, sdp: String) -> Self {
        self.headers
            .push(("Content-Type".to_string(), "application/sdp".to_string()));
        self.body = Some(sdp);
        self
    }

    pub fn reason(&self) -> &'static str {
        reason_phrase(self.status)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for RtspResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RTSP/1.0 {} {}\r\n", self.status, self.reason())?;
        for (name, value) in &self.headers {
            write!(f, "{name}: {value}\r\n")?;
        }
        match &self.body {
            Some(body) => write!(f, "Content-Length: {}\r\n\r\n{body}", body.len()),
            None => f.write_str("\r\n"),
        }
    }
}
