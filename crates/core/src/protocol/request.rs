use crate::error::{ParseErrorKind, RelayError};

/// A parsed RTSP request.
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    /// Headers as ordered (name, value) pairs, names stored as received.
    pub headers: Vec<(String, String)>,
    /// Message body (e.g. the SDP of an ANNOUNCE); empty if absent.
    pub body: String,
}

impl RtspRequest {
    /// Parse a complete request: request line, headers, blank line and
    /// whatever body follows it.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let (head, body) = raw
            .split_once("\r\n\r\n")
            .or_else(|| raw.split_once("\n\n"))
            .unwrap_or((raw, ""));

        let mut lines = head.lines();

        let request_line = lines.next().ok_or(RelayError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(RelayError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let (name, value) = line.split_once(':').ok_or(RelayError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers,
            body: body.to_string(),
        })
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The CSeq header, echoed in every response.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Session id from the `Session` header, without the `;timeout=` suffix.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }
}

/// Path and credential addressed by a request URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Path without leading/trailing slashes or track control suffix.
    pub path: String,
    /// `key` query parameter, the publish credential.
    pub key: Option<String>,
}

impl Target {
    /// Extract the target from an RTSP URI.
    ///
    /// ```text
    /// rtsp://host:8554/cam1                    -> cam1
    /// rtsp://host:8554/cam1/trackID=0          -> cam1
    /// rtsp://host:8554/cam1?key=abc/streamid=1 -> cam1, key abc
    /// rtsp://host:8554/live/cam1               -> live/cam1
    /// rtsp://host:8554/                        -> None
    /// ```
    pub fn parse(uri: &str) -> Option<Self> {
        let after_host = match uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            Some(rest) => &rest[rest.find('/')?..],
            None if uri.starts_with('/') => uri,
            None => return None,
        };

        // Clients append the track control URL after the query.
        let (path_part, key) = match after_host.split_once('?') {
            Some((path, rest)) => {
                let query = rest.split('/').next().unwrap_or(rest);
                let key = query
                    .split('&')
                    .find_map(|kv| kv.strip_prefix("key="))
                    .map(str::to_string);
                (path, key)
            }
            None => (after_host, None),
        };

        let mut path = path_part.trim_matches('/');
        if let Some((base, last)) = path.rsplit_once('/')
            && is_track_control(last)
        {
            path = base;
        }

        if path.is_empty() {
            return None;
        }

        Some(Target {
            path: path.to_string(),
            key,
        })
    }
}

fn is_track_control(segment: &str) -> bool {
    ["trackID=", "streamid=", "track"]
        .iter()
        .find_map(|prefix| segment.strip_prefix(prefix))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}
