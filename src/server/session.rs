use http::HeaderMap;
use percent_encoding::percent_decode_str;

/// Name of both the session header and the session cookie.
pub const SESSION_KEY: &str = "ngapimockid";

/// Operating mode of a single request, derived from session presence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Session-isolated: state partitioned by the resolved session token.
    Protractor,
    /// Shared: the session-less partition used by ordinary runtime traffic.
    Runtime,
}

impl Mode {
    pub fn from_session(session: Option<&str>) -> Self {
        if session.is_some() {
            Mode::Protractor
        } else {
            Mode::Runtime
        }
    }
}

/// Extracts the session token from the request headers. The `ngapimockid`
/// header takes precedence over a cookie of the same name. Malformed input
/// never fails the request, it simply yields no session.
pub fn resolve_session(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(SESSION_KEY) {
        if let Ok(value) = value.to_str() {
            return Some(value.to_string());
        }
    }

    headers
        .get(http::header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(session_cookie)
}

/// Finds the `ngapimockid` cookie within a `Cookie` header value. Each segment
/// is split on the first `=` only, so everything after it belongs to the
/// value verbatim. Segments without a `=` are skipped.
fn session_cookie(cookies: &str) -> Option<String> {
    cookies.split(';').find_map(|segment| {
        let (key, value) = segment.split_once('=')?;
        if key.trim() == SESSION_KEY {
            Some(percent_decode_str(value).decode_utf8_lossy().into_owned())
        } else {
            None
        }
    })
}
