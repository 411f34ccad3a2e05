//! HTTP front door: static UI assets and the push-channel upgrade
//!
//! Just enough HTTP/1.1 to serve the bundled UI and hand `/ws` upgrade
//! requests over to the WebSocket transport. Assets are compiled into the
//! image so serving them never touches a filesystem.

use core::fmt::Write;

use heapless::String;
use log::debug;
use thiserror_no_std::Error;

use crate::websocket::accept_key;

/// Path of the push channel
pub const PUSH_CHANNEL_PATH: &str = "/ws";

/// Largest request head the server will buffer
pub const MAX_REQUEST_HEAD: usize = 1024;

pub type ResponseHead = String<256>;

/// A file served verbatim
#[derive(Debug, PartialEq, Eq)]
pub struct Asset {
    pub path: &'static str,
    pub content_type: &'static str,
    pub body: &'static [u8],
}

pub static ASSETS: &[Asset] = &[
    Asset {
        path: "/index.html",
        content_type: "text/html",
        body: include_bytes!("../web/index.html"),
    },
    Asset {
        path: "/script.js",
        content_type: "application/javascript",
        body: include_bytes!("../web/script.js"),
    },
    Asset {
        path: "/style.css",
        content_type: "text/css",
        body: include_bytes!("../web/style.css"),
    },
    Asset {
        path: "/favicon.png",
        content_type: "image/png",
        body: include_bytes!("../web/favicon.png"),
    },
];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    #[error("request head is incomplete")]
    Incomplete,
    #[error("request head is not valid UTF-8")]
    Encoding,
    #[error("malformed request line")]
    BadRequestLine,
    #[error("request head is too large")]
    TooLarge,
}

/// The parts of a request the router looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub upgrade_websocket: bool,
    pub websocket_key: Option<&'a str>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    Asset(&'static Asset),
    PushChannel { key: String<64> },
    BadUpgrade,
    NotFound,
    MethodNotAllowed,
}

/// Length of the request head including the blank line, once it has fully arrived
pub fn head_len(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Parse a complete request head
pub fn parse_request(head: &[u8]) -> Result<Request<'_>, HttpError> {
    let head = core::str::from_utf8(head).map_err(|_| HttpError::Encoding)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(HttpError::Incomplete)?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::BadRequestLine);
    };
    if !version.starts_with("HTTP/1.") || parts.next().is_some() {
        return Err(HttpError::BadRequestLine);
    }
    let path = target.split(['?', '#']).next().unwrap_or(target);

    let mut upgrade_websocket = false;
    let mut websocket_key = None;
    for line in lines.take_while(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("upgrade") && value.eq_ignore_ascii_case("websocket") {
            upgrade_websocket = true;
        } else if name.eq_ignore_ascii_case("sec-websocket-key") {
            websocket_key = Some(value);
        }
    }

    Ok(Request {
        method,
        path,
        upgrade_websocket,
        websocket_key,
    })
}

/// Decide how to answer a request
pub fn route(request: &Request<'_>) -> Route {
    if request.method != "GET" {
        return Route::MethodNotAllowed;
    }
    if request.path == PUSH_CHANNEL_PATH {
        return match (request.upgrade_websocket, request.websocket_key) {
            (true, Some(key)) => {
                let mut owned = String::new();
                if owned.push_str(key).is_err() {
                    return Route::BadUpgrade;
                }
                Route::PushChannel { key: owned }
            }
            _ => Route::BadUpgrade,
        };
    }

    let path = if request.path == "/" {
        "/index.html"
    } else {
        request.path
    };
    match ASSETS.iter().find(|asset| asset.path == path) {
        Some(asset) => Route::Asset(asset),
        None => {
            debug!("No asset at {}", request.path);
            Route::NotFound
        }
    }
}

/// Status line and headers for a plain response with a body of `content_length` bytes
pub fn response_head(
    status: u16,
    reason: &str,
    content_type: &str,
    content_length: usize,
) -> ResponseHead {
    let mut head = ResponseHead::new();
    // Fits for every status, reason and content type used by the server
    let _ = write!(
        head,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status, reason, content_type, content_length
    );
    head
}

/// Head of a response answering `route`, for routes that are not a push channel upgrade
pub fn response_for(route: &Route) -> (ResponseHead, &'static [u8]) {
    match route {
        Route::Asset(asset) => (
            response_head(200, "OK", asset.content_type, asset.body.len()),
            asset.body,
        ),
        Route::MethodNotAllowed => plain(405, "Method Not Allowed"),
        Route::BadUpgrade => plain(400, "Bad Request"),
        Route::NotFound | Route::PushChannel { .. } => plain(404, "Not Found"),
    }
}

fn plain(status: u16, reason: &'static str) -> (ResponseHead, &'static [u8]) {
    (
        response_head(status, reason, "text/plain", reason.len()),
        reason.as_bytes(),
    )
}

/// `101 Switching Protocols` head completing the WebSocket handshake
pub fn upgrade_response(client_key: &str) -> ResponseHead {
    let mut head = ResponseHead::new();
    let _ = write!(
        head,
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    );
    head
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE: &[u8] = b"GET /ws HTTP/1.1\r\nHost: pitcaller.local\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn test_head_len() {
        assert_eq!(head_len(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);
        assert_eq!(head_len(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(head_len(UPGRADE), Some(UPGRADE.len()));
    }

    #[test]
    fn test_root_serves_index() {
        let request = parse_request(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let Route::Asset(asset) = route(&request) else {
            panic!("expected an asset");
        };
        assert_eq!(asset.path, "/index.html");
        assert_eq!(asset.content_type, "text/html");
    }

    #[test]
    fn test_favicon_and_query_strings() {
        let request = parse_request(b"GET /favicon.png?v=2 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.path, "/favicon.png");
        let Route::Asset(asset) = route(&request) else {
            panic!("expected an asset");
        };
        assert_eq!(asset.content_type, "image/png");
        assert!(asset.body.starts_with(b"\x89PNG"));
    }

    #[test]
    fn test_unknown_path_and_method() {
        let request = parse_request(b"GET /nope HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(route(&request), Route::NotFound);

        let request = parse_request(b"POST / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(route(&request), Route::MethodNotAllowed);

        let (head, body) = response_for(&Route::NotFound);
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert_eq!(body, b"Not Found");
    }

    #[test]
    fn test_websocket_upgrade() {
        let request = parse_request(UPGRADE).unwrap();
        assert!(request.upgrade_websocket);
        let Route::PushChannel { key } = route(&request) else {
            panic!("expected a push channel upgrade");
        };

        let head = upgrade_response(&key);
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_plain_get_on_push_channel() {
        let request = parse_request(b"GET /ws HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(route(&request), Route::BadUpgrade);
    }

    #[test]
    fn test_bad_request_lines() {
        assert_eq!(
            parse_request(b"GARBAGE\r\n\r\n"),
            Err(HttpError::BadRequestLine)
        );
        assert_eq!(
            parse_request(b"GET / SPDY/3\r\n\r\n"),
            Err(HttpError::BadRequestLine)
        );
        assert_eq!(parse_request(b"\xff\xfe\r\n\r\n"), Err(HttpError::Encoding));
    }

    #[test]
    fn test_response_head() {
        let head = response_head(200, "OK", "text/css", 42);
        assert_eq!(
            head.as_str(),
            "HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: 42\r\nConnection: close\r\n\r\n"
        );
    }
}
