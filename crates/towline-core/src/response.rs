//! Response builder
//!
//! Turns the raw header lines accumulated for one header section into an
//! immutable [`Response`]. Pure parsing, no I/O: the engine only calls this
//! at the header/body boundary, once per section.

use towline_types::{Headers, Response};
use url::Url;

/// Parse one accumulated header section into a [`Response`].
///
/// The first line is treated as the status line and parsed leniently: the
/// numeric code is extracted from either an `HTTP/x.y NNN reason` line or an
/// FTP-style `NNN text` reply. Unparsable status lines fall back to
/// `last_code` (0 if no code was ever seen). Remaining lines are `Name: Value`
/// pairs; lines starting with whitespace continue the previous value, and
/// duplicate names fold per [`Headers::insert`].
pub fn build_response(url: &Url, lines: &[String], last_code: u16) -> Response {
    let status_code = lines
        .first()
        .and_then(|line| parse_status_line(line))
        .unwrap_or(last_code);

    let mut headers = Headers::new();
    let mut last_name: Option<String> = None;

    for line in lines.iter().skip(1) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Folded continuation of the previous header value
            if let Some(name) = &last_name {
                headers.append_to(name, line);
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name, value);
            last_name = Some(name.trim().to_string());
        }
    }

    Response::new(url.clone(), status_code, headers)
}

/// Extract the numeric status code from a status line, if any.
fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;

    if first.to_ascii_uppercase().starts_with("HTTP/") {
        // "HTTP/1.1 200 OK"
        return parts.next().and_then(|code| code.parse().ok());
    }

    // FTP-style reply: "213 4096"
    first.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://example.com/file").unwrap()
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_status_and_headers() {
        let response = build_response(
            &url(),
            &lines(&["HTTP/1.1 200 OK", "Content-Type: text/plain"]),
            0,
        );
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.headers().get("content-type"), Some("text/plain"));
    }

    #[test]
    fn duplicate_headers_fold_instead_of_overwriting() {
        let response = build_response(
            &url(),
            &lines(&[
                "HTTP/1.1 200 OK",
                "Set-Cookie: a=1",
                "Set-Cookie: b=2",
            ]),
            0,
        );
        assert_eq!(response.headers().get("set-cookie"), Some("a=1, b=2"));
    }

    #[test]
    fn continuation_lines_extend_previous_value() {
        let response = build_response(
            &url(),
            &lines(&[
                "HTTP/1.1 200 OK",
                "X-Note: first",
                "\tand second",
            ]),
            0,
        );
        assert_eq!(response.headers().get("x-note"), Some("first and second"));
    }

    #[test]
    fn ftp_style_reply_code() {
        let response = build_response(&url(), &lines(&["213 4096"]), 0);
        assert_eq!(response.status_code(), 213);
    }

    #[test]
    fn unparsable_status_line_keeps_last_code() {
        let response = build_response(&url(), &lines(&["garbage status"]), 150);
        assert_eq!(response.status_code(), 150);

        let response = build_response(&url(), &lines(&["garbage status"]), 0);
        assert_eq!(response.status_code(), 0);
    }

    #[test]
    fn empty_section_yields_last_code_and_no_headers() {
        let response = build_response(&url(), &[], 0);
        assert_eq!(response.status_code(), 0);
        assert!(response.headers().is_empty());
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let response = build_response(
            &url(),
            &lines(&["HTTP/1.1 301 Moved", "LOCATION: http://elsewhere/"]),
            0,
        );
        assert_eq!(
            response.headers().get("location"),
            Some("http://elsewhere/")
        );
        assert_eq!(response.status_code(), 301);
    }
}
