//! multipart/form-data field lookup
//!
//! Upload endpoints are forwarded verbatim; only small text fields such as
//! `model` are read out of the body for routing.

/// Boundary parameter of a `multipart/form-data` content type
pub fn boundary(content_type: &str) -> Option<&str> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|p| p.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|b| !b.is_empty())
}

/// Text value of the first part named `name`
///
/// Only a part closed by a following delimiter counts, so a body prefix never
/// yields a cut-off value.
pub fn text_field(body: &[u8], boundary: &str, name: &str) -> Option<String> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();

    let mut rest = body;
    while let Some(start) = find(rest, delimiter) {
        rest = &rest[start + delimiter.len()..];
        if rest.starts_with(b"--") {
            return None;
        }
        let header_end = find(rest, b"\r\n\r\n")?;
        let headers = String::from_utf8_lossy(&rest[..header_end]);
        let content = &rest[header_end + 4..];
        let content_end = find(content, delimiter)?;

        if part_name(&headers).as_deref() == Some(name) {
            let value = content[..content_end]
                .strip_suffix(b"\r\n")
                .unwrap_or(&content[..content_end]);
            return std::str::from_utf8(value).ok().map(|v| v.trim().to_string());
        }
        rest = content;
    }
    None
}

fn part_name(headers: &str) -> Option<String> {
    headers
        .lines()
        .find(|line| {
            line.split_once(':')
                .is_some_and(|(k, _)| k.trim().eq_ignore_ascii_case("content-disposition"))
        })?
        .split(';')
        .filter_map(|p| p.trim().split_once('='))
        .find(|(key, _)| *key == "name")
        .map(|(_, value)| value.trim_matches('"').to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"a.wav\"\r\n\
Content-Type: audio/wav\r\n\r\n\
RIFF\x00\x01binary\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"model\"\r\n\r\n\
whisper-1\r\n\
--XyZ--\r\n";

    #[test]
    fn test_boundary() {
        assert_eq!(boundary("multipart/form-data; boundary=XyZ"), Some("XyZ"));
        assert_eq!(boundary("multipart/form-data; boundary=\"a b\""), Some("a b"));
        assert_eq!(boundary("application/json"), None);
    }

    #[test]
    fn test_text_field_after_binary_part() {
        assert_eq!(text_field(BODY, "XyZ", "model").as_deref(), Some("whisper-1"));
        assert_eq!(text_field(BODY, "XyZ", "prompt"), None);
    }

    #[test]
    fn test_text_field_needs_closing_delimiter() {
        let body = b"--b1\r\nContent-Disposition: form-data; name=\"model\"\r\n\r\nwhisper-1\r\n--b1\r\n";
        assert_eq!(text_field(body, "b1", "model").as_deref(), Some("whisper-1"));

        // Cut inside the value
        assert_eq!(text_field(&body[..body.len() - 9], "b1", "model"), None);
        // Cut inside the part headers
        assert_eq!(text_field(&body[..20], "b1", "model"), None);
    }
}
