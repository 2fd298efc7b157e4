//! Minimal `multipart/form-data` reader for image uploads.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("multipart body has no opening boundary")]
    MissingOpeningBoundary,
    #[error("multipart part is not terminated by a boundary")]
    Unterminated,
    #[error("malformed multipart part: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, PartialEq, Eq)]
pub struct Part<'a> {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: &'a [u8],
}

/// Boundary parameter of a `multipart/form-data` content type, if that is what it is.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|p| p.trim().split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

pub fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>, MultipartError> {
    let delimiter = [b"--".as_slice(), boundary.as_bytes()].concat();
    let close = [b"\r\n".as_slice(), delimiter.as_slice()].concat();

    let start = find(body, &delimiter).ok_or(MultipartError::MissingOpeningBoundary)?;
    let mut cursor = start + delimiter.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            break;
        }
        if !rest.starts_with(b"\r\n") {
            return Err(MultipartError::Malformed("boundary not followed by CRLF"));
        }
        cursor += 2;

        let (header_block, data_start) = if body[cursor..].starts_with(b"\r\n") {
            (&body[cursor..cursor], cursor + 2)
        } else {
            let end = find(&body[cursor..], b"\r\n\r\n")
                .ok_or(MultipartError::Malformed("part headers not terminated"))?;
            (&body[cursor..cursor + end], cursor + end + 4)
        };

        let data_len = find(&body[data_start..], &close).ok_or(MultipartError::Unterminated)?;
        let mut part = parse_part_headers(header_block);
        part.data = &body[data_start..data_start + data_len];
        parts.push(part);

        cursor = data_start + data_len + close.len();
    }
    Ok(parts)
}

/// First part named `name`.
pub fn find_part<'p, 'a>(parts: &'p [Part<'a>], name: &str) -> Option<&'p Part<'a>> {
    parts.iter().find(|p| p.name.as_deref() == Some(name))
}

fn parse_part_headers<'a>(block: &[u8]) -> Part<'a> {
    let mut part = Part {
        name: None,
        filename: None,
        content_type: None,
        data: &[],
    };
    let text = String::from_utf8_lossy(block);
    for line in text.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-type") {
            part.content_type = Some(value.trim().to_string());
        } else if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                let Some((k, v)) = param.trim().split_once('=') else {
                    continue;
                };
                let v = v.trim().trim_matches('"').to_string();
                match k.trim().to_ascii_lowercase().as_str() {
                    "name" => part.name = Some(v),
                    "filename" => part.filename = Some(v),
                    _ => {}
                }
            }
        }
    }
    part
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

    fn form(boundary: &str, parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, data) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }

    #[test]
    fn extracts_boundary() {
        assert_eq!(
            boundary("multipart/form-data; boundary=----abc123").as_deref(),
            Some("----abc123")
        );
        assert_eq!(
            boundary("Multipart/Form-Data; charset=utf-8; boundary=\"xyz\"").as_deref(),
            Some("xyz")
        );
        assert_eq!(boundary("image/png"), None);
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn parses_named_parts() {
        let body = form(
            "b0undary",
            &[("note", &b"hello"[..]), ("file", &b"\x89PNG\r\n\x1a\nrest"[..])],
        );
        let parts = parse(&body, "b0undary").unwrap();
        assert_eq!(parts.len(), 2);

        let file = find_part(&parts, "file").unwrap();
        assert_eq!(file.filename.as_deref(), Some("file.png"));
        assert_eq!(file.content_type.as_deref(), Some("image/png"));
        assert_eq!(file.data, b"\x89PNG\r\n\x1a\nrest");
        assert_eq!(find_part(&parts, "note").unwrap().data, b"hello");
        assert!(find_part(&parts, "missing").is_none());
    }

    #[test]
    fn tolerates_preamble_and_headerless_parts() {
        let body = b"preamble\r\n--xx\r\n\r\nraw\r\n--xx--".to_vec();
        let parts = parse(&body, "xx").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, None);
        assert_eq!(parts[0].data, b"raw");
    }

    #[test]
    fn rejects_truncated_bodies() {
        assert_eq!(
            parse(b"no boundary here", "xx"),
            Err(MultipartError::MissingOpeningBoundary)
        );
        let body = b"--xx\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\npartial";
        assert_eq!(parse(body, "xx"), Err(MultipartError::Unterminated));
    }
}
