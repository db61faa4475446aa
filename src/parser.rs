//! Structured view of a raw RFC 5322 / MIME message

use mail_parser::{Address, Message, MessageParser, MimeHeaders};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("message is empty")]
    Empty,

    #[error("malformed header on line {line}")]
    MalformedHeader { line: usize },

    #[error("header continuation on line {line} without a preceding header")]
    OrphanContinuation { line: usize },

    #[error("multipart content type without a boundary")]
    MissingBoundary,

    #[error("message could not be decoded as MIME")]
    Undecodable,
}

/// Attachment metadata. Inbound attachments are only reported, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentInfo {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
}

/// Fields extracted from a message. Any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMessage {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub attachments: Vec<AttachmentInfo>,
}

/// Parse a complete DATA payload.
///
/// The header block is checked for structural validity first; MIME
/// decoding is then left to `mail-parser`. There is no partial recovery:
/// the first structural problem fails the whole message.
pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage, ParseError> {
    check_header_block(raw)?;

    let message = MessageParser::default()
        .parse(raw)
        .ok_or(ParseError::Undecodable)?;
    check_boundary(&message)?;

    let attachments = message
        .attachments()
        .map(|part| AttachmentInfo {
            filename: part.attachment_name().map(str::to_owned),
            content_type: part.content_type().map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_owned(),
            }),
            size: part.contents().len(),
        })
        .collect();

    Ok(ParsedMessage {
        from: message.from().and_then(address_text),
        to: message.to().and_then(address_text),
        subject: message.subject().map(str::to_owned),
        body: message
            .body_text(0)
            .map(|text| text.trim_end_matches(['\r', '\n']).to_owned()),
        attachments,
    })
}

/// Validate the header section: every line up to the first blank one must
/// be a `Name: value` field or the folded continuation of one. Whitespace
/// between the name and the colon is the obsolete form and still accepted.
fn check_header_block(raw: &[u8]) -> Result<(), ParseError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Empty);
    }

    let mut seen_field = false;
    for (index, line) in raw.split(|&b| b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line_no = index + 1;

        if line.is_empty() {
            break;
        }

        if line[0] == b' ' || line[0] == b'\t' {
            if !seen_field {
                return Err(ParseError::OrphanContinuation { line: line_no });
            }
            continue;
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::MalformedHeader { line: line_no })?;
        let name = line[..colon].trim_ascii_end();
        if name.is_empty() || !name.iter().all(|&b| (33..=126).contains(&b)) {
            return Err(ParseError::MalformedHeader { line: line_no });
        }
        seen_field = true;
    }

    Ok(())
}

/// A top-level `multipart/*` needs a boundary parameter. The parameters come
/// from mail-parser, so spacing around `=` and RFC 2231 continuations are
/// already resolved.
fn check_boundary(message: &Message<'_>) -> Result<(), ParseError> {
    match message.content_type() {
        Some(ct)
            if ct.ctype().eq_ignore_ascii_case("multipart")
                && ct.attribute("boundary").is_none_or(str::is_empty) =>
        {
            Err(ParseError::MissingBoundary)
        }
        _ => Ok(()),
    }
}

/// Render an address header the way a mail client would display it
fn address_text(address: &Address<'_>) -> Option<String> {
    let addrs: Vec<String> = match address {
        Address::List(list) => list.iter().filter_map(addr_text).collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .filter_map(addr_text)
            .collect(),
    };

    if addrs.is_empty() {
        None
    } else {
        Some(addrs.join(", "))
    }
}

fn addr_text(addr: &mail_parser::Addr<'_>) -> Option<String> {
    let name = addr.name.as_deref().filter(|n| !n.is_empty());
    let address = addr.address.as_deref().filter(|a| !a.is_empty());
    match (name, address) {
        (Some(name), Some(address)) => Some(format!("{name} <{address}>")),
        (None, Some(address)) => Some(address.to_owned()),
        (Some(name), None) => Some(name.to_owned()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_part_text() {
        let parsed = parse_message(b"Subject: Test\r\n\r\nBody text\r\n").unwrap();
        assert_eq!(parsed.subject.as_deref(), Some("Test"));
        assert_eq!(parsed.body.as_deref(), Some("Body text"));
        assert_eq!(parsed.from, None);
        assert_eq!(parsed.to, None);
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn test_bare_lf_payload() {
        let parsed = parse_message(b"Subject: Test\n\nBody text").unwrap();
        assert_eq!(parsed.subject.as_deref(), Some("Test"));
        assert_eq!(parsed.body.as_deref(), Some("Body text"));
    }

    #[test]
    fn test_address_headers() {
        let raw = b"From: Alice <alice@example.com>\r\n\
                    To: user-7@mail.local, Bob <bob@example.com>\r\n\
                    Subject: Hello\r\n\
                    \r\n\
                    Hi there\r\n";
        let parsed = parse_message(raw).unwrap();
        assert_eq!(parsed.from.as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(
            parsed.to.as_deref(),
            Some("user-7@mail.local, Bob <bob@example.com>")
        );
        assert_eq!(parsed.body.as_deref(), Some("Hi there"));
    }

    #[test]
    fn test_folded_header() {
        let raw = b"Subject: a long\r\n subject line\r\n\r\nbody\r\n";
        let parsed = parse_message(raw).unwrap();
        assert_eq!(parsed.subject.as_deref(), Some("a long subject line"));
    }

    #[test]
    fn test_multipart_with_attachment() {
        let raw = b"From: alice@example.com\r\n\
                    Subject: Report\r\n\
                    MIME-Version: 1.0\r\n\
                    Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
                    \r\n\
                    --XYZ\r\n\
                    Content-Type: text/plain; charset=utf-8\r\n\
                    \r\n\
                    See attached.\r\n\
                    --XYZ\r\n\
                    Content-Type: text/csv\r\n\
                    Content-Disposition: attachment; filename=\"report.csv\"\r\n\
                    \r\n\
                    a,b\r\n\
                    1,2\r\n\
                    --XYZ--\r\n";
        let parsed = parse_message(raw).unwrap();
        assert_eq!(parsed.subject.as_deref(), Some("Report"));
        assert_eq!(parsed.body.as_deref(), Some("See attached."));
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(
            parsed.attachments[0].filename.as_deref(),
            Some("report.csv")
        );
        assert_eq!(
            parsed.attachments[0].content_type.as_deref(),
            Some("text/csv")
        );
    }

    #[test]
    fn test_encoded_subject() {
        let raw = b"Subject: =?UTF-8?B?w6l0w6k=?=\r\n\r\nbody\r\n";
        let parsed = parse_message(raw).unwrap();
        assert_eq!(parsed.subject.as_deref(), Some("\u{e9}t\u{e9}"));
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(parse_message(b""), Err(ParseError::Empty));
        assert_eq!(parse_message(b"\r\n\r\n"), Err(ParseError::Empty));
    }

    #[test]
    fn test_line_without_colon() {
        let result = parse_message(b"this is not a header\r\n\r\nbody\r\n");
        assert_eq!(result, Err(ParseError::MalformedHeader { line: 1 }));

        let result = parse_message(b"Subject: ok\r\nbroken line\r\n\r\nbody\r\n");
        assert_eq!(result, Err(ParseError::MalformedHeader { line: 2 }));
    }

    #[test]
    fn test_invalid_header_name() {
        let result = parse_message(b"Bad Name: value\r\n\r\nbody\r\n");
        assert_eq!(result, Err(ParseError::MalformedHeader { line: 1 }));

        let result = parse_message(b": value\r\n\r\nbody\r\n");
        assert_eq!(result, Err(ParseError::MalformedHeader { line: 1 }));
    }

    #[test]
    fn test_orphan_continuation() {
        let result = parse_message(b"  folded\r\nSubject: x\r\n\r\nbody\r\n");
        assert_eq!(result, Err(ParseError::OrphanContinuation { line: 1 }));
    }

    #[test]
    fn test_multipart_without_boundary() {
        let raw = b"Subject: x\r\nContent-Type: multipart/mixed\r\n\r\n--a\r\n";
        assert_eq!(parse_message(raw), Err(ParseError::MissingBoundary));
    }

    #[test]
    fn test_space_before_colon() {
        let parsed = parse_message(b"Subject : Test\r\nFrom\t: a@b.com\r\n\r\nBody text\r\n").unwrap();
        assert_eq!(parsed.subject.as_deref(), Some("Test"));
        assert_eq!(parsed.body.as_deref(), Some("Body text"));
    }

    fn multipart_with(content_type: &str) -> Vec<u8> {
        format!(
            "Subject: x\r\n\
             Content-Type: {content_type}\r\n\
             \r\n\
             --b1\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             inner\r\n\
             --b1--\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn test_boundary_with_spaced_equals() {
        let parsed = parse_message(&multipart_with("multipart/mixed; boundary = \"b1\"")).unwrap();
        assert_eq!(parsed.body.as_deref(), Some("inner"));
    }

    #[test]
    fn test_boundary_as_rfc2231_continuation() {
        let parsed = parse_message(&multipart_with("multipart/mixed; boundary*0=\"b1\"")).unwrap();
        assert_eq!(parsed.body.as_deref(), Some("inner"));
    }

    #[test]
    fn test_multipart_boundary_on_folded_line() {
        let raw = b"Subject: x\r\n\
                    Content-Type: multipart/mixed;\r\n\
                    \tboundary=\"b1\"\r\n\
                    \r\n\
                    --b1\r\n\
                    Content-Type: text/plain\r\n\
                    \r\n\
                    inner\r\n\
                    --b1--\r\n";
        let parsed = parse_message(raw).unwrap();
        assert_eq!(parsed.body.as_deref(), Some("inner"));
    }
}
