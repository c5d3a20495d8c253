//! Text codec for FileRover control-channel messages.
//!
//! Wire format:
//! ```text
//! request  = VERB *( "|" param )
//! reply    = field *( "|" field )          ; success
//!          / "FAIL" [ "|" message ]         ; failure
//! listing  = "|" *( name "|" size "\n" )
//! info     = path "|" size "|" atime "|" mtime
//! ```
//!
//! There is no length prefix.  A message is whatever one read returned, so
//! the only place where two messages can legitimately share a read is a
//! negotiation marker immediately followed by the next request; see
//! [`split_marker`].

use thiserror::Error;

use crate::domain::gateway::{DirEntry, FileProperties};
use crate::protocol::messages::{
    Command, Response, Verb, CANCEL_MARKER, CONTINUE_MARKER, DELIMITER, DELIMITER_STR,
    FAILURE_MARKER, RECORD_SEPARATOR, SUCCESS_MARKER,
};

/// Errors raised when a message does not follow the wire grammar.
///
/// A correct peer never produces these; they signal a format contract
/// violation rather than a refused request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The first field of a request is not a known verb.
    #[error("unknown verb: {0:?}")]
    UnknownVerb(String),

    /// A request carries fewer parameters than its verb needs.
    #[error("{verb} needs {needed} parameter(s), got {found}")]
    MissingParameter {
        verb: Verb,
        needed: usize,
        found: usize,
    },

    /// A success payload has the wrong number of fields.
    #[error("expected {expected} field(s), got {found}")]
    FieldCount { expected: usize, found: usize },

    /// A field that must be numeric is not.
    #[error("field {field} is not numeric: {value:?}")]
    NotNumeric { field: &'static str, value: String },

    /// Any other structural problem.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Encodes a request as `VERB|param|param...`.
///
/// # Examples
///
/// ```rust
/// use rover_core::protocol::{encode_command, decode_command};
/// use rover_core::{Command, Verb};
///
/// let cmd = Command::new(Verb::Up, ["report.pdf", "1024"]);
/// let wire = encode_command(&cmd);
/// assert_eq!(wire, "UP|report.pdf|1024");
/// assert_eq!(decode_command(&wire).unwrap(), cmd);
/// ```
pub fn encode_command(cmd: &Command) -> String {
    let mut out = String::from(cmd.verb.as_str());
    for param in &cmd.params {
        out.push(DELIMITER);
        out.push_str(param);
    }
    out
}

/// Decodes a request and checks its parameter count.
///
/// Extra parameters are kept; the handler only reads the ones it needs.
///
/// # Errors
///
/// [`ProtocolError::UnknownVerb`] for an unrecognised first field and
/// [`ProtocolError::MissingParameter`] when parameters are missing.
pub fn decode_command(message: &str) -> Result<Command, ProtocolError> {
    let mut fields = message.split(DELIMITER);
    let head = fields.next().unwrap_or_default();
    let verb = Verb::try_from(head).map_err(|()| ProtocolError::UnknownVerb(head.to_string()))?;
    let params: Vec<String> = fields.map(str::to_string).collect();

    let needed = verb.required_params();
    if params.len() < needed {
        return Err(ProtocolError::MissingParameter {
            verb,
            needed,
            found: params.len(),
        });
    }
    Ok(Command { verb, params })
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// Encodes a reply.  A failure without a message is the bare failure marker.
pub fn encode_response(resp: &Response) -> String {
    match resp {
        Response::Success(fields) => fields.join(DELIMITER_STR),
        Response::Failure(Some(message)) => {
            format!("{FAILURE_MARKER}{DELIMITER}{}", message.replace(DELIMITER, ""))
        }
        Response::Failure(None) => FAILURE_MARKER.to_string(),
    }
}

/// Classifies a reply.
///
/// An empty reply, or one whose first field is the failure or cancel marker,
/// is a failure regardless of what follows.  The second field, when present
/// and non-empty, is the failure message.
pub fn decode_response(message: &str) -> Response {
    if message.is_empty() {
        return Response::Failure(None);
    }
    let fields: Vec<String> = message.split(DELIMITER).map(str::to_string).collect();
    match fields[0].as_str() {
        FAILURE_MARKER | CANCEL_MARKER => {
            let text = fields.get(1).filter(|m| !m.is_empty()).cloned();
            Response::Failure(text)
        }
        _ => Response::Success(fields),
    }
}

// ── Listings ──────────────────────────────────────────────────────────────────

/// Encodes a directory listing reply: a leading delimiter, then one
/// `name|size` record per entry, each terminated by a newline.
pub fn encode_listing(entries: &[DirEntry]) -> String {
    let mut out = String::from(DELIMITER);
    for entry in entries {
        out.push_str(&entry.name.replace([DELIMITER, RECORD_SEPARATOR], ""));
        out.push(DELIMITER);
        out.push_str(&entry.size.to_string());
        out.push(RECORD_SEPARATOR);
    }
    out
}

/// Rebuilds `(name, size)` entries from the fields of a listing reply.
///
/// The records were split apart by the generic reply decoding, so every
/// field after the first is re-joined before splitting on newlines.  An
/// empty listing yields no entries.
///
/// # Errors
///
/// [`ProtocolError::FieldCount`] for a record that is not `name|size` and
/// [`ProtocolError::NotNumeric`] for a non-integer size.
pub fn decode_listing(fields: &[String]) -> Result<Vec<DirEntry>, ProtocolError> {
    let body = fields
        .get(1..)
        .unwrap_or_default()
        .join(DELIMITER_STR);
    let body = body.trim_end_matches(RECORD_SEPARATOR);
    if body.is_empty() {
        return Ok(Vec::new());
    }

    body.split(RECORD_SEPARATOR)
        .map(|record| {
            let parts: Vec<&str> = record.split(DELIMITER).collect();
            if parts.len() != 2 {
                return Err(ProtocolError::FieldCount {
                    expected: 2,
                    found: parts.len(),
                });
            }
            let size = parts[1]
                .parse::<i64>()
                .map_err(|_| ProtocolError::NotNumeric {
                    field: "size",
                    value: parts[1].to_string(),
                })?;
            if size < -1 {
                return Err(ProtocolError::MalformedPayload(format!(
                    "negative size {size} for {:?}",
                    parts[0]
                )));
            }
            Ok(DirEntry {
                name: parts[0].to_string(),
                size,
            })
        })
        .collect()
}

// ── File properties ───────────────────────────────────────────────────────────

/// Encodes an `INFO` reply.  Timestamps are written as whole seconds.
pub fn encode_properties(props: &FileProperties) -> String {
    format!(
        "{path}{d}{size}{d}{atime}{d}{mtime}",
        path = props.path.replace(DELIMITER, ""),
        size = props.size,
        atime = props.accessed.trunc() as i64,
        mtime = props.modified.trunc() as i64,
        d = DELIMITER,
    )
}

/// Decodes the four fields of an `INFO` reply.
///
/// Timestamps are accepted with or without a fractional part.
///
/// # Errors
///
/// [`ProtocolError::FieldCount`] unless exactly four fields are present, and
/// [`ProtocolError::NotNumeric`] for a bad size or timestamp.
pub fn decode_properties(fields: &[String]) -> Result<FileProperties, ProtocolError> {
    if fields.len() != 4 {
        return Err(ProtocolError::FieldCount {
            expected: 4,
            found: fields.len(),
        });
    }
    let size = parse_size(&fields[1])?;
    let accessed = parse_timestamp("atime", &fields[2])?;
    let modified = parse_timestamp("mtime", &fields[3])?;
    Ok(FileProperties {
        path: fields[0].clone(),
        size,
        accessed,
        modified,
    })
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<f64, ProtocolError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .ok_or_else(|| ProtocolError::NotNumeric {
            field,
            value: value.to_string(),
        })
}

/// Parses a byte count sent during a negotiation.
///
/// Only plain ASCII digits are accepted: no sign, no whitespace.
///
/// # Errors
///
/// [`ProtocolError::NotNumeric`] for anything else, including values that
/// overflow `u64`.
pub fn parse_size(value: &str) -> Result<u64, ProtocolError> {
    let not_numeric = || ProtocolError::NotNumeric {
        field: "size",
        value: value.to_string(),
    };
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(not_numeric());
    }
    value.parse::<u64>().map_err(|_| not_numeric())
}

// ── Negotiation markers ───────────────────────────────────────────────────────

/// Splits a leading negotiation marker off `buf`.
///
/// Returns the marker and whatever bytes followed it in the same read (the
/// start of the next request, when the peer wrote both back to back).
/// Returns `None` when `buf` does not start with a marker.
pub fn split_marker(buf: &[u8]) -> Option<(&'static str, &[u8])> {
    // Longest first so no marker shadows another.
    const MARKERS: [&str; 4] = [CONTINUE_MARKER, CANCEL_MARKER, SUCCESS_MARKER, FAILURE_MARKER];
    MARKERS.into_iter().find_map(|marker| {
        let rest = buf.strip_prefix(marker.as_bytes())?;
        // A delimiter directly after the marker belongs to it (`FAIL|why`).
        if rest.first() == Some(&(DELIMITER as u8)) && marker == FAILURE_MARKER {
            return Some((marker, &[][..]));
        }
        Some((marker, rest))
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(s: &str) -> Vec<String> {
        match decode_response(s) {
            Response::Success(f) => f,
            Response::Failure(m) => panic!("expected success, got failure {m:?}"),
        }
    }

    #[test]
    fn test_encode_command_without_params_is_bare_verb() {
        assert_eq!(encode_command(&Command::bare(Verb::Ls)), "LS");
    }

    #[test]
    fn test_decode_command_rejects_unknown_verb() {
        let err = decode_command("RMDIR|x").unwrap_err();
        assert_eq!(err, ProtocolError::UnknownVerb("RMDIR".to_string()));
    }

    #[test]
    fn test_decode_command_rejects_missing_parameter() {
        // Arrange / Act
        let err = decode_command("UP|file.bin").unwrap_err();

        // Assert
        assert_eq!(
            err,
            ProtocolError::MissingParameter {
                verb: Verb::Up,
                needed: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_decode_command_keeps_empty_parameter() {
        let cmd = decode_command("CD|").unwrap();
        assert_eq!(cmd.params, vec![String::new()]);
    }

    #[test]
    fn test_empty_reply_is_failure() {
        assert_eq!(decode_response(""), Response::Failure(None));
    }

    #[test]
    fn test_failure_marker_wins_over_trailing_fields() {
        let resp = decode_response("FAIL|Could not access file.|123|456");
        assert_eq!(resp, Response::fail("Could not access file."));
    }

    #[test]
    fn test_bare_failure_marker_has_no_message() {
        assert_eq!(decode_response("FAIL"), Response::Failure(None));
        assert_eq!(decode_response("FAIL|"), Response::Failure(None));
    }

    #[test]
    fn test_cancel_marker_is_failure() {
        assert!(decode_response("CANCEL").is_failure());
    }

    #[test]
    fn test_success_marker_decodes_as_single_field() {
        assert_eq!(decode_response("WIN"), Response::ok());
    }

    #[test]
    fn test_encode_response_failure_strips_delimiter_from_message() {
        let wire = encode_response(&Response::fail("bad|path"));
        assert_eq!(wire, "FAIL|badpath");
    }

    #[test]
    fn test_listing_wire_form_has_leading_delimiter() {
        let wire = encode_listing(&[DirEntry::file("a", 10), DirEntry::directory("b")]);
        assert_eq!(wire, "|a|10\nb/|-1\n");
    }

    #[test]
    fn test_listing_roundtrip_through_reply_decoding() {
        // Arrange
        let entries = vec![DirEntry::file("a", 10), DirEntry::directory("b")];

        // Act
        let decoded = decode_listing(&fields(&encode_listing(&entries))).unwrap();

        // Assert
        assert_eq!(decoded, entries);
        assert_eq!(decoded[1].name, "b/");
        assert!(decoded[1].is_directory());
    }

    #[test]
    fn test_empty_listing_decodes_to_no_entries() {
        let decoded = decode_listing(&fields(&encode_listing(&[]))).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_listing_with_non_numeric_size_is_protocol_error() {
        let err = decode_listing(&fields("|a|ten\n")).unwrap_err();
        assert!(matches!(err, ProtocolError::NotNumeric { field: "size", .. }));
    }

    #[test]
    fn test_listing_with_missing_size_is_field_count_error() {
        let err = decode_listing(&fields("|a|1\nb\n")).unwrap_err();
        assert_eq!(err, ProtocolError::FieldCount { expected: 2, found: 1 });
    }

    #[test]
    fn test_properties_encode_truncates_timestamps() {
        let props = FileProperties {
            path: "filespace:/notes.txt".to_string(),
            size: 42,
            accessed: 1_700_000_000.75,
            modified: 1_600_000_000.25,
        };
        assert_eq!(
            encode_properties(&props),
            "filespace:/notes.txt|42|1700000000|1600000000"
        );
    }

    #[test]
    fn test_properties_decode_accepts_fractional_timestamps() {
        let props = decode_properties(&fields("/x|7|1.5|2.25")).unwrap();
        assert_eq!(props.size, 7);
        assert_eq!(props.accessed, 1.5);
        assert_eq!(props.modified, 2.25);
    }

    #[test]
    fn test_properties_with_three_fields_is_field_count_error() {
        let err = decode_properties(&fields("/x|7|1")).unwrap_err();
        assert_eq!(err, ProtocolError::FieldCount { expected: 4, found: 3 });
    }

    #[test]
    fn test_parse_size_rejects_sign_and_whitespace() {
        assert!(parse_size("-1").is_err());
        assert!(parse_size("+1").is_err());
        assert!(parse_size(" 1").is_err());
        assert!(parse_size("").is_err());
        assert_eq!(parse_size("0"), Ok(0));
        assert_eq!(parse_size("8192"), Ok(8192));
    }

    #[test]
    fn test_parse_size_rejects_overflow() {
        assert!(parse_size("99999999999999999999999").is_err());
    }

    #[test]
    fn test_split_marker_returns_coalesced_request() {
        let (marker, rest) = split_marker(b"WINLS").unwrap();
        assert_eq!(marker, SUCCESS_MARKER);
        assert_eq!(rest, b"LS");
    }

    #[test]
    fn test_split_marker_on_exact_marker_has_empty_rest() {
        let (marker, rest) = split_marker(b"CANCEL").unwrap();
        assert_eq!(marker, CANCEL_MARKER);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_split_marker_swallows_failure_message() {
        let (marker, rest) = split_marker(b"FAIL|nope").unwrap();
        assert_eq!(marker, FAILURE_MARKER);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_split_marker_none_for_request() {
        assert!(split_marker(b"LS").is_none());
        assert!(split_marker(b"").is_none());
    }
}
