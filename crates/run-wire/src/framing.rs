//! Output framing.
//!
//! Version 1 of the framing uses a 4-byte unsigned little-endian length
//! trailer. The status code travels inside the serialized response, never
//! in the trailer.

use crate::error::{WireError, WireResult};

/// Framing revision spoken by this host and the bundled guest SDK.
pub const FRAMING_VERSION: u8 = 1;

/// Width of the length trailer in bytes.
pub const TRAILER_LEN: usize = 4;

/// A decoded guest output buffer, borrowing from the captured stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output<'a> {
    /// Everything the guest wrote before the response.
    pub logs: &'a [u8],
    /// The serialized response envelope.
    pub response: &'a [u8],
}

impl Output<'_> {
    pub fn log_lines(&self) -> Vec<String> {
        split_log_lines(self.logs)
    }
}

/// Split captured stdout into `(logs, response)` using the trailer.
pub fn decode_output(buf: &[u8]) -> WireResult<Output<'_>> {
    if buf.len() < TRAILER_LEN {
        return Err(WireError::Truncated {
            len: buf.len(),
            expected: TRAILER_LEN,
        });
    }

    let trailer_start = buf.len() - TRAILER_LEN;
    let mut trailer = [0u8; TRAILER_LEN];
    trailer.copy_from_slice(&buf[trailer_start..]);
    let declared = u32::from_le_bytes(trailer) as usize;

    if declared > trailer_start {
        return Err(WireError::LengthOverflow {
            declared,
            available: trailer_start,
        });
    }

    let response_start = trailer_start - declared;
    Ok(Output {
        logs: &buf[..response_start],
        response: &buf[response_start..trailer_start],
    })
}

/// Build a guest output buffer: logs, then the response, then the trailer.
pub fn encode_output(logs: &[u8], response: &[u8]) -> WireResult<Vec<u8>> {
    let len = u32::try_from(response.len())
        .map_err(|_| WireError::ResponseTooLarge(response.len()))?;

    let mut out = Vec::with_capacity(logs.len() + response.len() + TRAILER_LEN);
    out.extend_from_slice(logs);
    out.extend_from_slice(response);
    out.extend_from_slice(&len.to_le_bytes());
    Ok(out)
}

/// Split log bytes into lines.
///
/// Only `\n` terminates a line; a dangling tail with no terminator is
/// dropped. A `\r` before the terminator is trimmed.
pub fn split_log_lines(logs: &[u8]) -> Vec<String> {
    logs.split_inclusive(|b| *b == b'\n')
        .filter_map(|chunk| chunk.strip_suffix(b"\n"))
        .map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8_lossy(line).into_owned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_response_without_logs() {
        let buf = encode_output(b"", b"payload").unwrap();
        let out = decode_output(&buf).unwrap();
        assert!(out.logs.is_empty());
        assert_eq!(out.response, b"payload");
        assert!(out.log_lines().is_empty());
    }

    #[test]
    fn decode_logs_and_response() {
        let buf = encode_output(b"hello\nworld\n", b"\x0a\x02ok").unwrap();
        let out = decode_output(&buf).unwrap();
        assert_eq!(out.response, b"\x0a\x02ok");
        assert_eq!(out.log_lines(), vec!["hello", "world"]);
    }

    #[test]
    fn decode_empty_response() {
        let out = decode_output(&[0, 0, 0, 0]).unwrap();
        assert!(out.response.is_empty());
        assert!(out.logs.is_empty());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        for len in 0..TRAILER_LEN {
            let buf = vec![1u8; len];
            let err = decode_output(&buf).unwrap_err();
            assert!(matches!(err, WireError::Truncated { len: l, .. } if l == len));
        }
    }

    #[test]
    fn decode_rejects_overlong_declared_length() {
        let mut buf = b"abc".to_vec();
        buf.extend_from_slice(&4u32.to_le_bytes());
        let err = decode_output(&buf).unwrap_err();
        assert!(matches!(
            err,
            WireError::LengthOverflow {
                declared: 4,
                available: 3
            }
        ));

        let err = decode_output(&u32::MAX.to_le_bytes()).unwrap_err();
        assert!(matches!(err, WireError::LengthOverflow { available: 0, .. }));
    }

    #[test]
    fn trailer_is_little_endian() {
        let buf = encode_output(b"", &[7u8; 258]).unwrap();
        assert_eq!(&buf[buf.len() - TRAILER_LEN..], &[2, 1, 0, 0]);
    }

    #[test]
    fn unterminated_tail_is_discarded() {
        assert_eq!(split_log_lines(b"one\ntwo\npartial"), vec!["one", "two"]);
        assert!(split_log_lines(b"no newline at all").is_empty());
    }

    #[test]
    fn carriage_returns_and_blank_lines() {
        assert_eq!(split_log_lines(b"a\r\n\nb\n"), vec!["a", "", "b"]);
    }
}
