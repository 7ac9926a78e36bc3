//! Decoder for the `aws-chunked` transfer encoding used by streaming
//! `STREAMING-AWS4-HMAC-SHA256-PAYLOAD` uploads.
//!
//! Each chunk is `HEXSIZE;chunk-signature=<sig>\r\n<size bytes>\r\n`,
//! terminated by a zero-size chunk and a trailing `\r\n`. Chunk signatures
//! are parsed but not verified against a rolling SigV4 key — see the design
//! notes on streaming verification.

use crate::errors::S3Error;

/// Decode a full aws-chunked body into its contiguous payload.
pub fn decode(body: &[u8]) -> Result<Vec<u8>, S3Error> {
    let mut out = Vec::with_capacity(body.len());
    let mut pos = 0usize;

    loop {
        let line_end = find_crlf(body, pos).ok_or_else(|| {
            S3Error::InvalidArgument("truncated aws-chunked stream: missing chunk header".into())
        })?;
        let header = std::str::from_utf8(&body[pos..line_end])
            .map_err(|_| S3Error::InvalidArgument("non-UTF-8 chunk header".into()))?;
        let size_str = header.split(';').next().unwrap_or("");
        let size = usize::from_str_radix(size_str.trim(), 16)
            .map_err(|_| S3Error::InvalidArgument("invalid chunk size".into()))?;

        pos = line_end + 2;

        if size == 0 {
            // Trailing CRLF after the terminal zero-size chunk.
            if body.len() >= pos + 2 && &body[pos..pos + 2] == b"\r\n" {
                pos += 2;
            }
            break;
        }

        if pos + size + 2 > body.len() {
            return Err(S3Error::InvalidArgument(
                "truncated aws-chunked stream: short chunk body".into(),
            ));
        }
        out.extend_from_slice(&body[pos..pos + size]);
        pos += size;
        if &body[pos..pos + 2] != b"\r\n" {
            return Err(S3Error::InvalidArgument(
                "malformed aws-chunked stream: missing chunk trailer".into(),
            ));
        }
        pos += 2;
    }

    Ok(out)
}

/// Heuristic sniff used by the request pipeline when
/// `x-amz-content-sha256: STREAMING-AWS4-HMAC-SHA256-PAYLOAD` is absent: does
/// the body's first line look like a chunk-size header?
pub fn looks_like_chunked(body: &[u8]) -> bool {
    let Some(line_end) = find_crlf(body, 0) else {
        return false;
    };
    let Ok(header) = std::str::from_utf8(&body[..line_end]) else {
        return false;
    };
    let size_part = header.split(';').next().unwrap_or("");
    !size_part.is_empty()
        && size_part.chars().all(|c| c.is_ascii_hexdigit())
        && header.contains("chunk-signature=")
}

fn find_crlf(body: &[u8], from: usize) -> Option<usize> {
    body[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_round_trip_example() {
        let input =
            b"5;chunk-signature=abc\r\nhello\r\n6;chunk-signature=def\r\n world\r\n0;chunk-signature=end\r\n\r\n";
        let decoded = decode(input).unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn rejects_truncated_stream() {
        let input = b"5;chunk-signature=abc\r\nhel";
        assert!(decode(input).is_err());
    }

    #[test]
    fn empty_body_is_a_single_terminal_chunk() {
        let input = b"0;chunk-signature=end\r\n\r\n";
        assert_eq!(decode(input).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn sniffs_chunk_header() {
        assert!(looks_like_chunked(b"5;chunk-signature=abc\r\nhello\r\n"));
        assert!(!looks_like_chunked(b"hello world"));
    }
}
