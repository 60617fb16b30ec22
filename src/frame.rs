//! Length-prefixed framing for the two transfer modes.
//!
//! ```text
//! message: [4 bytes: payload length (u32-be)] [payload]
//! bulk:    [20 ascii digits: item count] [20 ascii digits: payload length] [payload]
//! ```
//!
//! The payload is always canonical text. A declared length of zero means
//! "no message".

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{self, Record};
use crate::error::{EncodingError, FrameError};

pub const MESSAGE_HEADER_LEN: usize = 4;

/// Width of each decimal field of a bulk header.
pub const BULK_FIELD_WIDTH: usize = 20;

pub const BULK_HEADER_LEN: usize = 2 * BULK_FIELD_WIDTH;

/// A decoded bulk frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFrame {
    pub item_count: u64,
    pub payload: Vec<u8>,
}

pub fn message_frame(payload: &[u8], max_size: usize) -> Result<Vec<u8>, EncodingError> {
    let too_large = || EncodingError::FrameTooLarge {
        size: payload.len(),
        max: max_size.min(u32::MAX as usize),
    };

    if payload.len() > max_size {
        return Err(too_large());
    }

    let len = u32::try_from(payload.len()).map_err(|_| too_large())?;

    let mut frame = Vec::with_capacity(MESSAGE_HEADER_LEN + payload.len());

    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);

    Ok(frame)
}

pub fn bulk_frame(item_count: usize, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(BULK_HEADER_LEN + payload.len());

    frame.extend_from_slice(format!("{item_count:020}").as_bytes());
    frame.extend_from_slice(format!("{:020}", payload.len()).as_bytes());
    frame.extend_from_slice(payload);

    frame
}

/// Canonical text of `record` in a message frame.
pub fn frame_record<T: Record>(record: &T, max_size: usize) -> Result<Vec<u8>, EncodingError> {
    message_frame(codec::encode(record)?.as_bytes(), max_size)
}

/// Canonical text of `records` in a bulk frame.
pub fn frame_chain<T: Record>(records: &[T]) -> Result<Vec<u8>, EncodingError> {
    Ok(bulk_frame(records.len(), codec::encode_seq(records)?.as_bytes()))
}

/// Reads one message frame.
///
/// Returns `None` when the source is closed before a header starts or when
/// the declared length is zero.
pub async fn read_message_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0; MESSAGE_HEADER_LEN];

    if !read_header(reader, &mut header).await? {
        return Ok(None);
    }

    let len = u32::from_be_bytes(header) as u64;

    read_payload(reader, len, max_size).await
}

/// Reads one bulk frame, the 40 header bytes first.
pub async fn read_bulk_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<BulkFrame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0; BULK_HEADER_LEN];

    if !read_header(reader, &mut header).await? {
        return Ok(None);
    }

    let item_count = parse_decimal(&header[..BULK_FIELD_WIDTH])?;
    let len = parse_decimal(&header[BULK_FIELD_WIDTH..])?;

    Ok(read_payload(reader, len, max_size).await?
        .map(|payload| BulkFrame { item_count, payload }))
}

fn parse_decimal(field: &[u8]) -> Result<u64, FrameError> {
    std::str::from_utf8(field).ok()
        .filter(|digits| digits.bytes().all(|byte| byte.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| FrameError::InvalidHeader(String::from_utf8_lossy(field).into_owned()))
}

/// Fills `header` completely. `false` when the source was already closed.
async fn read_header<R>(reader: &mut R, header: &mut [u8]) -> Result<bool, FrameError>
where
    R: AsyncRead + Unpin,
{
    match fill(reader, header).await? {
        0 => Ok(false),

        received if received == header.len() => Ok(true),

        received => Err(FrameError::Truncated {
            expected: header.len(),
            received,
        }),
    }
}

async fn read_payload<R>(reader: &mut R, len: u64, max_size: usize) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    if len == 0 {
        return Ok(None);
    }

    let len = usize::try_from(len).ok()
        .filter(|len| *len <= max_size)
        .ok_or(FrameError::TooLarge {
            size: len,
            max: max_size,
        })?;

    let mut payload = vec![0; len];
    let received = fill(reader, &mut payload).await?;

    if received < len {
        return Err(FrameError::Truncated {
            expected: len,
            received,
        });
    }

    Ok(Some(payload))
}

/// Reads until `buf` is full or the source ends, returning the bytes read.
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            read => filled += read,
        }
    }

    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1 << 20;

    fn payloads() -> Vec<Vec<u8>> {
        vec![
            b"x".to_vec(),
            b"{\"_type\":\"Peer\"}".to_vec(),
            (0..70_000).map(|i| b'a' + (i % 26) as u8).collect(),
        ]
    }

    #[test]
    fn message_header_is_big_endian() {
        let frame = message_frame(&[7; 258], MAX).unwrap();

        assert_eq!(&frame[..4], &[0, 0, 1, 2]);
        assert_eq!(frame.len(), 262);
    }

    #[test]
    fn bulk_header_is_zero_padded_decimal() {
        let frame = bulk_frame(3, b"abcde");

        assert_eq!(&frame[..40], b"0000000000000000000300000000000000000005");
        assert_eq!(&frame[40..], b"abcde");
    }

    #[test]
    fn oversized_message_is_rejected() {
        assert!(matches!(
            message_frame(&[0; 11], 10),
            Err(EncodingError::FrameTooLarge { size: 11, max: 10 })
        ));
    }

    #[tokio::test]
    async fn message_frames_round_trip() {
        for payload in payloads() {
            let frame = message_frame(&payload, MAX).unwrap();
            let mut source = frame.as_slice();

            assert_eq!(read_message_frame(&mut source, MAX).await.unwrap(), Some(payload));
            assert!(source.is_empty());
        }
    }

    #[tokio::test]
    async fn bulk_frames_round_trip() {
        for payload in payloads() {
            let frame = bulk_frame(2, &payload);
            let mut source = frame.as_slice();

            let decoded = read_bulk_frame(&mut source, MAX).await.unwrap().unwrap();

            assert_eq!(decoded.item_count, 2);
            assert_eq!(decoded.payload, payload);
        }
    }

    #[tokio::test]
    async fn zero_length_is_no_message() {
        let frame = message_frame(&[], MAX).unwrap();
        assert_eq!(frame, vec![0; 4]);
        assert_eq!(read_message_frame(&mut frame.as_slice(), MAX).await.unwrap(), None);

        let frame = bulk_frame(0, &[]);
        assert_eq!(read_bulk_frame(&mut frame.as_slice(), MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn closed_source_is_no_message() {
        let mut source: &[u8] = &[];

        assert_eq!(read_message_frame(&mut source, MAX).await.unwrap(), None);
        assert_eq!(read_bulk_frame(&mut source, MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn consecutive_frames() {
        let mut stream = message_frame(b"first", MAX).unwrap();
        stream.extend(message_frame(b"second", MAX).unwrap());

        let mut source = stream.as_slice();

        assert_eq!(read_message_frame(&mut source, MAX).await.unwrap().unwrap(), b"first");
        assert_eq!(read_message_frame(&mut source, MAX).await.unwrap().unwrap(), b"second");
        assert_eq!(read_message_frame(&mut source, MAX).await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_frames() {
        let frame = message_frame(b"hello", MAX).unwrap();

        assert!(matches!(
            read_message_frame(&mut &frame[..6], MAX).await,
            Err(FrameError::Truncated { expected: 5, received: 2 })
        ));

        assert!(matches!(
            read_message_frame(&mut &frame[..2], MAX).await,
            Err(FrameError::Truncated { expected: 4, received: 2 })
        ));
    }

    #[tokio::test]
    async fn declared_length_over_limit() {
        let frame = message_frame(&[1; 64], MAX).unwrap();

        assert!(matches!(
            read_message_frame(&mut frame.as_slice(), 32).await,
            Err(FrameError::TooLarge { size: 64, max: 32 })
        ));
    }

    #[tokio::test]
    async fn bulk_header_must_be_digits() {
        let mut frame = bulk_frame(1, b"[]");
        frame[5] = b'x';

        assert!(matches!(
            read_bulk_frame(&mut frame.as_slice(), MAX).await,
            Err(FrameError::InvalidHeader(_))
        ));
    }
}
