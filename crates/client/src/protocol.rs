//! INSTREAM chunk framing.
//!
//! Wire format after the `zINSTREAM\0` request line:
//! - Chunk: `[4B len_be][len bytes]`
//! - End of stream: `[4B 0]`

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, BytesMut};

/// Length prefix size: 4 bytes, unsigned big-endian.
const LEN_PREFIX: usize = 4;

/// Upper bound for [`read_chunks`] when the caller has no better limit
/// (clamd's default `StreamMaxLength` is 25 MB).
pub const DEFAULT_MAX_STREAM_LEN: usize = 25 * 1024 * 1024;

/// Append one `{len}{data}` chunk to `buf`.
fn encode_chunk(data: &[u8], buf: &mut impl BufMut) -> io::Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk too large"))?;
    buf.put_u32(len);
    buf.put_slice(data);
    Ok(())
}

fn read_some<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

/// Copy `source` to `sink` as INSTREAM chunks of at most `chunk_size` bytes,
/// then write the zero-length end marker. Returns the payload bytes sent.
///
/// # Errors
///
/// Returns an error if `chunk_size` is zero or does not fit the length
/// prefix, or if reading the source or writing the sink fails.
pub fn write_chunks<R, W>(source: &mut R, sink: &mut W, chunk_size: usize) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    if chunk_size == 0 || u32::try_from(chunk_size).is_err() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid INSTREAM chunk size {chunk_size}"),
        ));
    }

    let mut data = vec![0u8; chunk_size];
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + chunk_size);
    let mut total = 0u64;

    loop {
        let n = read_some(source, &mut data)?;
        buf.clear();
        encode_chunk(&data[..n], &mut buf)?;
        sink.write_all(&buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
    }

    sink.flush()?;
    Ok(total)
}

/// Read INSTREAM chunks up to and including the end marker and return the
/// reassembled payload. This is the daemon side of [`write_chunks`].
///
/// # Errors
///
/// Returns an error if the stream ends early or the payload exceeds
/// `max_len`.
pub fn read_chunks<R: Read + ?Sized>(r: &mut R, max_len: usize) -> io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    let mut header = [0u8; LEN_PREFIX];

    loop {
        r.read_exact(&mut header)?;
        let len = (&header[..]).get_u32() as usize;
        if len == 0 {
            return Ok(payload);
        }
        if payload.len() + len > max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "INSTREAM size limit exceeded",
            ));
        }
        let start = payload.len();
        payload.resize(start + len, 0);
        r.read_exact(&mut payload[start..])?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that hands out at most one byte per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some((first, rest)) = self.0.split_first() else {
                return Ok(0);
            };
            if buf.is_empty() {
                return Ok(0);
            }
            buf[0] = *first;
            self.0 = rest;
            Ok(1)
        }
    }

    /// Split an encoded stream back into chunk lengths, asserting layout.
    fn chunk_lengths(mut wire: &[u8]) -> Vec<usize> {
        let mut lens = Vec::new();
        loop {
            let len = wire.get_u32() as usize;
            lens.push(len);
            if len == 0 {
                assert!(wire.is_empty(), "bytes after end marker");
                return lens;
            }
            wire.advance(len);
        }
    }

    #[test]
    fn splits_into_sized_chunks() {
        let data: Vec<u8> = (0u8..10).collect();
        let mut wire = Vec::new();
        let sent = write_chunks(&mut &data[..], &mut wire, 4).unwrap();
        assert_eq!(sent, 10);
        assert_eq!(chunk_lengths(&wire), vec![4, 4, 2, 0]);
        assert_eq!(&wire[..8], &[0, 0, 0, 4, 0, 1, 2, 3]);
        assert_eq!(&wire[wire.len() - 4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn empty_source_sends_only_end_marker() {
        let mut wire = Vec::new();
        let sent = write_chunks(&mut io::empty(), &mut wire, 2048).unwrap();
        assert_eq!(sent, 0);
        assert_eq!(wire, [0, 0, 0, 0]);
    }

    #[test]
    fn short_reads_never_exceed_chunk_size() {
        let data = b"abcdefg";
        let mut wire = Vec::new();
        write_chunks(&mut Trickle(data), &mut wire, 3).unwrap();
        let lens = chunk_lengths(&wire);
        assert_eq!(lens.iter().filter(|&&l| l == 0).count(), 1);
        assert!(lens.iter().all(|&l| l <= 3));
        assert_eq!(lens.iter().sum::<usize>(), data.len());
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = write_chunks(&mut &b"x"[..], &mut Vec::new(), 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn read_chunks_reassembles_payload() {
        let data: Vec<u8> = (0..=255).collect();
        let mut wire = Vec::new();
        write_chunks(&mut &data[..], &mut wire, 100).unwrap();
        let payload = read_chunks(&mut &wire[..], DEFAULT_MAX_STREAM_LEN).unwrap();
        assert_eq!(payload, data);
    }

    #[test]
    fn read_chunks_enforces_limit() {
        let mut wire = Vec::new();
        write_chunks(&mut &[1u8; 16][..], &mut wire, 8).unwrap();
        assert!(read_chunks(&mut &wire[..], 10).is_err());
    }

    #[test]
    fn read_chunks_rejects_truncated_stream() {
        let wire = [0u8, 0, 0, 5, 1, 2];
        assert!(read_chunks(&mut &wire[..], DEFAULT_MAX_STREAM_LEN).is_err());
    }
}
