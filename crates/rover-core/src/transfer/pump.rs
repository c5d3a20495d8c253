//! The chunked copy loop shared by both transfer directions.

use std::io::{self, ErrorKind, Read, Write};

use crate::protocol::messages::BUFFER_SIZE;

/// Copies exactly `total` bytes from `reader` to `writer` in chunks of at
/// most [`BUFFER_SIZE`], calling `progress` after every chunk.
///
/// A read that returns zero bytes before `total` is reached is an error:
/// the peer closed early or the file shrank.
pub(crate) fn pump<R, W, F>(reader: &mut R, writer: &mut W, total: u64, mut progress: F) -> io::Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
    F: FnMut(u64),
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut done: u64 = 0;
    while done < total {
        let want = usize::try_from(total - done).map_or(BUFFER_SIZE, |r| r.min(BUFFER_SIZE));
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("stream ended after {done} of {total} bytes"),
                ))
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        done += n as u64;
        progress(n as u64);
    }
    writer.flush()
}
