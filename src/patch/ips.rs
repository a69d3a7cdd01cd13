//! IPS: https://zerosoft.zophar.net/ips.php
//!
//! IPS is an overlay format. `start` copies the source verbatim into the
//! output; each hunk then patches a byte range of that copy in place.

use super::FormatError;
use byteorder::{ReadBytesExt, BE};
use std::io;
use std::io::prelude::*;
use std::io::SeekFrom;

pub const MAGIC: &[u8] = b"PATCH";
const FOOTER: &[u8] = b"EOF";

/// Copies `rom` onto `output` in full, establishing the overlay base.
/// `rom` and `output` are left at their respective ends.
pub fn start(rom: &mut (impl Read + Seek), output: &mut (impl Write + Seek)) -> io::Result<()> {
  rom.seek(SeekFrom::Start(0))?;
  output.seek(SeekFrom::Start(0))?;
  io::copy(rom, output)?;
  Ok(())
}

/// Applies the next hunk, or reports `Done` at the footer.
pub fn next(
  patch: &mut impl Read,
  output: &mut (impl Write + Seek),
) -> io::Result<Result<super::IterStatus, FormatError>> {
  let mut head = [0u8; 3];
  let read = read_up_to(patch, &mut head)?;
  if read == 0 {
    return Ok(Ok(super::IterStatus::Done));
  }
  if read < 3 {
    log::warn!("IPS patch ended with a truncated hunk header ({read} of 3 bytes)");
    return Ok(Err(FormatError::Truncated));
  }
  if &head == FOOTER {
    return Ok(Ok(super::IterStatus::Done));
  }

  let offset = u64::from(u32::from_be_bytes([0, head[0], head[1], head[2]]));
  let length = patch.read_u16::<BE>()?;
  output.seek(SeekFrom::Start(offset))?;

  if length == 0 {
    let rle_length = patch.read_u24::<BE>()?;
    let rle_value = patch.read_u8()?;
    let mut remaining = u64::from(rle_length);
    let fill = [rle_value; 4096];
    while remaining > 0 {
      let chunk = remaining.min(fill.len() as u64) as usize;
      output.write_all(&fill[..chunk])?;
      remaining -= chunk as u64;
    }
  } else {
    let mut remaining = u64::from(length);
    let mut buf = [0u8; 4096];
    while remaining > 0 {
      let chunk = remaining.min(buf.len() as u64) as usize;
      patch.read_exact(&mut buf[..chunk])?;
      output.write_all(&buf[..chunk])?;
      remaining -= chunk as u64;
    }
  }

  Ok(Ok(super::IterStatus::Next))
}

/// Reads up to `buf.len()` bytes, stopping short only at a clean EOF (never
/// returning a partial read in the middle of a would-be short read error).
fn read_up_to(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
  let mut filled = 0;
  while filled < buf.len() {
    match r.read(&mut buf[filled..])? {
      0 => break,
      n => filled += n,
    }
  }
  Ok(filled)
}
