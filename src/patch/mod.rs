//! Format detection and the uniform `start`/`next`/`end` hunk-iteration
//! facade over the two supported patch formats.

pub mod bps;
pub mod ips;
pub mod varint;

use std::fmt;
use std::io;
use std::io::prelude::*;
use std::io::SeekFrom;

/// Which patch format a patch stream was identified as.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Kind {
  Unknown,
  Ips,
  Bps,
}

impl fmt::Display for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Kind::Unknown => write!(f, "unknown"),
      Kind::Ips => write!(f, "IPS"),
      Kind::Bps => write!(f, "BPS"),
    }
  }
}

/// Per-job state threaded through `next`. IPS carries none; BPS carries the
/// header fields and running offsets/CRC (see [`bps::State`]).
#[derive(Debug)]
pub enum Context {
  Ips,
  Bps(bps::State),
}

/// Outcome of a single `next` call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IterStatus {
  Next,
  Done,
}

/// A detected-but-non-I/O malformation encountered mid-iteration. Kept
/// distinct from [`TerminalError`] so a caller can tell "the disk
/// misbehaved" apart from "this patch is garbage".
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
  #[error("patch stream ended mid-record")]
  Truncated,
  #[error("variable-length integer overflowed")]
  Overflow,
  #[error("relative offset moved out of bounds")]
  BadOffset,
  #[error("hunk would write past the declared target size")]
  CommandOverrun,
}

impl From<varint::Overflow> for FormatError {
  fn from(_: varint::Overflow) -> Self {
    FormatError::Overflow
  }
}

/// The terminal outcome of a patch job, produced by `start`/`end`.
#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
  #[error("unknown patch type")]
  InvalidHeader,
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error(transparent)]
  Format(#[from] FormatError),
  #[error("invalid input size")]
  InvalidInputSize,
  #[error("invalid output size")]
  InvalidOutputSize,
  #[error("invalid input checksum")]
  InvalidInputChecksum,
  #[error("invalid output checksum")]
  InvalidOutputChecksum,
}

/// Probes `patch` for a recognized magic. On an IPS match the stream is left
/// positioned just past the 5-byte magic; on any other outcome the stream is
/// rewound to the start.
pub fn detect(patch: &mut (impl Read + Seek)) -> io::Result<Kind> {
  patch.seek(SeekFrom::Start(0))?;
  let mut head = [0u8; 5];
  let read = read_up_to(patch, &mut head)?;
  if read == ips::MAGIC.len() && &head[..] == ips::MAGIC {
    return Ok(Kind::Ips);
  }

  patch.seek(SeekFrom::Start(0))?;
  let mut head = [0u8; 4];
  let read = read_up_to(patch, &mut head)?;
  if read == bps::MAGIC.len() && &head[..] == bps::MAGIC {
    return Ok(Kind::Bps);
  }

  patch.seek(SeekFrom::Start(0))?;
  Ok(Kind::Unknown)
}

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

/// Establishes per-job state for the detected `kind`. For IPS this copies
/// the source into the output as the overlay base; for BPS it reads the
/// header. `patch`'s position must be as left by [`detect`].
pub fn start<R, O, P>(
  kind: Kind,
  rom: &mut R,
  patch: &mut P,
  output: &mut O,
) -> Result<Context, TerminalError>
where
  R: Read + Seek,
  O: Write + Seek,
  P: Read + Seek,
{
  match kind {
    Kind::Ips => {
      ips::start(rom, output)?;
      Ok(Context::Ips)
    }
    Kind::Bps => Ok(Context::Bps(bps::start(patch)?)),
    Kind::Unknown => Err(TerminalError::InvalidHeader),
  }
}

/// Advances the job by one hunk/command.
pub fn next<R, O, P>(
  ctx: &mut Context,
  rom: &mut R,
  output: &mut O,
  patch: &mut P,
) -> io::Result<Result<IterStatus, FormatError>>
where
  R: Read + Seek,
  O: Read + Write + Seek,
  P: Read + Seek,
{
  match ctx {
    Context::Ips => ips::next(patch, output),
    Context::Bps(state) => bps::next(state, rom, output, patch),
  }
}

/// Finalizes the job. IPS has no terminal validation; BPS verifies the
/// target CRC against the trailer.
pub fn end(ctx: &Context, patch: &mut impl Read) -> Result<(), TerminalError> {
  match ctx {
    Context::Ips => Ok(()),
    Context::Bps(state) => bps::end(state, patch),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn detects_ips() {
    let mut patch = Cursor::new([ips::MAGIC, b"EOF".as_slice()].concat());
    assert_eq!(detect(&mut patch).unwrap(), Kind::Ips);
    assert_eq!(patch.stream_position().unwrap(), ips::MAGIC.len() as u64);
  }

  #[test]
  fn detects_bps() {
    let mut patch = Cursor::new(bps::MAGIC.to_vec());
    assert_eq!(detect(&mut patch).unwrap(), Kind::Bps);
  }

  #[test]
  fn unknown_rewinds_and_is_terminal() {
    let mut patch = Cursor::new(b"NOPE".to_vec());
    assert_eq!(detect(&mut patch).unwrap(), Kind::Unknown);
    assert_eq!(patch.stream_position().unwrap(), 0);

    let mut rom = Cursor::new(Vec::new());
    let mut output = Cursor::new(Vec::new());
    let result = start(Kind::Unknown, &mut rom, &mut patch, &mut output);
    assert!(matches!(result, Err(TerminalError::InvalidHeader)));
  }
}
