//! BPS (a.k.a. beat): https://www.romhacking.net/documents/746/
//!
//! Unlike IPS, BPS carries explicit source/target sizes and a trailing
//! CRC-32 of the target, so `end` can positively confirm the result.

use super::varint;
use super::FormatError;
use crate::crc;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io;
use std::io::prelude::*;
use std::io::SeekFrom;

pub const MAGIC: &[u8] = b"BPS1";
const TRAILER_LEN: u64 = 12;

/// Per-job BPS state, threaded through every `next` call until `end`.
#[derive(Debug)]
pub struct State {
  pub source_size: u64,
  pub target_size: u64,
  pub metadata_size: u64,
  patch_size: u64,
  output_offset: u64,
  source_relative_offset: i64,
  target_relative_offset: i64,
  output_crc: u32,
}

impl State {
  pub fn output_offset(&self) -> u64 {
    self.output_offset
  }
}

/// Reads the header (patch stream positioned just past the 4-byte magic)
/// and establishes `patch_size` by seeking to the end and back.
pub fn start(patch: &mut (impl Read + Seek)) -> io::Result<State> {
  let after_magic = patch.stream_position()?;
  let patch_size = patch.seek(SeekFrom::End(0))?;
  patch.seek(SeekFrom::Start(after_magic))?;

  let source_size = read_size(patch)?;
  let target_size = read_size(patch)?;
  let metadata_size = read_size(patch)?;
  patch.seek(SeekFrom::Current(metadata_size as i64))?;

  log::debug!(
    "BPS header: source_size={source_size} target_size={target_size} metadata_size={metadata_size}"
  );

  Ok(State {
    source_size,
    target_size,
    metadata_size,
    patch_size,
    output_offset: 0,
    source_relative_offset: 0,
    target_relative_offset: 0,
    output_crc: 0,
  })
}

fn read_size(patch: &mut impl Read) -> io::Result<u64> {
  match varint::read_number(patch)? {
    Ok(v) => Ok(v),
    Err(varint::Overflow) => Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow")),
  }
}

pub fn next<R, O, P>(
  state: &mut State,
  rom: &mut R,
  output: &mut O,
  patch: &mut P,
) -> io::Result<Result<super::IterStatus, FormatError>>
where
  R: Read + Seek,
  O: Read + Write + Seek,
  P: Read + Seek,
{
  let patch_pos = patch.stream_position().map_err(|e| {
    log::error!("failed to read patch stream position: {e}");
    e
  })?;
  if patch_pos >= state.patch_size.saturating_sub(TRAILER_LEN) {
    return Ok(Ok(super::IterStatus::Done));
  }

  let v = match varint::read_number(patch)? {
    Ok(v) => v,
    Err(varint::Overflow) => {
      log::error!("command varint overflowed at patch offset {patch_pos}");
      return Ok(Err(FormatError::Overflow));
    }
  };
  let command = v & 0b11;
  let length = (v >> 2) + 1;
  log::trace!("BPS command {command} length {length} at output offset {}", state.output_offset);

  seek(output, state.output_offset, "output")?;

  match command {
    0 => {
      // SourceRead
      seek(rom, state.output_offset, "source")?;
      copy_with_crc(length, rom, output, &mut state.output_crc)?;
    }
    1 => {
      // TargetRead
      copy_with_crc(length, patch, output, &mut state.output_crc)?;
    }
    2 => {
      // SourceCopy
      let delta = match varint::read_number(patch)? {
        Ok(v) => varint::decode_signed(v),
        Err(varint::Overflow) => {
          log::error!("SourceCopy delta varint overflowed at patch offset {patch_pos}");
          return Ok(Err(FormatError::Overflow));
        }
      };
      let Some(new_offset) = state.source_relative_offset.checked_add(delta) else {
        log::error!("SourceCopy delta moved source offset out of range");
        return Ok(Err(FormatError::BadOffset));
      };
      state.source_relative_offset = new_offset;
      if state.source_relative_offset < 0 {
        log::error!("SourceCopy offset went negative: {}", state.source_relative_offset);
        return Ok(Err(FormatError::BadOffset));
      }
      seek(rom, state.source_relative_offset as u64, "source")?;
      copy_with_crc(length, rom, output, &mut state.output_crc)?;
      state.source_relative_offset += length as i64;
    }
    3 => {
      // TargetCopy: byte-by-byte, since the read cursor may trail the write
      // cursor within the same command (self-referential RLE-like fills).
      let delta = match varint::read_number(patch)? {
        Ok(v) => varint::decode_signed(v),
        Err(varint::Overflow) => {
          log::error!("TargetCopy delta varint overflowed at patch offset {patch_pos}");
          return Ok(Err(FormatError::Overflow));
        }
      };
      let Some(new_offset) = state.target_relative_offset.checked_add(delta) else {
        log::error!("TargetCopy delta moved target offset out of range");
        return Ok(Err(FormatError::BadOffset));
      };
      state.target_relative_offset = new_offset;
      if state.target_relative_offset < 0 {
        log::error!("TargetCopy offset went negative: {}", state.target_relative_offset);
        return Ok(Err(FormatError::BadOffset));
      }
      for _ in 0..length {
        seek(output, state.target_relative_offset as u64, "output (read side)")?;
        let mut byte = [0u8; 1];
        output.read_exact(&mut byte).map_err(|e| {
          log::error!("TargetCopy read at offset {} failed: {e}", state.target_relative_offset);
          e
        })?;
        seek(output, state.output_offset, "output (write side)")?;
        output.write_all(&byte).map_err(|e| {
          log::error!("TargetCopy write at offset {} failed: {e}", state.output_offset);
          e
        })?;
        state.output_crc = crc::update(state.output_crc, &byte);
        state.output_offset += 1;
        state.target_relative_offset += 1;
      }
      if state.output_offset > state.target_size {
        log::error!("TargetCopy wrote past target size ({} > {})", state.output_offset, state.target_size);
        return Ok(Err(FormatError::CommandOverrun));
      }
      return Ok(Ok(super::IterStatus::Next));
    }
    _ => unreachable!("command is masked to 2 bits"),
  }

  state.output_offset += length;
  if state.output_offset > state.target_size {
    log::error!("command wrote past target size ({} > {})", state.output_offset, state.target_size);
    return Ok(Err(FormatError::CommandOverrun));
  }
  Ok(Ok(super::IterStatus::Next))
}

fn seek(stream: &mut impl Seek, offset: u64, label: &str) -> io::Result<u64> {
  stream.seek(SeekFrom::Start(offset)).map_err(|e| {
    log::error!("seek on {label} stream to {offset} failed: {e}");
    e
  })
}

fn copy_with_crc(
  mut remaining: u64,
  src: &mut impl Read,
  dst: &mut impl Write,
  crc_register: &mut u32,
) -> io::Result<()> {
  let mut buf = [0u8; 32768];
  while remaining > 0 {
    let chunk = remaining.min(buf.len() as u64) as usize;
    src.read_exact(&mut buf[..chunk]).map_err(|e| {
      log::error!("read of {chunk} bytes failed: {e}");
      e
    })?;
    dst.write_all(&buf[..chunk]).map_err(|e| {
      log::error!("write of {chunk} bytes failed: {e}");
      e
    })?;
    *crc_register = crc::update(*crc_register, &buf[..chunk]);
    remaining -= chunk as u64;
  }
  Ok(())
}

/// Verifies the 12-byte trailer against accumulated state. Only the target
/// CRC (the trailer's second word) is checked by default; source and patch
/// CRCs are read but not validated (see design notes on BPS source
/// validation).
pub fn end(state: &State, patch: &mut impl Read) -> Result<(), super::TerminalError> {
  if state.output_offset != state.target_size {
    return Err(super::TerminalError::InvalidOutputSize);
  }
  let _source_crc = patch.read_u32::<LittleEndian>()?;
  let target_crc = patch.read_u32::<LittleEndian>()?;
  let _patch_crc = patch.read_u32::<LittleEndian>()?;
  if crc::finalize(state.output_crc) != target_crc {
    return Err(super::TerminalError::InvalidOutputChecksum);
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::patch::IterStatus;
  use std::io::Cursor;

  fn build_patch(commands: &[u8], source_size: u64, target_size: u64, target_crc: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    varint::write_number(&mut out, source_size).unwrap();
    varint::write_number(&mut out, target_size).unwrap();
    varint::write_number(&mut out, 0).unwrap(); // metadata_size
    out.extend_from_slice(commands);
    out.extend_from_slice(&0u32.to_le_bytes()); // source_crc32, unchecked
    out.extend_from_slice(&target_crc.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // patch_crc32, unchecked
    out
  }

  fn run(patch_bytes: Vec<u8>, source: &[u8]) -> Vec<u8> {
    let mut patch = Cursor::new(patch_bytes);
    patch.seek(SeekFrom::Start(MAGIC.len() as u64)).unwrap();
    let mut state = start(&mut patch).unwrap();
    let mut rom = Cursor::new(source.to_vec());
    let mut output = Cursor::new(vec![0u8; state.target_size as usize]);
    loop {
      match next(&mut state, &mut rom, &mut output, &mut patch).unwrap().unwrap() {
        IterStatus::Next => {}
        IterStatus::Done => break,
      }
    }
    end(&state, &mut patch).unwrap();
    output.into_inner()
  }

  fn command(tag: u8, length: u64) -> u64 {
    u64::from(tag) | ((length - 1) << 2)
  }

  #[test]
  fn source_read_only() {
    let source = b"AABBCCDD";
    let target_crc = crc::crc32(source);
    let mut commands = Vec::new();
    varint::write_number(&mut commands, command(0, 8)).unwrap();
    let patch = build_patch(&commands, 8, 8, target_crc);
    assert_eq!(run(patch, source), source.to_vec());
  }

  #[test]
  fn target_read() {
    let payload = [0x01, 0x02, 0x03];
    let target_crc = crc::crc32(&payload);
    let mut commands = Vec::new();
    varint::write_number(&mut commands, command(1, 3)).unwrap();
    commands.extend_from_slice(&payload);
    let patch = build_patch(&commands, 0, 3, target_crc);
    assert_eq!(run(patch, b""), payload);
  }

  #[test]
  fn target_copy_self_referential_fill() {
    // Write one byte via TargetRead, then TargetCopy 4 bytes with delta=0
    // (raw varint 0 decodes to signed 0), replicating it forward.
    let mut commands = Vec::new();
    varint::write_number(&mut commands, command(1, 1)).unwrap();
    commands.push(0xAB);
    varint::write_number(&mut commands, command(3, 4)).unwrap();
    varint::write_number(&mut commands, varint::encode_signed(0)).unwrap();
    let expected = [0xAB, 0xAB, 0xAB, 0xAB, 0xAB];
    let target_crc = crc::crc32(&expected);
    let patch = build_patch(&commands, 0, 5, target_crc);
    assert_eq!(run(patch, b""), expected);
  }

  #[test]
  fn bad_output_checksum_is_detected() {
    let source = b"AABBCCDD";
    let mut commands = Vec::new();
    varint::write_number(&mut commands, command(0, 8)).unwrap();
    let patch = build_patch(&commands, 8, 8, 0xDEADBEEF);
    let mut patch_cursor = Cursor::new(patch);
    patch_cursor.seek(SeekFrom::Start(MAGIC.len() as u64)).unwrap();
    let mut state = start(&mut patch_cursor).unwrap();
    let mut rom = Cursor::new(source.to_vec());
    let mut output = Cursor::new(vec![0u8; state.target_size as usize]);
    loop {
      match next(&mut state, &mut rom, &mut output, &mut patch_cursor).unwrap().unwrap() {
        IterStatus::Next => {}
        IterStatus::Done => break,
      }
    }
    assert!(matches!(
      end(&state, &mut patch_cursor),
      Err(super::super::TerminalError::InvalidOutputChecksum)
    ));
  }
}
