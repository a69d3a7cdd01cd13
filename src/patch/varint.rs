//! The bsnes/beat variable-length integer dialect used by BPS: base-128
//! little-endian with an implicit `+shift` bias added after every
//! continuation byte. This is not standard LEB128.

use std::io;
use std::io::prelude::*;

/// Reads one bsnes-dialect varint from `r`.
///
/// Returns `Ok(Err(Overflow))` if the decoded value would not fit in a
/// `u64`; a legitimate ROM-sized varint never comes close to that bound, so
/// this indicates a malformed or adversarial patch rather than a real size.
pub fn read_number(r: &mut impl Read) -> io::Result<Result<u64, Overflow>> {
  let mut shift: u64 = 1;
  let mut value: u64 = 0;
  loop {
    let mut byte = [0u8; 1];
    r.read_exact(&mut byte)?;
    let byte = byte[0];
    let Some(term) = u64::from(byte & 0x7F)
      .checked_mul(shift)
      .and_then(|product| value.checked_add(product))
    else {
      return Ok(Err(Overflow));
    };
    value = term;
    if byte & 0x80 != 0 {
      return Ok(Ok(value));
    }
    let Some(next_shift) = shift.checked_shl(7) else {
      return Ok(Err(Overflow));
    };
    shift = next_shift;
    let Some(biased) = value.checked_add(shift) else {
      return Ok(Err(Overflow));
    };
    value = biased;
  }
}

/// Writes `value` to `w` using the bsnes-dialect encoding. Used by tests and
/// by callers that need to author patches rather than merely apply them.
pub fn write_number(w: &mut impl Write, mut value: u64) -> io::Result<()> {
  loop {
    let x = (value & 0x7F) as u8;
    value >>= 7;
    if value == 0 {
      w.write_all(&[x | 0x80])?;
      return Ok(());
    }
    w.write_all(&[x])?;
    value -= 1;
  }
}

/// Decodes a BPS relative-offset delta: the low bit is the sign, the
/// remaining bits are the magnitude.
pub fn decode_signed(raw: u64) -> i64 {
  let magnitude = (raw >> 1) as i64;
  if raw & 1 != 0 {
    -magnitude
  } else {
    magnitude
  }
}

/// Encodes a signed relative-offset delta into the varint-ready raw form.
pub fn encode_signed(delta: i64) -> u64 {
  if delta < 0 {
    ((-delta) as u64) << 1 | 1
  } else {
    (delta as u64) << 1
  }
}

#[derive(Debug, thiserror::Error)]
#[error("varint overflowed a u64")]
pub struct Overflow;

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn known_vector() {
    // 0x0E, 0xB0, 0x80, 0x00 decodes to 6286, consuming only the first two bytes.
    let mut cursor = Cursor::new(vec![0x0E, 0xB0, 0x80, 0x00]);
    let value = read_number(&mut cursor).unwrap().unwrap();
    assert_eq!(value, 6286);
    assert_eq!(cursor.position(), 2);
  }

  #[test]
  fn round_trip() {
    for value in [0u64, 1, 127, 128, 16384, 6286, u32::MAX as u64, 1u64 << 40] {
      let mut buf = Vec::new();
      write_number(&mut buf, value).unwrap();
      let mut cursor = Cursor::new(buf);
      assert_eq!(read_number(&mut cursor).unwrap().unwrap(), value);
    }
  }

  #[test]
  fn signed_delta_round_trip() {
    for delta in [0i64, 1, -1, 12345, -12345] {
      assert_eq!(decode_signed(encode_signed(delta)), delta);
    }
  }

  #[test]
  fn truncated_stream_is_io_error() {
    let mut cursor = Cursor::new(vec![0x01]);
    assert!(read_number(&mut cursor).is_err());
  }
}
