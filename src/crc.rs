//! Streaming CRC-32/IEEE-802.3 (reflected polynomial 0xEDB88320).

use std::sync::OnceLock;

const POLY: u32 = 0xEDB8_8320;

fn table() -> &'static [u32; 256] {
  static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
  TABLE.get_or_init(|| {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
      let mut crc = i as u32;
      let mut j = 0;
      while j < 8 {
        crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
        j += 1;
      }
      table[i] = crc;
      i += 1;
    }
    table
  })
}

/// Folds `bytes` into a running CRC register. `prev` is the register's prior
/// value (start with `0` for a fresh stream); the return value feeds the next
/// call. Call [`finalize`] once on the final value to get the IEEE CRC-32.
pub fn update(prev: u32, bytes: &[u8]) -> u32 {
  let table = table();
  bytes.iter().fold(prev, |crc, &byte| {
    table[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
  })
}

/// Applies the final XOR to a running register produced by [`update`].
pub fn finalize(register: u32) -> u32 {
  register ^ 0xFFFF_FFFF
}

/// Convenience one-shot CRC-32 of a full buffer.
pub fn crc32(bytes: &[u8]) -> u32 {
  finalize(update(0, bytes))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_vector() {
    // "123456789" is the standard CRC-32/IEEE-802.3 check string.
    assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
  }

  #[test]
  fn empty_input() {
    assert_eq!(crc32(b""), 0);
  }

  #[test]
  fn composable_updates() {
    let whole = crc32(b"hello world");
    let split = finalize(update(update(0, b"hello "), b"world"));
    assert_eq!(whole, split);
  }
}
