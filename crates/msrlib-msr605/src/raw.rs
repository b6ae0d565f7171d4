//! Bit-level decoding of raw track payloads.
//!
//! [`Session::read_raw`](crate::session::Session::read_raw) returns each
//! track as the bitstream the head saw. This module splits such a stream
//! into fixed-width symbols and checks each symbol's parity bit, which is
//! useful for eyeballing damaged or non-standard cards.
//!
//! Bits are taken MSB-first from each byte. Within a symbol of `N` bits the
//! first `N-1` bits are the value, least significant bit first, and the last
//! bit is parity: it must equal the population count of the value modulo 2.

use std::fmt::Write;

use msrlib_core::error::{Error, Result};

/// Smallest supported symbol width in bits, parity included.
pub const MIN_WIDTH: usize = 2;
/// Largest supported symbol width in bits, parity included.
pub const MAX_WIDTH: usize = 8;

/// Width of a track 2/3 numeric symbol (4 data bits + parity).
pub const NUMERIC_WIDTH: usize = 5;
/// Width of a track 1 alphanumeric symbol (6 data bits + parity).
pub const ALPHA_WIDTH: usize = 7;

/// One decoded symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub ch: char,
    pub parity_ok: bool,
}

/// Decode `payload` into symbols of `width` bits.
///
/// Numeric symbols (`width == 5`) map onto `'0'..`, every other width onto
/// `' '..`. Trailing bits that do not fill a whole symbol are ignored.
///
/// ```
/// use msrlib_msr605::raw::{decode_symbols, render};
///
/// // '1' = 1000+1, '2' = 0100+1, '3' = 1100+0, one padding bit.
/// let symbols = decode_symbols(&[0b1000_1010, 0b0111_0000], 5).unwrap();
/// assert_eq!(render(&symbols), "123");
/// ```
pub fn decode_symbols(payload: &[u8], width: usize) -> Result<Vec<Symbol>> {
    if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
        return Err(Error::InvalidParameter(format!(
            "symbol width {width} outside {MIN_WIDTH}..={MAX_WIDTH}"
        )));
    }

    let bits: Vec<u8> = payload
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1))
        .collect();

    let base = if width == NUMERIC_WIDTH { b'0' } else { b' ' };
    let symbols = bits
        .chunks_exact(width)
        .map(|group| {
            let (data, parity) = group.split_at(width - 1);
            let value = data
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &bit)| acc | bit << i);
            let expected = (value.count_ones() % 2) as u8;
            Symbol {
                ch: (base + value) as char,
                parity_ok: parity[0] == expected,
            }
        })
        .collect();
    Ok(symbols)
}

/// Render symbols as text, bracketing those with a parity fault.
pub fn render(symbols: &[Symbol]) -> String {
    let mut out = String::with_capacity(symbols.len());
    for symbol in symbols {
        if symbol.parity_ok {
            out.push(symbol.ch);
        } else {
            // Writing to a String cannot fail.
            let _ = write!(out, "[{}]", symbol.ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode values as `width`-bit symbols, LSB first, with parity.
    fn encode(values: &[u8], width: usize) -> Vec<u8> {
        let mut bits = Vec::new();
        for &value in values {
            for i in 0..width - 1 {
                bits.push((value >> i) & 1);
            }
            bits.push((value.count_ones() % 2) as u8);
        }
        bits.chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |acc, (i, &bit)| acc | bit << (7 - i))
            })
            .collect()
    }

    #[test]
    fn numeric_digits_round_trip() {
        let digits = [1, 2, 3, 4, 5, 6, 7, 8, 9, 0];
        let symbols = decode_symbols(&encode(&digits, 5), 5).unwrap();
        assert_eq!(render(&symbols), "1234567890");
        assert!(symbols.iter().all(|s| s.parity_ok));
    }

    #[test]
    fn numeric_sentinels() {
        // ';' start sentinel is value 11, '?' end sentinel is value 15.
        let symbols = decode_symbols(&encode(&[11, 4, 15], 5), 5).unwrap();
        assert_eq!(render(&symbols), ";4?");
    }

    #[test]
    fn single_bit_flip_flags_only_that_symbol() {
        let mut payload = encode(&[1, 2, 3, 4], 5);
        // Symbol 2 ('3') occupies bits 10..15; flip its first data bit.
        payload[1] ^= 0b0010_0000;
        let symbols = decode_symbols(&payload, 5).unwrap();

        let faults: Vec<bool> = symbols.iter().map(|s| !s.parity_ok).collect();
        assert_eq!(faults, vec![false, false, true, false]);
        assert_eq!(symbols[0].ch, '1');
        assert_eq!(symbols[1].ch, '2');
        assert_eq!(symbols[3].ch, '4');
        assert_eq!(render(&symbols), "12[2]4");
    }

    #[test]
    fn alpha_width_offsets_from_space() {
        // '%' = 0x25 = ' ' + 5, 'A' = ' ' + 33.
        let symbols = decode_symbols(&encode(&[5, 33], 7), 7).unwrap();
        assert_eq!(render(&symbols), "%A");
    }

    #[test]
    fn trailing_bits_are_ignored() {
        // 16 bits at width 5: three symbols, one bit left over.
        let symbols = decode_symbols(&[0xFF, 0xFF], 5).unwrap();
        assert_eq!(symbols.len(), 3);
    }

    #[test]
    fn empty_payload_decodes_to_nothing() {
        assert!(decode_symbols(&[], 5).unwrap().is_empty());
    }

    #[test]
    fn width_out_of_range() {
        for width in [0, 1, 9] {
            assert!(matches!(
                decode_symbols(&[0x00], width),
                Err(Error::InvalidParameter(_))
            ));
        }
        assert!(decode_symbols(&[0x00], 2).is_ok());
        assert!(decode_symbols(&[0x00], 8).is_ok());
    }
}
