//! MSR605 command builders.
//!
//! Every request the reader understands is an escape byte followed by a
//! one-byte opcode, optionally followed by a payload. The functions here are
//! pure: they produce the exact bytes to put on the wire and validate caller
//! input, without performing any I/O. The session sends the bytes and feeds
//! the replies to the matchers in [`frame`](crate::frame).

use bytes::{BufMut, BytesMut};
use msrlib_core::{Coercivity, Error, Led, Result, TrackData, Tracks};

/// Escape byte that introduces every command and structural marker.
pub const ESC: u8 = 0x1B;

/// Field separator terminating a track data block.
pub const FS: u8 = 0x1C;

/// End sentinel appended to every written track and to the data block.
pub const END_SENTINEL: u8 = b'?';

/// Start-of-data marker following `ESC` in a data block.
pub const START_OF_DATA: u8 = b's';

// ---------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------

const OP_RESET: u8 = b'a';
const OP_READ: u8 = b'r';
const OP_WRITE: u8 = b'w';
const OP_READ_RAW: u8 = b'm';
const OP_ERASE: u8 = b'c';
const OP_TEST_COMM: u8 = b'e';
const OP_TEST_SENSOR: u8 = 0x86;
const OP_TEST_RAM: u8 = 0x87;
const OP_MODEL: u8 = b't';
const OP_FIRMWARE: u8 = b'v';
const OP_HICO: u8 = b'x';
const OP_LOCO: u8 = b'y';
const OP_GET_COERCIVITY: u8 = b'd';

const OP_LED_OFF: u8 = 0x81;
const OP_LED_ON: u8 = 0x82;
const OP_LED_GREEN: u8 = 0x83;
const OP_LED_YELLOW: u8 = 0x84;
const OP_LED_RED: u8 = 0x85;

// ---------------------------------------------------------------
// Fixed responses
// ---------------------------------------------------------------

/// Acknowledgement of the communication test.
pub const RESP_COMM_OK: [u8; 2] = [ESC, b'y'];

/// Generic success acknowledgement (RAM test, sensor test, erase, coercivity).
pub const RESP_OK: [u8; 2] = [ESC, b'0'];

/// Erase failure acknowledgement.
pub const RESP_ERASE_FAIL: [u8; 2] = [ESC, b'A'];

/// Reader is configured for Hi-Co stripes.
pub const RESP_HICO: [u8; 2] = [ESC, b'H'];

/// Reader is configured for Lo-Co stripes.
pub const RESP_LOCO: [u8; 2] = [ESC, b'L'];

fn two_byte(opcode: u8) -> Vec<u8> {
    vec![ESC, opcode]
}

/// Reset the reader to its idle state. The device does not answer.
pub fn cmd_reset() -> Vec<u8> {
    two_byte(OP_RESET)
}

/// Drive the front-panel LEDs. The device does not answer.
///
/// ```
/// use msrlib_core::Led;
/// use msrlib_msr605::commands::cmd_led;
///
/// assert_eq!(cmd_led(Led::Green), vec![0x1B, 0x83]);
/// ```
pub fn cmd_led(led: Led) -> Vec<u8> {
    let opcode = match led {
        Led::Off => OP_LED_OFF,
        Led::On => OP_LED_ON,
        Led::Green => OP_LED_GREEN,
        Led::Yellow => OP_LED_YELLOW,
        Led::Red => OP_LED_RED,
    };
    two_byte(opcode)
}

/// Communication test; answered with [`RESP_COMM_OK`].
pub fn cmd_test_comm() -> Vec<u8> {
    two_byte(OP_TEST_COMM)
}

/// RAM self-test; answered with [`RESP_OK`].
pub fn cmd_test_ram() -> Vec<u8> {
    two_byte(OP_TEST_RAM)
}

/// Sensor test; answered with [`RESP_OK`] once a card is swiped.
pub fn cmd_test_sensor() -> Vec<u8> {
    two_byte(OP_TEST_SENSOR)
}

/// Model query; answered with `ESC <digit> 'S'`.
pub fn cmd_model() -> Vec<u8> {
    two_byte(OP_MODEL)
}

/// Firmware query; answered with `ESC "REV" <letter><digit> '.' <digit><digit>`.
pub fn cmd_firmware() -> Vec<u8> {
    two_byte(OP_FIRMWARE)
}

/// Read the three tracks in ISO format after a swipe.
pub fn cmd_read() -> Vec<u8> {
    two_byte(OP_READ)
}

/// Read the three tracks as unparsed, length-prefixed bitstreams.
pub fn cmd_read_raw() -> Vec<u8> {
    two_byte(OP_READ_RAW)
}

/// Select the coercivity used by subsequent writes; answered with [`RESP_OK`].
pub fn cmd_set_coercivity(coercivity: Coercivity) -> Vec<u8> {
    match coercivity {
        Coercivity::High => two_byte(OP_HICO),
        Coercivity::Low => two_byte(OP_LOCO),
    }
}

/// Query the configured coercivity; answered with [`RESP_HICO`] or [`RESP_LOCO`].
pub fn cmd_get_coercivity() -> Vec<u8> {
    two_byte(OP_GET_COERCIVITY)
}

/// Compute the erase selection mask (bit 0 = track 1, bit 1 = track 2,
/// bit 2 = track 3).
///
/// The reader firmware expects track-1-only as `0` rather than `1`, so that
/// value is re-encoded. Selecting no track is rejected with
/// [`Error::InvalidParameter`] even though the wire format accepts any mask
/// in `0..=7`; after re-encoding, `0` already means track 1.
///
/// ```
/// use msrlib_msr605::commands::erase_mask;
///
/// assert_eq!(erase_mask(true, true, true).unwrap(), 7);
/// assert_eq!(erase_mask(true, false, false).unwrap(), 0);
/// assert_eq!(erase_mask(false, true, false).unwrap(), 2);
/// ```
pub fn erase_mask(track1: bool, track2: bool, track3: bool) -> Result<u8> {
    let mask = track1 as u8 | (track2 as u8) << 1 | (track3 as u8) << 2;
    match mask {
        0 => Err(Error::InvalidParameter(
            "erase requires at least one track".into(),
        )),
        1 => Ok(0),
        m => Ok(m),
    }
}

/// Erase the tracks selected by `mask` (see [`erase_mask`]); answered with
/// [`RESP_OK`] or [`RESP_ERASE_FAIL`] after a swipe.
pub fn cmd_erase(mask: u8) -> Vec<u8> {
    vec![ESC, OP_ERASE, mask]
}

/// Build the write command for three tracks.
///
/// `Empty` tracks are written as empty payloads; a non-empty payload that
/// lacks the `'?'` end sentinel gets one appended. The `Error` sentinel and
/// payloads containing `ESC` or `FS` are rejected before any I/O.
///
/// ```
/// use msrlib_core::{TrackData, Tracks};
/// use msrlib_msr605::commands::cmd_write;
///
/// let tracks = Tracks::new(TrackData::Empty, TrackData::data("12"), TrackData::Empty);
/// let cmd = cmd_write(&tracks).unwrap();
/// assert_eq!(
///     cmd,
///     vec![0x1B, b'w', 0x1B, b's', 0x1B, 1, 0x1B, 2, b'1', b'2', b'?', 0x1B, 3, b'?', 0x1C]
/// );
/// ```
pub fn cmd_write(tracks: &Tracks) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_slice(&[ESC, OP_WRITE, ESC, START_OF_DATA]);
    for (track, content) in tracks.iter() {
        buf.put_u8(ESC);
        buf.put_u8(track.number());
        match content {
            TrackData::Empty => {}
            TrackData::Error => {
                return Err(Error::InvalidParameter(format!(
                    "{track}: the error marker cannot be written"
                )));
            }
            TrackData::Data(payload) => {
                if let Some(pos) = payload.iter().position(|&b| b == ESC || b == FS) {
                    return Err(Error::InvalidParameter(format!(
                        "{track}: payload contains a framing byte at offset {pos}"
                    )));
                }
                buf.put_slice(payload);
                if payload.last().is_some_and(|&b| b != END_SENTINEL) {
                    buf.put_u8(END_SENTINEL);
                }
            }
        }
    }
    buf.put_u8(END_SENTINEL);
    buf.put_u8(FS);
    Ok(buf.to_vec())
}
