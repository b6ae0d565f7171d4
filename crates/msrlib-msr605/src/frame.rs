//! Response matchers for MSR605 replies.
//!
//! Every matcher inspects a prefix of the device queue without consuming
//! it. A matcher returns [`Match::Incomplete`] while the prefix is still a
//! valid beginning of the expected response, [`Match::Complete`] with the
//! number of bytes to consume once the whole response is present, and
//! [`Error::Protocol`] at the first byte that cannot belong to it.
//!
//! # Read response
//!
//! ```text
//! ESC 's' ESC 0x01 <t1> ESC 0x02 <t2> ESC 0x03 <t3> FS ESC <status>
//! ```
//!
//! `t1` runs to the next `ESC`, `t2` is restricted to `'0'..='?'`, and `t3`
//! runs to `FS`. The raw read response replaces each payload with a length
//! byte followed by that many bytes, and ends the block with `'?' FS`.

use msrlib_core::{Error, Result, Status, Track, TrackData, Tracks};

use crate::commands::{END_SENTINEL, ESC, FS, START_OF_DATA};

/// Lowest byte allowed in a track 2 payload.
const TRACK2_MIN: u8 = 0x30;
/// Highest byte allowed in a track 2 payload.
const TRACK2_MAX: u8 = 0x3F;

/// Length of the firmware reply including the leading `ESC`.
const FIRMWARE_LEN: usize = 9;

/// Outcome of matching a response against the device queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match<T> {
    /// The queue holds a valid but unfinished prefix. More data is needed.
    Incomplete,
    /// The response is complete. `consumed` bytes should be removed from the
    /// front of the queue.
    Complete { value: T, consumed: usize },
}

impl<T> Match<T> {
    /// Returns `true` if the response is complete.
    pub fn is_complete(&self) -> bool {
        matches!(self, Match::Complete { .. })
    }
}

/// Compare `buf[start..]` against `expected` as far as bytes are available.
///
/// Returns `Ok(true)` once every byte of `expected` is present and equal,
/// `Ok(false)` if the buffer ends first.
fn match_literal(buf: &[u8], start: usize, expected: &[u8], what: &str) -> Result<bool> {
    let available = buf.get(start..).unwrap_or_default();
    for (i, (&got, &want)) in available.iter().zip(expected).enumerate() {
        if got != want {
            return Err(Error::protocol(
                start + i,
                format!("expected {what} byte {want:#04x}, got {got:#04x}"),
            ));
        }
    }
    Ok(available.len() >= expected.len())
}

/// Classify a status character at `position`.
fn parse_status(byte: u8, position: usize) -> Result<Status> {
    Status::from_byte(byte).ok_or_else(|| {
        Error::protocol(position, format!("status byte {byte:#04x} out of range"))
    })
}

/// Match a fixed acknowledgement such as `ESC 'y'`.
pub fn match_fixed(buf: &[u8], expected: &[u8]) -> Result<Match<()>> {
    if match_literal(buf, 0, expected, "acknowledgement")? {
        Ok(Match::Complete {
            value: (),
            consumed: expected.len(),
        })
    } else {
        Ok(Match::Incomplete)
    }
}

/// Match one of several fixed acknowledgements; the value is the index of
/// the literal that matched.
///
/// ```
/// use msrlib_msr605::frame::{match_choice, Match};
///
/// let choices: [&[u8]; 2] = [&[0x1B, b'0'], &[0x1B, b'A']];
/// assert_eq!(match_choice(&[0x1B], &choices).unwrap(), Match::Incomplete);
/// assert_eq!(
///     match_choice(&[0x1B, b'A'], &choices).unwrap(),
///     Match::Complete { value: 1, consumed: 2 }
/// );
/// ```
pub fn match_choice(buf: &[u8], choices: &[&[u8]]) -> Result<Match<usize>> {
    let mut pending = false;
    let mut first_error = None;
    for (index, literal) in choices.iter().enumerate() {
        match match_literal(buf, 0, literal, "acknowledgement") {
            Ok(true) => {
                return Ok(Match::Complete {
                    value: index,
                    consumed: literal.len(),
                });
            }
            Ok(false) => pending = true,
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) if !pending => Err(e),
        _ => Ok(Match::Incomplete),
    }
}

/// Match a status reply `ESC <status>`.
pub fn match_status(buf: &[u8]) -> Result<Match<Status>> {
    if !match_literal(buf, 0, &[ESC], "escape")? || buf.len() < 2 {
        return Ok(Match::Incomplete);
    }
    let status = parse_status(buf[1], 1)?;
    Ok(Match::Complete {
        value: status,
        consumed: 2,
    })
}

/// Match a model reply `ESC <digit> 'S'`; the value is the model digit.
pub fn match_model(buf: &[u8]) -> Result<Match<u8>> {
    if !match_literal(buf, 0, &[ESC], "escape")? {
        return Ok(Match::Incomplete);
    }
    let Some(&digit) = buf.get(1) else {
        return Ok(Match::Incomplete);
    };
    if !digit.is_ascii_digit() {
        return Err(Error::protocol(1, format!("expected model digit, got {digit:#04x}")));
    }
    if !match_literal(buf, 2, b"S", "model suffix")? {
        return Ok(Match::Incomplete);
    }
    Ok(Match::Complete {
        value: digit,
        consumed: 3,
    })
}

/// Match a firmware reply `ESC "REV" <letter><digit> '.' <digit><digit>`;
/// the value is the eight characters following `ESC`, e.g. `REVH1.02`.
pub fn match_firmware(buf: &[u8]) -> Result<Match<String>> {
    let rules: [(fn(&u8) -> bool, &str); FIRMWARE_LEN] = [
        (|b| *b == ESC, "escape"),
        (|b| *b == b'R', "'R'"),
        (|b| *b == b'E', "'E'"),
        (|b| *b == b'V', "'V'"),
        (u8::is_ascii_alphabetic, "revision letter"),
        (u8::is_ascii_digit, "major digit"),
        (|b| *b == b'.', "'.'"),
        (u8::is_ascii_digit, "minor digit"),
        (u8::is_ascii_digit, "minor digit"),
    ];
    for (position, (byte, (accept, what))) in buf.iter().zip(rules.iter()).enumerate() {
        if !accept(byte) {
            return Err(Error::protocol(
                position,
                format!("expected {what}, got {byte:#04x}"),
            ));
        }
    }
    if buf.len() < FIRMWARE_LEN {
        return Ok(Match::Incomplete);
    }
    let version = String::from_utf8_lossy(&buf[1..FIRMWARE_LEN]).into_owned();
    Ok(Match::Complete {
        value: version,
        consumed: FIRMWARE_LEN,
    })
}

/// Classify a parsed ISO track payload.
///
/// An empty payload is `Empty`; a payload not ending in the `'?'` end
/// sentinel is a partial read and becomes `Error`.
fn classify(payload: &[u8]) -> TrackData {
    match payload.last() {
        None => TrackData::Empty,
        Some(&END_SENTINEL) => TrackData::data(payload),
        Some(_) => TrackData::Error,
    }
}

fn next_track(track: Track) -> Option<Track> {
    match track {
        Track::One => Some(Track::Two),
        Track::Two => Some(Track::Three),
        Track::Three => None,
    }
}

/// How track payloads are delimited inside a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEncoding {
    /// ISO read: payloads run up to the next structural byte.
    Delimited,
    /// Raw read: each payload is preceded by its length.
    LengthPrefixed,
}

/// A parsed data block with its trailing status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFrame {
    pub tracks: Tracks,
    pub status: Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    Separator(Track),
    Length(Track),
    Payload(Track),
    Trailer,
    Status,
    Done,
}

/// Resumable parser for read and raw-read responses.
///
/// The parser remembers how far it has validated the queue. Calling
/// [`advance`](Self::advance) again after more bytes arrive continues from
/// the first unexamined byte, so the total work is linear in the response
/// length. The queue must not be consumed between calls.
#[derive(Debug, Clone)]
pub struct TrackFrameParser {
    encoding: TrackEncoding,
    stage: Stage,
    /// Next byte to examine.
    cursor: usize,
    /// Offset of the current payload's first byte.
    field_start: usize,
    /// Declared length of the current raw payload.
    field_len: usize,
    fields: [TrackData; 3],
}

impl TrackFrameParser {
    pub fn new(encoding: TrackEncoding) -> Self {
        TrackFrameParser {
            encoding,
            stage: Stage::Header,
            cursor: 0,
            field_start: 0,
            field_len: 0,
            fields: Default::default(),
        }
    }

    /// Parser for the ISO read response.
    pub fn delimited() -> Self {
        Self::new(TrackEncoding::Delimited)
    }

    /// Parser for the raw read response.
    pub fn length_prefixed() -> Self {
        Self::new(TrackEncoding::LengthPrefixed)
    }

    /// Continue parsing with the current contents of the device queue.
    pub fn advance(&mut self, buf: &[u8]) -> Result<Match<TrackFrame>> {
        loop {
            match self.stage {
                Stage::Header => {
                    if !match_literal(buf, self.cursor, &[ESC, START_OF_DATA], "start of data")? {
                        return Ok(Match::Incomplete);
                    }
                    self.cursor += 2;
                    self.stage = Stage::Separator(Track::One);
                }
                Stage::Separator(track) => {
                    let separator = [ESC, track.number()];
                    if !match_literal(buf, self.cursor, &separator, "track separator")? {
                        return Ok(Match::Incomplete);
                    }
                    self.cursor += 2;
                    self.field_start = self.cursor;
                    self.stage = match self.encoding {
                        TrackEncoding::Delimited => Stage::Payload(track),
                        TrackEncoding::LengthPrefixed => Stage::Length(track),
                    };
                }
                Stage::Length(track) => {
                    let Some(&len) = buf.get(self.cursor) else {
                        return Ok(Match::Incomplete);
                    };
                    self.field_len = len as usize;
                    self.cursor += 1;
                    self.field_start = self.cursor;
                    self.stage = Stage::Payload(track);
                }
                Stage::Payload(track) => {
                    let progressed = match self.encoding {
                        TrackEncoding::Delimited => self.scan_delimited(buf, track)?,
                        TrackEncoding::LengthPrefixed => self.take_prefixed(buf, track),
                    };
                    if !progressed {
                        return Ok(Match::Incomplete);
                    }
                }
                Stage::Trailer => {
                    if !match_literal(buf, self.cursor, &[END_SENTINEL, FS], "block terminator")? {
                        return Ok(Match::Incomplete);
                    }
                    self.cursor += 2;
                    self.stage = Stage::Status;
                }
                Stage::Status => {
                    if !match_literal(buf, self.cursor, &[ESC], "status escape")? {
                        return Ok(Match::Incomplete);
                    }
                    let Some(&byte) = buf.get(self.cursor + 1) else {
                        return Ok(Match::Incomplete);
                    };
                    let status = parse_status(byte, self.cursor + 1)?;
                    let consumed = self.cursor + 2;
                    self.stage = Stage::Done;
                    let tracks = Tracks::from(std::mem::take(&mut self.fields));
                    return Ok(Match::Complete {
                        value: TrackFrame { tracks, status },
                        consumed,
                    });
                }
                Stage::Done => {
                    return Err(Error::protocol(self.cursor, "frame already complete"));
                }
            }
        }
    }

    /// Scan a delimited payload. Returns `true` once its terminator was found.
    fn scan_delimited(&mut self, buf: &[u8], track: Track) -> Result<bool> {
        let start = self.cursor;
        for (offset, &byte) in buf.get(start..).unwrap_or_default().iter().enumerate() {
            let position = start + offset;
            match (track, byte) {
                (Track::One | Track::Two, ESC) | (Track::Three, FS) => {
                    self.finish_delimited(buf, track, position);
                    return Ok(true);
                }
                (Track::One | Track::Two, FS) | (Track::Three, ESC) => {
                    return Err(Error::protocol(
                        position,
                        format!("unexpected framing byte {byte:#04x} in {track}"),
                    ));
                }
                (Track::Two, b) if !(TRACK2_MIN..=TRACK2_MAX).contains(&b) => {
                    return Err(Error::protocol(
                        position,
                        format!("byte {b:#04x} outside the track2 alphabet"),
                    ));
                }
                _ => {}
            }
        }
        self.cursor = buf.len();
        Ok(false)
    }

    fn finish_delimited(&mut self, buf: &[u8], track: Track, end: usize) {
        let mut payload = &buf[self.field_start..end];
        match next_track(track) {
            Some(next) => {
                self.cursor = end;
                self.stage = Stage::Separator(next);
            }
            None => {
                // The block terminator precedes FS.
                if let Some((&END_SENTINEL, rest)) = payload.split_last() {
                    payload = rest;
                }
                self.cursor = end + 1;
                self.stage = Stage::Status;
            }
        }
        self.fields[track.index()] = classify(payload);
    }

    /// Take a length-prefixed payload. Returns `true` once it is complete.
    fn take_prefixed(&mut self, buf: &[u8], track: Track) -> bool {
        let end = self.field_start + self.field_len;
        let Some(payload) = buf.get(self.field_start..end) else {
            return false;
        };
        self.fields[track.index()] = if payload.is_empty() {
            TrackData::Empty
        } else {
            TrackData::data(payload)
        };
        self.cursor = end;
        self.stage = match next_track(track) {
            Some(next) => Stage::Separator(next),
            None => Stage::Trailer,
        };
        true
    }
}
