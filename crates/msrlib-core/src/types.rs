//! Core types used throughout msrlib.
//!
//! These describe what travels between the host and the reader: which
//! track a payload belongs to, what a track holds, and how the device
//! reports the outcome of a command.

use std::fmt;
use std::str::FromStr;

/// One of the three magnetic-stripe tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Track {
    One,
    Two,
    Three,
}

impl Track {
    /// All tracks in wire order.
    pub const ALL: [Track; 3] = [Track::One, Track::Two, Track::Three];

    /// Track number as used in frame separators (`ESC 0x01` .. `ESC 0x03`).
    pub fn number(&self) -> u8 {
        match self {
            Track::One => 1,
            Track::Two => 2,
            Track::Three => 3,
        }
    }

    /// Zero-based index into a three-element array.
    pub fn index(&self) -> usize {
        self.number() as usize - 1
    }

    /// Bit of this track in the erase selection mask.
    pub fn mask_bit(&self) -> u8 {
        1 << self.index()
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track{}", self.number())
    }
}

/// Content of one track.
///
/// `Empty` and `Error` are reserved markers that never collide with a real
/// payload: a read that finds nothing on a track, or finds only noise,
/// reports it through these instead of failing the whole call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TrackData {
    /// No data present on the track.
    #[default]
    Empty,
    /// The track was present but garbled or unreadable.
    Error,
    /// Track payload as read from or written to the stripe.
    Data(Vec<u8>),
}

impl TrackData {
    /// Construct a payload from anything byte-like.
    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        TrackData::Data(bytes.into())
    }

    /// Returns `true` for the `Empty` sentinel.
    pub fn is_empty(&self) -> bool {
        matches!(self, TrackData::Empty)
    }

    /// Returns `true` for the `Error` sentinel.
    pub fn is_error(&self) -> bool {
        matches!(self, TrackData::Error)
    }

    /// Payload bytes, or `None` for either sentinel.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TrackData::Data(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Display for TrackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackData::Empty => write!(f, "<empty>"),
            TrackData::Error => write!(f, "<error>"),
            TrackData::Data(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// The three tracks of one card, in wire order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tracks {
    pub track1: TrackData,
    pub track2: TrackData,
    pub track3: TrackData,
}

impl Tracks {
    pub fn new(track1: TrackData, track2: TrackData, track3: TrackData) -> Self {
        Tracks {
            track1,
            track2,
            track3,
        }
    }

    /// Borrow the content of a single track.
    pub fn get(&self, track: Track) -> &TrackData {
        match track {
            Track::One => &self.track1,
            Track::Two => &self.track2,
            Track::Three => &self.track3,
        }
    }

    /// Iterate `(track, content)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (Track, &TrackData)> {
        Track::ALL.into_iter().map(move |t| (t, self.get(t)))
    }
}

impl From<[TrackData; 3]> for Tracks {
    fn from([track1, track2, track3]: [TrackData; 3]) -> Self {
        Tracks::new(track1, track2, track3)
    }
}

/// Outcome code returned by the device after a framed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// `'0'`: command completed.
    Ok,
    /// `'1'`: read/write error on the stripe.
    IoError,
    /// `'2'`: command format error.
    FormatError,
    /// `'4'`: invalid or unsupported command.
    Unsupported,
    /// `'9'`: no card swiped (write path).
    NoMedium,
    /// Any other status character in `'0'..='?'`.
    Unknown(u8),
}

impl Status {
    /// Lowest status character the device sends.
    pub const MIN_BYTE: u8 = b'0';
    /// Highest status character the device sends.
    pub const MAX_BYTE: u8 = b'?';

    /// Classify a status character, or `None` if it lies outside the
    /// status domain entirely.
    pub fn from_byte(byte: u8) -> Option<Status> {
        if !(Self::MIN_BYTE..=Self::MAX_BYTE).contains(&byte) {
            return None;
        }
        Some(match byte {
            b'0' => Status::Ok,
            b'1' => Status::IoError,
            b'2' => Status::FormatError,
            b'4' => Status::Unsupported,
            b'9' => Status::NoMedium,
            other => Status::Unknown(other),
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::IoError => write!(f, "read/write error"),
            Status::FormatError => write!(f, "command format error"),
            Status::Unsupported => write!(f, "unsupported command"),
            Status::NoMedium => write!(f, "no medium"),
            Status::Unknown(b) => write!(f, "unknown status {:?}", *b as char),
        }
    }
}

/// Front-panel LED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Led {
    /// All LEDs off.
    Off,
    /// All LEDs on.
    On,
    Green,
    Yellow,
    Red,
}

impl fmt::Display for Led {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Led::Off => "off",
            Led::On => "on",
            Led::Green => "green",
            Led::Yellow => "yellow",
            Led::Red => "red",
        };
        write!(f, "{s}")
    }
}

/// Magnetic coercivity the writer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coercivity {
    /// Hi-Co (2750-4000 Oe) stripes.
    High,
    /// Lo-Co (300 Oe) stripes.
    Low,
}

impl fmt::Display for Coercivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coercivity::High => write!(f, "Hi-Co"),
            Coercivity::Low => write!(f, "Lo-Co"),
        }
    }
}

/// Error returned when a string cannot be parsed into a [`Coercivity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCoercivityError(String);

impl fmt::Display for ParseCoercivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown coercivity: {}", self.0)
    }
}

impl std::error::Error for ParseCoercivityError {}

impl FromStr for Coercivity {
    type Err = ParseCoercivityError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" | "hi" | "hico" | "hi-co" => Ok(Coercivity::High),
            "low" | "lo" | "loco" | "lo-co" => Ok(Coercivity::Low),
            _ => Err(ParseCoercivityError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_numbering() {
        assert_eq!(Track::One.number(), 1);
        assert_eq!(Track::Three.index(), 2);
        assert_eq!(Track::One.mask_bit(), 0b001);
        assert_eq!(Track::Two.mask_bit(), 0b010);
        assert_eq!(Track::Three.mask_bit(), 0b100);
        assert_eq!(Track::Two.to_string(), "track2");
    }

    #[test]
    fn track_data_sentinels_are_distinct_from_payloads() {
        assert!(TrackData::Empty.is_empty());
        assert!(TrackData::Error.is_error());
        assert_ne!(TrackData::Empty, TrackData::data(Vec::new()));
        assert_eq!(TrackData::Empty.as_bytes(), None);
        assert_eq!(TrackData::data("123?").as_bytes(), Some(&b"123?"[..]));
        assert_eq!(TrackData::default(), TrackData::Empty);
    }

    #[test]
    fn track_data_display() {
        assert_eq!(TrackData::Empty.to_string(), "<empty>");
        assert_eq!(TrackData::Error.to_string(), "<error>");
        assert_eq!(TrackData::data(";1234?").to_string(), ";1234?");
    }

    #[test]
    fn tracks_iter_in_wire_order() {
        let tracks = Tracks::from([
            TrackData::data("%A?"),
            TrackData::Empty,
            TrackData::Error,
        ]);
        let order: Vec<Track> = tracks.iter().map(|(t, _)| t).collect();
        assert_eq!(order, vec![Track::One, Track::Two, Track::Three]);
        assert_eq!(tracks.get(Track::Three), &TrackData::Error);
    }

    #[test]
    fn status_classification() {
        assert_eq!(Status::from_byte(b'0'), Some(Status::Ok));
        assert_eq!(Status::from_byte(b'1'), Some(Status::IoError));
        assert_eq!(Status::from_byte(b'2'), Some(Status::FormatError));
        assert_eq!(Status::from_byte(b'4'), Some(Status::Unsupported));
        assert_eq!(Status::from_byte(b'9'), Some(Status::NoMedium));
        assert_eq!(Status::from_byte(b'3'), Some(Status::Unknown(b'3')));
        assert_eq!(Status::from_byte(b'?'), Some(Status::Unknown(b'?')));
    }

    #[test]
    fn status_outside_domain() {
        assert_eq!(Status::from_byte(b'/'), None);
        assert_eq!(Status::from_byte(b'@'), None);
        assert_eq!(Status::from_byte(0x1B), None);
    }

    #[test]
    fn coercivity_from_str() {
        assert_eq!("hi".parse::<Coercivity>(), Ok(Coercivity::High));
        assert_eq!("Lo-Co".parse::<Coercivity>(), Ok(Coercivity::Low));
        assert!("medium".parse::<Coercivity>().is_err());
        assert_eq!(Coercivity::High.to_string(), "Hi-Co");
    }
}
