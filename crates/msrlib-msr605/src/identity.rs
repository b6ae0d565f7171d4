//! Identity cache and track capabilities derived from the model digit.

/// Model and firmware answers, memoized for the lifetime of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Model digit from `ESC <digit> 'S'`.
    pub model: Option<u8>,
    /// Firmware string such as `REVH1.02`.
    pub firmware: Option<String>,
}

impl Identity {
    pub fn clear(&mut self) {
        *self = Identity::default();
    }
}

/// Which tracks the attached head can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub track1: bool,
    pub track2: bool,
    pub track3: bool,
}

/// Track 1 heads ship on models `'3'` and `'5'`.
pub fn model_has_track1(model: u8) -> bool {
    matches!(model, b'3' | b'5')
}

/// Track 3 heads ship on models `'2'` and `'3'`.
pub fn model_has_track3(model: u8) -> bool {
    matches!(model, b'2' | b'3')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_predicates() {
        assert!(model_has_track1(b'3'));
        assert!(model_has_track1(b'5'));
        assert!(!model_has_track1(b'2'));
        assert!(model_has_track3(b'2'));
        assert!(model_has_track3(b'3'));
        assert!(!model_has_track3(b'5'));
        assert!(!model_has_track3(b'1'));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut identity = Identity {
            model: Some(b'3'),
            firmware: Some("REVH1.02".into()),
        };
        identity.clear();
        assert_eq!(identity, Identity::default());
    }
}
