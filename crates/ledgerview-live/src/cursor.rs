//! Contiguous ingestion cursor

use ledgerview_core::LogPosition;

/// How a delivered position relates to the cursor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arrival {
    /// Already ingested
    Duplicate,
    /// Exactly `cursor + 1`
    Next,
    /// Ahead of the cursor; `missing` positions must be fetched first
    Gap {
        missing_start: LogPosition,
        missing_end: LogPosition,
    },
}

/// Last log position known to be fully and contiguously ingested
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Cursor {
    position: LogPosition,
}

impl Cursor {
    pub fn new(position: LogPosition) -> Self {
        Cursor { position }
    }

    #[inline]
    pub fn position(&self) -> LogPosition {
        self.position
    }

    /// Classify a delivered position
    pub fn classify(&self, position: LogPosition) -> Arrival {
        let expected = self.position.next();
        if position < expected {
            Arrival::Duplicate
        } else if position == expected {
            Arrival::Next
        } else {
            Arrival::Gap {
                missing_start: expected,
                // position > expected >= 1, so prev exists
                missing_end: position.prev().unwrap_or(expected),
            }
        }
    }

    /// Move forward to `position`. Returns false (and stays put) if that would
    /// move the cursor backwards.
    pub fn advance_to(&mut self, position: LogPosition) -> bool {
        if position < self.position {
            return false;
        }
        self.position = position;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(p: u64) -> LogPosition {
        LogPosition::new(p)
    }

    #[test]
    fn test_classify() {
        let cursor = Cursor::new(pos(5));
        assert_eq!(cursor.classify(pos(3)), Arrival::Duplicate);
        assert_eq!(cursor.classify(pos(5)), Arrival::Duplicate);
        assert_eq!(cursor.classify(pos(6)), Arrival::Next);
        assert_eq!(
            cursor.classify(pos(8)),
            Arrival::Gap {
                missing_start: pos(6),
                missing_end: pos(7),
            }
        );
    }

    #[test]
    fn test_empty_cursor_expects_first_position() {
        let cursor = Cursor::default();
        assert_eq!(cursor.classify(pos(0)), Arrival::Duplicate);
        assert_eq!(cursor.classify(pos(1)), Arrival::Next);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut cursor = Cursor::new(pos(4));
        assert!(cursor.advance_to(pos(9)));
        assert!(!cursor.advance_to(pos(7)));
        assert_eq!(cursor.position(), pos(9));
    }
}
