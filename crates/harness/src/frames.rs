//! Inspection of raw frames seen on the simulated transmission feed.

use core::str::FromStr;

use regex::Regex;

use crate::address::Address;
use crate::error::HarnessError;

const DATA: u8 = 0x01;
const ACK: u8 = 0x03;

/// Type, destination, source, packet id, port, visited count.
const DATA_HEADER_LEN: usize = 6;
const VISITED_COUNT_AT: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind<'a> {
    /// Carries an application payload.
    Data { payload: &'a [u8] },
    Ack,
    Other,
}

impl<'a> FrameKind<'a> {
    #[must_use]
    pub fn of(frame: &'a [u8]) -> Self {
        match frame.first() {
            Some(&DATA) => frame
                .get(VISITED_COUNT_AT)
                .and_then(|&visited| frame.get(DATA_HEADER_LEN.saturating_add(visited.into())..))
                .map_or(Self::Other, |payload| Self::Data { payload }),
            Some(&ACK) => Self::Ack,
            _ => Self::Other,
        }
    }
}

/// Hex pattern matched against the start of a transmitted frame.
///
/// Spaces are ignored, `SS` stands for the source address and `TT` for the
/// destination address.
#[derive(Clone, Debug)]
pub struct DataPattern(Regex);

impl DataPattern {
    pub fn compile(
        pattern: &str,
        source: Address,
        destination: Option<Address>,
    ) -> Result<Self, HarnessError> {
        let hex = pattern
            .to_uppercase()
            .replace(' ', "")
            .replace("SS", &source.hex())
            .replace("TT", &destination.map(Address::hex).unwrap_or_default());

        Ok(Self(Regex::new(&format!("^{hex}"))?))
    }

    #[must_use]
    pub fn matches(&self, frame: &[u8]) -> bool {
        self.0.is_match(&hex::encode_upper(frame))
    }
}

/// Broadcast packets a router sends on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketKind {
    Node,
    Graph,
}

impl PacketKind {
    #[must_use]
    pub const fn pattern(self) -> &'static str {
        match self {
            Self::Node => "FESS",
            Self::Graph => "FB.*?SS",
        }
    }
}

impl FromStr for PacketKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(Self::Node),
            "graph" => Ok(Self::Graph),
            other => Err(HarnessError::UnrecognizedPacketType(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(value: u8) -> Address {
        Address::new(value).unwrap()
    }

    #[test]
    fn test_data_payload_skips_visited_list() {
        let frame = [DATA, 0x02, 0x01, 0x07, 0x0F, 0x02, 0x01, 0x03, b'h', b'i'];

        assert_eq!(FrameKind::of(&frame), FrameKind::Data { payload: b"hi" });
    }

    #[test]
    fn test_short_frames_are_not_data() {
        assert_eq!(FrameKind::of(&[DATA, 0x02]), FrameKind::Other);
        assert_eq!(FrameKind::of(&[DATA, 0x02, 0x01, 0x07, 0x0F, 0x09]), FrameKind::Other);
        assert_eq!(FrameKind::of(&[]), FrameKind::Other);
        assert_eq!(FrameKind::of(&[ACK, 0x01, 0x02]), FrameKind::Ack);
    }

    #[test]
    fn test_pattern_substitutes_addresses() {
        let pattern = DataPattern::compile("01 tt ss", addr(1), Some(addr(10))).unwrap();

        assert!(pattern.matches(&[0x01, 0x0A, 0x01, 0xFF]));
        assert!(!pattern.matches(&[0x01, 0x01, 0x0A]));
        assert!(!pattern.matches(&[0xFF, 0x01, 0x0A, 0x01]));
    }

    #[test]
    fn test_broadcast_patterns() {
        let node = DataPattern::compile(PacketKind::Node.pattern(), addr(3), None).unwrap();
        assert!(node.matches(&[0xFE, 0x03]));
        assert!(!node.matches(&[0xFE, 0x04]));

        let graph = DataPattern::compile(PacketKind::Graph.pattern(), addr(3), None).unwrap();
        assert!(graph.matches(&[0xFB, 0x01, 0x02, 0x03, 0x04]));
        assert!(!graph.matches(&[0xFE, 0x03]));
    }

    #[test]
    fn test_unknown_packet_kind() {
        assert_eq!("node".parse::<PacketKind>().unwrap(), PacketKind::Node);
        assert!(matches!(
            "mesh".parse::<PacketKind>(),
            Err(HarnessError::UnrecognizedPacketType(kind)) if kind == "mesh"
        ));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            DataPattern::compile("FE(", addr(1), None),
            Err(HarnessError::InvalidPattern(_))
        ));
    }
}
