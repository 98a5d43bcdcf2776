use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::topology::Rank;

/// User-chosen label that pairs a send with its receive.
pub type Tag = i32;

/// The value carried by every message in this protocol.
pub type Payload = i64;

/// What an envelope is matched on at the receiving end. User traffic carries
/// a tag; collective traffic carries the sequence number of the collective
/// call it belongs to, so the two can never be confused.
///
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Tagged(Tag),
    Collective(u64),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub source: Rank,
    pub channel: Channel,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(source: Rank, channel: Channel, payload: Payload) -> Self {
        Self {
            source,
            channel,
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::encode::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::decode::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_survives_the_wire() {
        let env = Envelope::new(3, Channel::Tagged(-7), -42);
        let bytes = env.encode().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), env);

        let env = Envelope::new(0, Channel::Collective(u64::MAX), i64::MIN);
        let bytes = env.encode().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), env);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(Envelope::decode(&[0xc1, 0x00]).is_err());
    }
}
