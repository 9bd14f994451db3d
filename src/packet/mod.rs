//! Packet codec: typed packet values and the decode/encode pipelines.

pub mod coalesce;
pub mod decode;
pub mod encode;
pub mod number;
pub mod peek;
pub mod types;

pub use coalesce::CoalescedPackets;
pub use decode::{DecodeContext, Decoder};
pub use encode::{EncodeContext, Encoder, MIN_INITIAL_SIZE};
pub use number::LargestPn;
pub use peek::{HeaderForm, LongHeader};
pub use types::{KeySpace, Packet, PacketNumberSpace, PacketType};
