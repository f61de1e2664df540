//! Art-Net protocol transport
//!
//! Only ArtDmx (and ArtSync, which is accepted and ignored) at protocol
//! revision 14 is supported.

pub mod packet;
pub mod transport;

pub use packet::{ArtDmx, ArtPacket, ARTNET_PORT};
pub use transport::{DmxTransport, MemoryTransport, SentPacket, TransportCounters, UdpTransport};
