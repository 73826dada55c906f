//! Byte exact representations of the wire formats the router speaks.

pub mod arp;
pub mod ethernet;
pub mod icmpv4;
pub mod ipv4;

pub use self::arp::{
    Arp,
    Op as ArpOp,
};
pub use self::ethernet::{
    eth_types,
    Address as EthernetAddress,
    Frame as EthernetFrame,
};
pub use self::icmpv4::{
    DestinationUnreachable,
    Message as Icmpv4Message,
    Packet as Icmpv4Packet,
    Repr as Icmpv4Repr,
    TimeExceeded,
};
pub use self::ipv4::{
    ipv4_flags,
    ipv4_protocols,
    Address as Ipv4Address,
    Packet as Ipv4Packet,
};
