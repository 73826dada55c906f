//! Synthesis of the ICMP diagnostics the forwarding pipeline emits.

use std::cmp::min;

use core::repr::{
    eth_types,
    ipv4_flags,
    ipv4_protocols,
    EthernetAddress,
    EthernetFrame,
    Icmpv4Message,
    Icmpv4Packet,
    Icmpv4Repr,
    Ipv4Address,
    Ipv4Packet,
};
use core::routing::RoutingInterface;

/// Number of bytes of the offending IP packet embedded in an ICMP error
/// message, its header plus eight bytes of payload.
pub const ERROR_DATA_LEN: usize = 28;

/// TTL of the outer IPv4 header on synthesized diagnostics.
pub const ERROR_TTL: u8 = 64;

/// Builds a complete Ethernet frame carrying an ICMP error message.
///
/// `offending` is the IP packet that triggered the diagnostic; its first
/// 28 bytes ride in the ICMP data field, zero padded when the packet is
/// shorter. The outer IPv4 header is addressed from `iface` to `dst_ip`
/// with the don't fragment flag set.
pub fn error_frame(
    iface: &RoutingInterface,
    dst_mac: EthernetAddress,
    dst_ip: Ipv4Address,
    message: Icmpv4Message,
    offending: &[u8],
) -> Vec<u8> {
    let icmp_len = Icmpv4Packet::<&[u8]>::buffer_len(ERROR_DATA_LEN);
    let ipv4_len = Ipv4Packet::<&[u8]>::buffer_len(icmp_len);
    let mut buffer = vec![0; EthernetFrame::<&[u8]>::buffer_len(ipv4_len)];

    {
        let mut eth_frame = EthernetFrame::try_new(&mut buffer[..]).unwrap();
        eth_frame.set_dst_addr(dst_mac);
        eth_frame.set_src_addr(iface.mac);
        eth_frame.set_ethertype(eth_types::IPV4);

        let mut ipv4_packet = Ipv4Packet::try_new(eth_frame.payload_mut()).unwrap();
        ipv4_packet.set_ip_version(4);
        ipv4_packet.set_header_len(5);
        ipv4_packet.set_packet_len(ipv4_len as u16);
        ipv4_packet.set_identification(0);
        ipv4_packet.set_flags(ipv4_flags::DONT_FRAGMENT);
        ipv4_packet.set_ttl(ERROR_TTL);
        ipv4_packet.set_protocol(ipv4_protocols::ICMP);
        ipv4_packet.set_src_addr(iface.ip);
        ipv4_packet.set_dst_addr(dst_ip);
        ipv4_packet.fill_checksum();

        let mut icmp_packet = Icmpv4Packet::try_new(ipv4_packet.payload_mut()).unwrap();
        let repr = Icmpv4Repr {
            message,
            payload_len: ERROR_DATA_LEN,
        };
        repr.serialize(&mut icmp_packet);

        let data_len = min(ERROR_DATA_LEN, offending.len());
        icmp_packet.payload_mut()[.. data_len].copy_from_slice(&offending[.. data_len]);
        icmp_packet.fill_checksum();
    }

    buffer
}
