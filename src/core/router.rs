//! The ingress pipeline: frame classification, local delivery and IPv4
//! forwarding.

use std::sync::{
    Arc,
    Mutex,
};
use std::time::Duration;

use {
    Error,
    Result,
};
use core::arp_cache::ArpCache;
use core::dev::PacketSender;
use core::icmp;
use core::repr::{
    eth_types,
    ipv4_protocols,
    Arp,
    ArpOp,
    DestinationUnreachable,
    EthernetFrame,
    Icmpv4Message,
    Icmpv4Packet,
    Icmpv4Repr,
    Ipv4Packet,
    TimeExceeded,
};
use core::routing::RoutingTable;
use core::time::{
    Env,
    SystemEnv,
};

/// A static IPv4 router.
///
/// Frames handed to on_packet(...) are either consumed (ARP requests for
/// local addresses, echo requests to local addresses) or forwarded toward
/// the longest prefix match for their destination, coordinating with the
/// ARP cache for next hop resolution. Failures surface as ICMP
/// diagnostics on the ingress interface.
pub struct Router<T: Env = SystemEnv> {
    routing_table: Arc<RoutingTable>,
    packet_sender: Arc<PacketSender>,
    arp_cache: ArpCache<T>,
    handling: Mutex<()>,
}

impl Router<SystemEnv> {
    /// Creates a router whose ARP cache runs on the system clock with a
    /// background retransmit worker.
    pub fn new(
        routing_table: Arc<RoutingTable>,
        packet_sender: Arc<PacketSender>,
        arp_timeout: Duration,
    ) -> Router<SystemEnv> {
        let arp_cache = ArpCache::new(arp_timeout, routing_table.clone(), packet_sender.clone());
        Router::with_cache(routing_table, packet_sender, arp_cache)
    }
}

impl<T: Env + Send + 'static> Router<T> {
    /// Creates a router around an existing ARP cache, usually one driven
    /// by a mock clock.
    pub fn with_cache(
        routing_table: Arc<RoutingTable>,
        packet_sender: Arc<PacketSender>,
        arp_cache: ArpCache<T>,
    ) -> Router<T> {
        Router {
            routing_table,
            packet_sender,
            arp_cache,
            handling: Mutex::new(()),
        }
    }

    /// The ARP cache coordinating pending resolutions.
    pub fn arp_cache(&self) -> &ArpCache<T> {
        &self.arp_cache
    }

    /// Handles a frame received on the named interface.
    ///
    /// Packet handling is serialized by a router wide mutex. Lock order
    /// is router then cache; no path acquires them in the other order.
    pub fn on_packet(&self, frame: &[u8], iface: &str) {
        let _guard = self.handling.lock().unwrap();

        match self.classify(frame, iface) {
            Ok(()) | Err(Error::NoOp) => {}
            Err(err) => debug!("dropping frame on {}: {:?}", iface, err),
        }
    }

    fn classify(&self, buffer: &[u8], iface: &str) -> Result<()> {
        let eth_frame = EthernetFrame::try_new(buffer)?;

        match eth_frame.ethertype() {
            eth_types::ARP => self.recv_arp(&eth_frame, iface),
            eth_types::IPV4 => self.recv_ipv4(&eth_frame, iface),
            ethertype => {
                debug!("ignoring frame with ethertype {:#06X} on {}", ethertype, iface);
                Err(Error::NoOp)
            }
        }
    }

    fn recv_arp(&self, eth_frame: &EthernetFrame<&[u8]>, iface: &str) -> Result<()> {
        let arp_repr = Arp::deserialize(eth_frame.payload())?;

        if !self.routing_table.is_local(arp_repr.target_proto_addr) {
            debug!(
                "ignoring ARP with non local target {}",
                arp_repr.target_proto_addr
            );
            return Err(Error::NoOp);
        }

        match arp_repr.op {
            ArpOp::Request => {
                let interface = self.routing_table.interface(iface);
                let arp_reply = Arp::reply(
                    interface.mac,
                    interface.ip,
                    arp_repr.source_hw_addr,
                    arp_repr.source_proto_addr,
                );

                let mut buffer =
                    vec![0; EthernetFrame::<&[u8]>::buffer_len(arp_reply.buffer_len())];
                {
                    let mut reply_frame = EthernetFrame::try_new(&mut buffer[..]).unwrap();
                    reply_frame.set_dst_addr(arp_repr.source_hw_addr);
                    reply_frame.set_src_addr(interface.mac);
                    reply_frame.set_ethertype(eth_types::ARP);
                    arp_reply.serialize(reply_frame.payload_mut()).unwrap();
                }

                debug!(
                    "sending ARP reply for {} to {}",
                    arp_repr.target_proto_addr, arp_repr.source_proto_addr
                );
                self.send(&buffer, iface);
                Ok(())
            }
            ArpOp::Reply => {
                if self.arp_cache.has_request(arp_repr.source_proto_addr) {
                    self.arp_cache
                        .insert(arp_repr.source_proto_addr, arp_repr.source_hw_addr);
                    Ok(())
                } else {
                    debug!(
                        "ignoring unsolicited ARP reply from {}",
                        arp_repr.source_proto_addr
                    );
                    Err(Error::NoOp)
                }
            }
        }
    }

    fn recv_ipv4(&self, eth_frame: &EthernetFrame<&[u8]>, iface: &str) -> Result<()> {
        let ipv4_packet = Ipv4Packet::try_new(eth_frame.payload())?;
        ipv4_packet.check_encoding()?;

        if self.routing_table.is_local(ipv4_packet.dst_addr()) {
            self.deliver_local(eth_frame, &ipv4_packet, iface)
        } else {
            self.forward(eth_frame, &ipv4_packet, iface)
        }
    }

    fn deliver_local(
        &self,
        eth_frame: &EthernetFrame<&[u8]>,
        ipv4_packet: &Ipv4Packet<&[u8]>,
        iface: &str,
    ) -> Result<()> {
        match ipv4_packet.protocol() {
            ipv4_protocols::ICMP => self.recv_echo_request(eth_frame, ipv4_packet, iface),
            ipv4_protocols::TCP | ipv4_protocols::UDP => {
                let interface = self.routing_table.interface(iface);

                debug!("sending port unreachable to {}", ipv4_packet.src_addr());
                let reply = icmp::error_frame(
                    &interface,
                    eth_frame.src_addr(),
                    ipv4_packet.src_addr(),
                    Icmpv4Message::DestinationUnreachable(DestinationUnreachable::PortUnreachable),
                    eth_frame.payload(),
                );
                self.send(&reply, iface);
                Ok(())
            }
            protocol => {
                debug!(
                    "ignoring local delivery with protocol {} from {}",
                    protocol,
                    ipv4_packet.src_addr()
                );
                Err(Error::NoOp)
            }
        }
    }

    fn recv_echo_request(
        &self,
        eth_frame: &EthernetFrame<&[u8]>,
        ipv4_packet: &Ipv4Packet<&[u8]>,
        iface: &str,
    ) -> Result<()> {
        let icmp_packet = Icmpv4Packet::try_new(ipv4_packet.payload())?;
        match Icmpv4Repr::deserialize(&icmp_packet) {
            Ok(Icmpv4Repr {
                message: Icmpv4Message::EchoRequest { .. },
                ..
            }) => {}
            _ => {
                debug!(
                    "ignoring ICMP to {} that is not an echo request",
                    ipv4_packet.dst_addr()
                );
                return Err(Error::NoOp);
            }
        }

        debug!("got a ping from {}; sending reply", ipv4_packet.src_addr());

        let mut buffer = eth_frame.as_ref().to_vec();
        {
            let mut reply_frame = EthernetFrame::try_new(&mut buffer[..]).unwrap();
            reply_frame.set_dst_addr(eth_frame.src_addr());
            reply_frame.set_src_addr(self.routing_table.interface(iface).mac);

            let mut reply_ipv4 = Ipv4Packet::try_new(reply_frame.payload_mut()).unwrap();
            let (src_addr, dst_addr) = (reply_ipv4.src_addr(), reply_ipv4.dst_addr());
            reply_ipv4.set_src_addr(dst_addr);
            reply_ipv4.set_dst_addr(src_addr);
            let ttl = reply_ipv4.ttl();
            reply_ipv4.set_ttl(ttl.saturating_sub(1));
            reply_ipv4.fill_checksum();

            let mut reply_icmp = Icmpv4Packet::try_new(reply_ipv4.payload_mut()).unwrap();
            reply_icmp.set_type(0);
            reply_icmp.fill_checksum();
        }

        self.send(&buffer, iface);
        Ok(())
    }

    fn forward(
        &self,
        eth_frame: &EthernetFrame<&[u8]>,
        ipv4_packet: &Ipv4Packet<&[u8]>,
        iface: &str,
    ) -> Result<()> {
        let src_addr = ipv4_packet.src_addr();
        let dst_addr = ipv4_packet.dst_addr();

        if ipv4_packet.ttl() <= 1 {
            let interface = self.routing_table.interface(iface);

            debug!(
                "TTL expired forwarding {} to {}; sending time exceeded",
                src_addr, dst_addr
            );
            let reply = icmp::error_frame(
                &interface,
                eth_frame.src_addr(),
                src_addr,
                Icmpv4Message::TimeExceeded(TimeExceeded::TtlExpired),
                eth_frame.payload(),
            );
            self.send(&reply, iface);
            return Ok(());
        }

        let entry = match self.routing_table.route(dst_addr) {
            Some(entry) => entry,
            None => {
                let interface = self.routing_table.interface(iface);

                debug!("no route for {}; sending net unreachable", dst_addr);
                let reply = icmp::error_frame(
                    &interface,
                    eth_frame.src_addr(),
                    src_addr,
                    Icmpv4Message::DestinationUnreachable(DestinationUnreachable::NetUnreachable),
                    eth_frame.payload(),
                );
                self.send(&reply, iface);
                return Err(Error::Unroutable);
            }
        };

        let mut buffer = eth_frame.as_ref().to_vec();
        {
            let mut forward_ipv4 =
                Ipv4Packet::try_new(&mut buffer[EthernetFrame::<&[u8]>::HEADER_LEN ..]).unwrap();
            let ttl = forward_ipv4.ttl();
            forward_ipv4.set_ttl(ttl - 1);
            forward_ipv4.fill_checksum();
        }

        let next_hop = if entry.gateway.is_unspecified() {
            dst_addr
        } else {
            entry.gateway
        };

        match self.arp_cache.lookup(next_hop) {
            Some(mac) => {
                {
                    let mut forward_frame = EthernetFrame::try_new(&mut buffer[..]).unwrap();
                    forward_frame.set_src_addr(self.routing_table.interface(&entry.iface).mac);
                    forward_frame.set_dst_addr(mac);
                    forward_frame.set_ethertype(eth_types::IPV4);
                }

                debug!(
                    "forwarding {} to {} via {} on {}",
                    src_addr, dst_addr, next_hop, entry.iface
                );
                self.send(&buffer, &entry.iface);
            }
            None => {
                debug!(
                    "queueing packet for {} pending resolution of {} on {}",
                    dst_addr, next_hop, entry.iface
                );
                self.arp_cache.queue(next_hop, buffer, &entry.iface);
            }
        }

        Ok(())
    }

    fn send(&self, frame: &[u8], iface: &str) {
        if let Err(err) = self.packet_sender.send(frame, iface) {
            warn!("failed to send frame on {}: {:?}", iface, err);
        }
    }
}
