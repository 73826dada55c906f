//! Shared harness: a three interface topology around a recording
//! PacketSender and a mock clock.

use std::sync::{
    Arc,
    Mutex,
};
use std::time::Duration;

use usrroute::core::arp_cache::ArpCache;
use usrroute::core::dev::PacketSender;
use usrroute::core::repr::{
    eth_types,
    ipv4_protocols,
    Arp,
    EthernetAddress,
    EthernetFrame,
    Icmpv4Message,
    Icmpv4Packet,
    Icmpv4Repr,
    Ipv4Address,
    Ipv4Packet,
};
use usrroute::core::router::Router;
use usrroute::core::routing::RoutingTable;
use usrroute::core::time::MockEnv;
use usrroute::Result;

pub const ETH0_MAC: &'static str = "AA:AA:AA:AA:AA:00";
pub const ETH0_IP: &'static str = "10.0.0.1";

pub const ETH1_MAC: &'static str = "AA:AA:AA:AA:AA:01";
pub const ETH1_IP: &'static str = "10.0.1.1";

pub const ETH2_MAC: &'static str = "AA:AA:AA:AA:AA:02";
pub const ETH2_IP: &'static str = "10.0.2.1";

lazy_static! {
    pub static ref ARP_TIMEOUT: Duration = Duration::from_secs(1);
}

/// A PacketSender that records every frame handed to it.
pub struct TestSender {
    frames: Mutex<Vec<(Vec<u8>, String)>>,
}

impl TestSender {
    pub fn new() -> TestSender {
        TestSender {
            frames: Mutex::new(Vec::new()),
        }
    }

    /// Drains the frames recorded so far.
    pub fn take(&self) -> Vec<(Vec<u8>, String)> {
        self.frames.lock().unwrap().split_off(0)
    }
}

impl PacketSender for TestSender {
    fn send(&self, frame: &[u8], iface: &str) -> Result<()> {
        self.frames
            .lock()
            .unwrap()
            .push((frame.to_vec(), iface.to_string()));
        Ok(())
    }
}

pub struct Context {
    pub router: Router<MockEnv>,
    pub sender: Arc<TestSender>,
    pub env: MockEnv,
}

/// Builds a router with interfaces eth0/eth1/eth2, a directly attached
/// network on each, and 10.0.2.0/24 also reachable via the 10.0.1.2
/// gateway on eth1.
pub fn context() -> Context {
    let _ = env_logger::try_init();

    let text = "10.0.0.0 0.0.0.0 255.255.255.0 eth0\n\
                10.0.1.0 0.0.0.0 255.255.255.0 eth1\n\
                10.0.2.0 10.0.1.2 255.255.255.0 eth1\n";
    let routing_table = Arc::new(RoutingTable::from_reader(text.as_bytes()).unwrap());
    routing_table.set_interface("eth0", mac(ETH0_MAC), ipv4(ETH0_IP));
    routing_table.set_interface("eth1", mac(ETH1_MAC), ipv4(ETH1_IP));
    routing_table.set_interface("eth2", mac(ETH2_MAC), ipv4(ETH2_IP));

    let sender = Arc::new(TestSender::new());
    let env = MockEnv::new();
    let arp_cache = ArpCache::with_env(
        *ARP_TIMEOUT,
        routing_table.clone(),
        sender.clone(),
        env.clone(),
    );
    let router = Router::with_cache(routing_table, sender.clone(), arp_cache);

    Context {
        router,
        sender,
        env,
    }
}

pub fn mac(addr: &str) -> EthernetAddress {
    addr.parse().unwrap()
}

pub fn ipv4(addr: &str) -> Ipv4Address {
    addr.parse().unwrap()
}

/// Builds an Ethernet frame carrying an IPv4 packet with the specified
/// protocol and payload.
pub fn ipv4_frame(
    src_mac: &str,
    dst_mac: &str,
    src_ip: &str,
    dst_ip: &str,
    ttl: u8,
    protocol: u8,
    payload: &[u8],
) -> Vec<u8> {
    let ipv4_len = Ipv4Packet::<&[u8]>::buffer_len(payload.len());
    let mut buffer = vec![0; EthernetFrame::<&[u8]>::buffer_len(ipv4_len)];

    {
        let mut eth_frame = EthernetFrame::try_new(&mut buffer[..]).unwrap();
        eth_frame.set_dst_addr(mac(dst_mac));
        eth_frame.set_src_addr(mac(src_mac));
        eth_frame.set_ethertype(eth_types::IPV4);

        let mut ipv4_packet = Ipv4Packet::try_new(eth_frame.payload_mut()).unwrap();
        ipv4_packet.set_ip_version(4);
        ipv4_packet.set_header_len(5);
        ipv4_packet.set_packet_len(ipv4_len as u16);
        ipv4_packet.set_identification(0);
        ipv4_packet.set_flags(0);
        ipv4_packet.set_ttl(ttl);
        ipv4_packet.set_protocol(protocol);
        ipv4_packet.set_src_addr(ipv4(src_ip));
        ipv4_packet.set_dst_addr(ipv4(dst_ip));
        ipv4_packet.fill_checksum();
        ipv4_packet.payload_mut().copy_from_slice(payload);
    }

    buffer
}

/// Builds an Ethernet frame carrying an ICMP echo request.
pub fn echo_request_frame(
    src_mac: &str,
    dst_mac: &str,
    src_ip: &str,
    dst_ip: &str,
    ttl: u8,
    id: u16,
    seq: u16,
    payload: &[u8],
) -> Vec<u8> {
    let icmp_len = Icmpv4Packet::<&[u8]>::buffer_len(payload.len());
    let mut buffer = ipv4_frame(
        src_mac,
        dst_mac,
        src_ip,
        dst_ip,
        ttl,
        ipv4_protocols::ICMP,
        &vec![0; icmp_len][..],
    );

    {
        let mut eth_frame = EthernetFrame::try_new(&mut buffer[..]).unwrap();
        let mut ipv4_packet = Ipv4Packet::try_new(eth_frame.payload_mut()).unwrap();
        let mut icmp_packet = Icmpv4Packet::try_new(ipv4_packet.payload_mut()).unwrap();
        let repr = Icmpv4Repr {
            message: Icmpv4Message::EchoRequest { id, seq },
            payload_len: payload.len(),
        };
        repr.serialize(&mut icmp_packet);
        icmp_packet.payload_mut().copy_from_slice(payload);
        icmp_packet.fill_checksum();
    }

    buffer
}

/// Builds a broadcast ARP request frame.
pub fn arp_request_frame(src_mac: &str, src_ip: &str, target_ip: &str) -> Vec<u8> {
    let arp_repr = Arp::request(mac(src_mac), ipv4(src_ip), ipv4(target_ip));
    arp_frame(&arp_repr, mac(src_mac), EthernetAddress::BROADCAST)
}

/// Builds an ARP reply frame advertising the source mapping.
pub fn arp_reply_frame(src_mac: &str, src_ip: &str, dst_mac: &str, dst_ip: &str) -> Vec<u8> {
    let arp_repr = Arp::reply(mac(src_mac), ipv4(src_ip), mac(dst_mac), ipv4(dst_ip));
    arp_frame(&arp_repr, mac(src_mac), mac(dst_mac))
}

fn arp_frame(arp_repr: &Arp, src_mac: EthernetAddress, dst_mac: EthernetAddress) -> Vec<u8> {
    let mut buffer = vec![0; EthernetFrame::<&[u8]>::buffer_len(arp_repr.buffer_len())];

    {
        let mut eth_frame = EthernetFrame::try_new(&mut buffer[..]).unwrap();
        eth_frame.set_dst_addr(dst_mac);
        eth_frame.set_src_addr(src_mac);
        eth_frame.set_ethertype(eth_types::ARP);
        arp_repr.serialize(eth_frame.payload_mut()).unwrap();
    }

    buffer
}
