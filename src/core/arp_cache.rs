//! A concurrent ARP resolver with request retransmission and packet
//! queueing.

use std::collections::HashMap;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::{
    Arc,
    Mutex,
};
use std::thread;
use std::time::{
    Duration,
    Instant,
};

use core::dev::PacketSender;
use core::icmp;
use core::repr::{
    eth_types,
    Arp,
    DestinationUnreachable,
    EthernetAddress,
    EthernetFrame,
    Icmpv4Message,
    Ipv4Address,
    Ipv4Packet,
};
use core::routing::RoutingTable;
use core::time::{
    Env,
    SystemEnv,
};

/// How often the worker thread scans for stale requests and entries.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// How many times a request is transmitted before the packets queued on
/// it are bounced with a host unreachable.
const MAX_REQUEST_SENDS: u32 = 7;

struct Entry {
    mac: EthernetAddress,
    time_added: Instant,
}

struct AwaitingPacket {
    frame: Vec<u8>,
    iface: String,
}

struct Request {
    last_sent: Instant,
    times_sent: u32,
    awaiting: Vec<AwaitingPacket>,
}

struct Cache<T: Env> {
    entries: HashMap<Ipv4Address, Entry>,
    requests: HashMap<Ipv4Address, Request>,
    timeout: Duration,
    time_env: T,
    routing_table: Arc<RoutingTable>,
    packet_sender: Arc<PacketSender>,
}

impl<T: Env> Cache<T> {
    fn lookup(&mut self, addr: Ipv4Address) -> Option<EthernetAddress> {
        let now = self.time_env.now_instant();

        let stale = match self.entries.get(&addr) {
            Some(entry) => now.duration_since(entry.time_added) >= self.timeout,
            None => return None,
        };

        // Removing the entry here keeps an address out of both tables: a
        // queue(...) following this lookup creates a request, and the
        // stale entry must not linger until the next tick.
        if stale {
            self.entries.remove(&addr);
            return None;
        }

        self.entries.get(&addr).map(|entry| entry.mac)
    }

    fn queue(&mut self, addr: Ipv4Address, frame: Vec<u8>, iface: &str) {
        let awaiting = AwaitingPacket {
            frame,
            iface: iface.to_string(),
        };

        if let Some(request) = self.requests.get_mut(&addr) {
            request.awaiting.push(awaiting);
            return;
        }

        let request = Request {
            last_sent: self.time_env.now_instant(),
            times_sent: 0,
            awaiting: vec![awaiting],
        };
        self.requests.insert(addr, request);
        self.send_request(addr);
    }

    fn insert(&mut self, addr: Ipv4Address, mac: EthernetAddress) {
        let request = match self.requests.remove(&addr) {
            Some(request) => request,
            None => {
                debug!("discarding unsolicited mapping from {} to {}", addr, mac);
                return;
            }
        };

        debug!(
            "resolved {} to {}; flushing {} queued packets",
            addr,
            mac,
            request.awaiting.len()
        );

        let entry = Entry {
            mac,
            time_added: self.time_env.now_instant(),
        };
        self.entries.insert(addr, entry);

        for awaiting in request.awaiting {
            let src_mac = self.routing_table.interface(&awaiting.iface).mac;
            let mut buffer = awaiting.frame;

            {
                let mut eth_frame = match EthernetFrame::try_new(&mut buffer[..]) {
                    Ok(eth_frame) => eth_frame,
                    Err(_) => continue,
                };
                eth_frame.set_src_addr(src_mac);
                eth_frame.set_dst_addr(mac);
            }

            if let Err(err) = self.packet_sender.send(&buffer, &awaiting.iface) {
                warn!("failed to send frame on {}: {:?}", awaiting.iface, err);
            }
        }
    }

    fn has_request(&self, addr: Ipv4Address) -> bool {
        self.requests.contains_key(&addr)
    }

    fn tick(&mut self) {
        let now = self.time_env.now_instant();
        let timeout = self.timeout;

        let stale: Vec<Ipv4Address> = self.requests
            .iter()
            .filter(|(_, request)| now.duration_since(request.last_sent) >= timeout)
            .map(|(addr, _)| *addr)
            .collect();

        for addr in stale {
            self.send_request(addr);
        }

        self.entries
            .retain(|_, entry| now.duration_since(entry.time_added) < timeout);
    }

    /// Transmits (or retransmits) the ARP request for a target, or fails
    /// the request once its sends are exhausted.
    fn send_request(&mut self, target: Ipv4Address) {
        let now = self.time_env.now_instant();

        let exhausted = match self.requests.get(&target) {
            Some(request) => request.times_sent >= MAX_REQUEST_SENDS,
            None => return,
        };

        if exhausted {
            let request = self.requests.remove(&target).unwrap();
            warn!(
                "no reply for {} after {} requests; bouncing {} queued packets",
                target,
                request.times_sent,
                request.awaiting.len()
            );
            for awaiting in &request.awaiting {
                self.send_host_unreachable(awaiting);
            }
            return;
        }

        let entry = match self.routing_table.route(target) {
            Some(entry) => entry,
            None => {
                warn!("no route for ARP target {}; deferring request", target);
                return;
            }
        };
        let iface = self.routing_table.interface(&entry.iface);

        let arp_repr = Arp::request(iface.mac, iface.ip, target);
        let mut buffer = vec![0; EthernetFrame::<&[u8]>::buffer_len(arp_repr.buffer_len())];
        {
            let mut eth_frame = EthernetFrame::try_new(&mut buffer[..]).unwrap();
            eth_frame.set_dst_addr(EthernetAddress::BROADCAST);
            eth_frame.set_src_addr(iface.mac);
            eth_frame.set_ethertype(eth_types::ARP);
            arp_repr.serialize(eth_frame.payload_mut()).unwrap();
        }

        debug!("sending ARP request for {} on {}", target, entry.iface);
        if let Err(err) = self.packet_sender.send(&buffer, &entry.iface) {
            warn!("failed to send ARP request on {}: {:?}", entry.iface, err);
        }

        let request = self.requests.get_mut(&target).unwrap();
        request.last_sent = now;
        request.times_sent += 1;
    }

    /// Bounces an awaiting packet with an ICMP host unreachable addressed
    /// to its original sender, routed back toward that sender when a
    /// route exists and falling back to the packet's recorded interface
    /// otherwise.
    fn send_host_unreachable(&self, awaiting: &AwaitingPacket) {
        let eth_frame = match EthernetFrame::try_new(&awaiting.frame[..]) {
            Ok(eth_frame) => eth_frame,
            Err(_) => return,
        };
        let ipv4_packet = match Ipv4Packet::try_new(eth_frame.payload()) {
            Ok(ipv4_packet) => ipv4_packet,
            Err(_) => return,
        };

        let src_addr = ipv4_packet.src_addr();
        let iface_name = match self.routing_table.route(src_addr) {
            Some(entry) => entry.iface,
            None => awaiting.iface.clone(),
        };
        let iface = self.routing_table.interface(&iface_name);

        debug!("sending host unreachable to {} on {}", src_addr, iface_name);
        let frame = icmp::error_frame(
            &iface,
            eth_frame.src_addr(),
            src_addr,
            Icmpv4Message::DestinationUnreachable(DestinationUnreachable::HostUnreachable),
            eth_frame.payload(),
        );
        if let Err(err) = self.packet_sender.send(&frame, &iface_name) {
            warn!("failed to send host unreachable on {}: {:?}", iface_name, err);
        }
    }
}

/// An expiring set of IPv4 to Ethernet address mappings plus the pending
/// requests resolving the addresses not yet mapped.
///
/// Packets queued for an unresolved address are flushed, in order, the
/// moment its reply arrives. A request is retransmitted whenever it has
/// gone `timeout` without an answer, up to seven sends; after that every
/// queued packet is answered with an ICMP host unreachable and the
/// request is dropped. Entries expire `timeout` after insertion.
///
/// All operations serialize on a single cache wide mutex, shared with
/// the background worker that drives retransmission and expiry.
pub struct ArpCache<T: Env = SystemEnv> {
    cache: Arc<Mutex<Cache<T>>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ArpCache<SystemEnv> {
    /// Creates a cache whose timers run on the system clock, with a
    /// background worker ticking every 100 ms.
    pub fn new(
        timeout: Duration,
        routing_table: Arc<RoutingTable>,
        packet_sender: Arc<PacketSender>,
    ) -> ArpCache<SystemEnv> {
        let mut arp_cache =
            ArpCache::with_env(timeout, routing_table, packet_sender, SystemEnv::new());
        arp_cache.spawn_worker();
        arp_cache
    }
}

impl<T: Env + Send + 'static> ArpCache<T> {
    /// Creates a cache without a worker thread; the owner drives tick().
    pub fn with_env(
        timeout: Duration,
        routing_table: Arc<RoutingTable>,
        packet_sender: Arc<PacketSender>,
        time_env: T,
    ) -> ArpCache<T> {
        let cache = Cache {
            entries: HashMap::new(),
            requests: HashMap::new(),
            timeout,
            time_env,
            routing_table,
            packet_sender,
        };

        ArpCache {
            cache: Arc::new(Mutex::new(cache)),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn spawn_worker(&mut self) {
        let cache = self.cache.clone();
        let shutdown = self.shutdown.clone();

        self.worker = Some(thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                cache.lock().unwrap().tick();
                thread::sleep(TICK_INTERVAL);
            }
        }));
    }

    /// Returns the cached MAC address for an IP address. Answers None for
    /// an address that was never resolved or whose entry has gone stale;
    /// resolution is never initiated.
    pub fn lookup(&self, addr: Ipv4Address) -> Option<EthernetAddress> {
        self.cache.lock().unwrap().lookup(addr)
    }

    /// Queues a frame behind the resolution of an address. The first
    /// packet queued for an address creates its request and transmits the
    /// initial broadcast ARP; the frame's Ethernet addresses are filled
    /// in when the reply arrives.
    pub fn queue(&self, addr: Ipv4Address, frame: Vec<u8>, iface: &str) {
        self.cache.lock().unwrap().queue(addr, frame, iface)
    }

    /// Installs a resolved mapping, flushing the packets queued on its
    /// request. A mapping with no pending request is discarded.
    pub fn insert(&self, addr: Ipv4Address, mac: EthernetAddress) {
        self.cache.lock().unwrap().insert(addr, mac)
    }

    /// Checks if a request is pending for an address.
    pub fn has_request(&self, addr: Ipv4Address) -> bool {
        self.cache.lock().unwrap().has_request(addr)
    }

    /// Runs one maintenance pass: retransmits requests that have gone a
    /// timeout without an answer and expires stale entries.
    pub fn tick(&self) {
        self.cache.lock().unwrap().tick()
    }
}

impl<T: Env> Drop for ArpCache<T> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
