//! Static routes and the local interface registry.

use std::collections::HashMap;
use std::fs::File;
use std::io::{
    BufRead,
    BufReader,
    Read,
};
use std::path::Path;
use std::sync::RwLock;

use {
    Error,
    Result,
};
use core::repr::{
    EthernetAddress,
    Ipv4Address,
};

/// A static route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingEntry {
    pub dest: Ipv4Address,
    pub gateway: Ipv4Address,
    pub mask: Ipv4Address,
    pub iface: String,
}

/// A local interface with its link and network addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingInterface {
    pub name: String,
    pub mac: EthernetAddress,
    pub ip: Ipv4Address,
}

/// An immutable after load set of static routes plus the registry of
/// local interfaces.
///
/// Routes are fixed once loading completes; the interface registry is
/// populated by the IO layer before packet processing begins and stable
/// thereafter, so the table can be shared by reference across threads.
#[derive(Debug)]
pub struct RoutingTable {
    entries: Vec<RoutingEntry>,
    interfaces: RwLock<HashMap<String, RoutingInterface>>,
}

impl RoutingTable {
    /// Creates an empty routing table.
    pub fn new() -> RoutingTable {
        RoutingTable {
            entries: Vec::new(),
            interfaces: RwLock::new(HashMap::new()),
        }
    }

    /// Loads a routing table from a file.
    ///
    /// See from_reader(...) for the expected format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<RoutingTable> {
        RoutingTable::from_reader(File::open(path)?)
    }

    /// Loads a routing table from UTF-8 text with one route per line:
    /// four whitespace separated fields holding the destination, gateway
    /// and mask in dotted quad form followed by the interface name. Blank
    /// lines are ignored. Routes keep their order of appearance.
    pub fn from_reader<R: Read>(reader: R) -> Result<RoutingTable> {
        let mut table = RoutingTable::new();

        for line in BufReader::new(reader).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = parse_route(&line)?;
            table.add_route(entry);
        }

        Ok(table)
    }

    /// Appends a route. Routes are matched in insertion order when their
    /// prefix lengths tie.
    pub fn add_route(&mut self, entry: RoutingEntry) {
        self.entries.push(entry);
    }

    /// Registers a local interface. Called once per interface by the IO
    /// layer before the router begins processing frames.
    pub fn set_interface(&self, name: &str, mac: EthernetAddress, ip: Ipv4Address) {
        let interface = RoutingInterface {
            name: name.to_string(),
            mac,
            ip,
        };
        self.interfaces
            .write()
            .unwrap()
            .insert(name.to_string(), interface);
    }

    /// Returns the named interface.
    ///
    /// # Panics
    ///
    /// Looking up an interface that was never registered is a programmer
    /// error and panics.
    pub fn interface(&self, name: &str) -> RoutingInterface {
        self.interfaces
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("no interface named {}", name))
    }

    /// Returns a snapshot of every registered interface.
    pub fn interfaces(&self) -> Vec<RoutingInterface> {
        self.interfaces.read().unwrap().values().cloned().collect()
    }

    /// Checks if an address is assigned to any local interface.
    pub fn is_local(&self, addr: Ipv4Address) -> bool {
        self.interfaces
            .read()
            .unwrap()
            .values()
            .any(|interface| interface.ip == addr)
    }

    /// Returns the longest prefix match for an address: among the entries
    /// whose masked destination equals the masked address, the one with
    /// the most set bits in its mask, earliest entry winning ties.
    pub fn route(&self, addr: Ipv4Address) -> Option<RoutingEntry> {
        let mut best: Option<(&RoutingEntry, u32)> = None;

        for entry in &self.entries {
            if addr.mask(&entry.mask) != entry.dest.mask(&entry.mask) {
                continue;
            }

            let prefix_len = entry.mask.prefix_len();
            let better = match best {
                Some((_, best_prefix_len)) => prefix_len > best_prefix_len,
                None => true,
            };
            if better {
                best = Some((entry, prefix_len));
            }
        }

        if best.is_none() {
            debug!("no routing entry for {}", addr);
        }

        best.map(|(entry, _)| entry.clone())
    }
}

fn parse_route(line: &str) -> Result<RoutingEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 4 {
        return Err(Error::InvalidRoutingTable);
    }

    let mut addrs = tokens[.. 3]
        .iter()
        .map(|token| token.parse::<Ipv4Address>());

    let dest = addrs.next().unwrap().map_err(|_| Error::InvalidRoutingTable)?;
    let gateway = addrs.next().unwrap().map_err(|_| Error::InvalidRoutingTable)?;
    let mask = addrs.next().unwrap().map_err(|_| Error::InvalidRoutingTable)?;

    Ok(RoutingEntry {
        dest,
        gateway,
        mask,
        iface: tokens[3].to_string(),
    })
}
