use Result;

/// A low level interface for transmitting frames.
///
/// Implementations hand fully formed Ethernet frames to the underlying
/// packet IO driver. A sender is shared between the router and the ARP
/// cache worker thread so it must be safe for concurrent use.
pub trait PacketSender: Send + Sync {
    /// Transmits a frame on the named interface.
    fn send(&self, frame: &[u8], iface: &str) -> Result<()>;
}
