use std;
use std::io::Write;

use byteorder::{
    NetworkEndian,
    ReadBytesExt,
    WriteBytesExt,
};

use {
    Error,
    Result,
};
use core::check::internet_checksum;

/// [IPv4 address](https://en.wikipedia.org/wiki/IPv4) in network byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address([u8; 4]);

impl Address {
    /// Creates an IPv4 address from a network byte order buffer.
    pub fn new(addr: [u8; 4]) -> Address {
        Address(addr)
    }

    /// Tries to create an IPv4 address from a network byte order slice.
    pub fn try_new(addr: &[u8]) -> Result<Address> {
        if addr.len() != 4 {
            return Err(Error::Exhausted);
        }

        let mut _addr: [u8; 4] = [0; 4];
        _addr.clone_from_slice(addr);
        Ok(Address(_addr))
    }

    /// Returns a reference to the network byte order representation of the address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Checks if this is the all zeroes address.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 4]
    }

    /// Returns the number of set bits, the prefix length when the address
    /// is a subnet mask.
    pub fn prefix_len(&self) -> u32 {
        self.0.iter().map(|byte| byte.count_ones()).sum()
    }

    /// Applies a subnet mask to the address.
    pub fn mask(&self, mask: &Address) -> Address {
        Address([
            self.0[0] & mask.0[0],
            self.0[1] & mask.0[1],
            self.0[2] & mask.0[2],
            self.0[3] & mask.0[3],
        ])
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl std::str::FromStr for Address {
    type Err = ();

    /// Parses an IPv4 address from an A.B.C.D style string.
    fn from_str(addr: &str) -> std::result::Result<Address, Self::Err> {
        let (bytes, unknown): (Vec<_>, Vec<_>) = addr.split(".")
            .map(|token| token.parse::<u8>())
            .partition(|byte| !byte.is_err());

        if bytes.len() != 4 || unknown.len() > 0 {
            return Err(());
        }

        let bytes: Vec<_> = bytes.into_iter().map(|byte| byte.unwrap()).collect();

        let mut ipv4: [u8; 4] = [0; 4];
        ipv4.clone_from_slice(&bytes);

        Ok(Address::new(ipv4))
    }
}

/// [https://www.iana.org/assignments/protocol-numbers/protocol-numbers.xhtml](https://www.iana.org/assignments/protocol-numbers/protocol-numbers.xhtml)
pub mod ipv4_protocols {
    pub const ICMP: u8 = 1;

    pub const TCP: u8 = 6;

    pub const UDP: u8 = 17;
}

pub mod ipv4_flags {
    pub const DONT_FRAGMENT: u8 = 0b010;
}

/// [https://en.wikipedia.org/wiki/IPv4](https://en.wikipedia.org/wiki/IPv4)
mod fields {
    use std::ops::Range;

    pub const VERSION_AND_HEADER_LEN: usize = 0;

    pub const PACKET_LEN: Range<usize> = 2 .. 4;

    pub const IDENTIFICATION: Range<usize> = 4 .. 6;

    pub const FLAGS: usize = 6;

    pub const TTL: usize = 8;

    pub const PROTOCOL: usize = 9;

    pub const CHECKSUM: Range<usize> = 10 .. 12;

    pub const SRC_ADDR: Range<usize> = 12 .. 16;

    pub const DST_ADDR: Range<usize> = 16 .. 20;
}

/// View of a byte buffer as an IPv4 packet.
#[derive(Debug)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const MIN_HEADER_LEN: usize = 20;

    /// Tries to create an IPv4 packet view over a byte buffer.
    ///
    /// Use check_encoding() before operating on the packet if the buffer
    /// originates from an untrusted source such as a link.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        let buffer_len = buffer.as_ref().len();

        if buffer_len < Self::MIN_HEADER_LEN || buffer_len > std::u16::MAX as usize {
            return Err(Error::Exhausted);
        }

        Ok(Packet { buffer })
    }

    /// Returns the length of an IPv4 packet with no options and the
    /// specified payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::MIN_HEADER_LEN + payload_len
    }

    /// Checks if the packet encoding is valid, including the header checksum.
    pub fn check_encoding(&self) -> Result<()> {
        if self.ip_version() != 4 || self.header_len() < 5
            || ((self.header_len() * 4) as usize) > self.buffer.as_ref().len()
            || (self.packet_len() as usize) > self.buffer.as_ref().len()
            || (self.packet_len() as usize) < ((self.header_len() * 4) as usize)
        {
            return Err(Error::Malformed);
        }

        if self.gen_header_checksum() != 0 {
            return Err(Error::Checksum);
        }

        Ok(())
    }

    /// Calculates the checksum over the entire header.
    pub fn gen_header_checksum(&self) -> u16 {
        let header_len = (self.header_len() * 4) as usize;
        internet_checksum(&self.buffer.as_ref()[.. header_len])
    }

    pub fn ip_version(&self) -> u8 {
        (self.buffer.as_ref()[fields::VERSION_AND_HEADER_LEN] & 0xF0) >> 4
    }

    pub fn header_len(&self) -> u8 {
        self.buffer.as_ref()[fields::VERSION_AND_HEADER_LEN] & 0x0F
    }

    pub fn packet_len(&self) -> u16 {
        (&self.buffer.as_ref()[fields::PACKET_LEN])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn identification(&self) -> u16 {
        (&self.buffer.as_ref()[fields::IDENTIFICATION])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn flags(&self) -> u8 {
        (self.buffer.as_ref()[fields::FLAGS] & 0xE0) >> 5
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[fields::TTL]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer.as_ref()[fields::PROTOCOL]
    }

    pub fn header_checksum(&self) -> u16 {
        (&self.buffer.as_ref()[fields::CHECKSUM])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn src_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::SRC_ADDR]).unwrap()
    }

    pub fn dst_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::DST_ADDR]).unwrap()
    }

    /// Returns an immutable view of the payload.
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[(self.header_len() * 4) as usize ..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_ip_version(&mut self, version: u8) {
        self.buffer.as_mut()[fields::VERSION_AND_HEADER_LEN] &= !0xF0;
        self.buffer.as_mut()[fields::VERSION_AND_HEADER_LEN] |= version << 4;
    }

    pub fn set_header_len(&mut self, header_len: u8) {
        self.buffer.as_mut()[fields::VERSION_AND_HEADER_LEN] &= !0x0F;
        self.buffer.as_mut()[fields::VERSION_AND_HEADER_LEN] |= header_len & 0x0F;
    }

    pub fn set_packet_len(&mut self, packet_len: u16) {
        (&mut self.buffer.as_mut()[fields::PACKET_LEN])
            .write_u16::<NetworkEndian>(packet_len)
            .unwrap()
    }

    pub fn set_identification(&mut self, id: u16) {
        (&mut self.buffer.as_mut()[fields::IDENTIFICATION])
            .write_u16::<NetworkEndian>(id)
            .unwrap()
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.buffer.as_mut()[fields::FLAGS] &= 0x1F;
        self.buffer.as_mut()[fields::FLAGS] |= flags << 5;
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer.as_mut()[fields::TTL] = ttl;
    }

    pub fn set_protocol(&mut self, protocol: u8) {
        self.buffer.as_mut()[fields::PROTOCOL] = protocol;
    }

    pub fn set_header_checksum(&mut self, header_checksum: u16) {
        (&mut self.buffer.as_mut()[fields::CHECKSUM])
            .write_u16::<NetworkEndian>(header_checksum)
            .unwrap()
    }

    pub fn set_src_addr(&mut self, addr: Address) {
        (&mut self.buffer.as_mut()[fields::SRC_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    pub fn set_dst_addr(&mut self, addr: Address) {
        (&mut self.buffer.as_mut()[fields::DST_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    /// Zeroes the checksum field and writes the recomputed value.
    pub fn fill_checksum(&mut self) {
        self.set_header_checksum(0);
        let checksum = self.gen_header_checksum();
        self.set_header_checksum(checksum);
    }

    /// Returns a mutable view of the payload.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        &mut self.buffer.as_mut()[(header_len * 4) as usize ..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> [u8; 28] {
        [
            0x45, 0x00, 0x00, 0x1C, 0x00, 0x00, 0x40, 0x00, 0x40, 0x01, 0x23, 0xDB, 0x0A, 0x00,
            0x01, 0x02, 0x0A, 0x00, 0x02, 0x05, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]
    }

    #[test]
    fn test_packet_with_buffer_less_than_min_header() {
        let buffer: [u8; 19] = [0; 19];
        assert_matches!(Packet::try_new(&buffer[..]), Err(Error::Exhausted));
    }

    #[test]
    fn test_packet_with_header_len_greater_than_buffer_len() {
        let mut buffer = packet();
        buffer[0] = 0x4F;
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Err(Error::Malformed));
    }

    #[test]
    fn test_packet_with_packet_len_greater_than_buffer_len() {
        let mut buffer = packet();
        buffer[3] = 0xFF;
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Err(Error::Malformed));
    }

    #[test]
    fn test_packet_with_invalid_checksum() {
        let mut buffer = packet();
        buffer[10] = 0x00;
        buffer[11] = 0x00;
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Err(Error::Checksum));
    }

    #[test]
    fn test_packet_getters() {
        let buffer = packet();
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Ok(_));
        assert_eq!(4, packet.ip_version());
        assert_eq!(5, packet.header_len());
        assert_eq!(28, packet.packet_len());
        assert_eq!(0, packet.identification());
        assert_eq!(ipv4_flags::DONT_FRAGMENT, packet.flags());
        assert_eq!(64, packet.ttl());
        assert_eq!(ipv4_protocols::ICMP, packet.protocol());
        assert_eq!(0x23DB, packet.header_checksum());
        assert_eq!(Address::new([10, 0, 1, 2]), packet.src_addr());
        assert_eq!(Address::new([10, 0, 2, 5]), packet.dst_addr());
        assert_eq!(8, packet.payload().len());
    }

    #[test]
    fn test_fill_checksum_restores_original() {
        let mut buffer = packet();

        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            packet.set_header_checksum(0);
            packet.fill_checksum();
        }

        assert_eq!(&buffer[..], &packet()[..]);
    }

    #[test]
    fn test_address_from_str() {
        assert_eq!(
            "10.0.1.2".parse::<Address>().unwrap(),
            Address::new([10, 0, 1, 2])
        );
        assert_matches!("10.0.1".parse::<Address>(), Err(()));
        assert_matches!("10.0.1.256".parse::<Address>(), Err(()));
    }

    #[test]
    fn test_address_mask_and_prefix_len() {
        let addr = Address::new([10, 0, 2, 5]);
        let mask = Address::new([255, 255, 255, 0]);
        assert_eq!(addr.mask(&mask), Address::new([10, 0, 2, 0]));
        assert_eq!(mask.prefix_len(), 24);
        assert!(Address::new([0, 0, 0, 0]).is_unspecified());
    }
}
