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

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationUnreachable {
    NetUnreachable,
    HostUnreachable,
    PortUnreachable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeExceeded {
    TtlExpired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    EchoReply { id: u16, seq: u16 },
    EchoRequest { id: u16, seq: u16 },
    DestinationUnreachable(DestinationUnreachable),
    TimeExceeded(TimeExceeded),
}

/// An ICMP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub message: Message,
    pub payload_len: usize,
}

impl Repr {
    /// Returns the buffer size needed to serialize the ICMP header and
    /// associated payload.
    pub fn buffer_len(&self) -> usize {
        8 + self.payload_len
    }

    /// Tries to deserialize a packet into an ICMP header.
    pub fn deserialize<T>(packet: &Packet<T>) -> Result<Repr>
    where
        T: AsRef<[u8]>,
    {
        let (id, seq) = (
            (&packet.header()[0 .. 2])
                .read_u16::<NetworkEndian>()
                .unwrap(),
            (&packet.header()[2 .. 4])
                .read_u16::<NetworkEndian>()
                .unwrap(),
        );

        let payload_len = packet.payload().len();

        let message = match (packet._type(), packet.code()) {
            (0, 0) => Message::EchoReply { id, seq },
            (8, 0) => Message::EchoRequest { id, seq },
            (3, 0) => Message::DestinationUnreachable(DestinationUnreachable::NetUnreachable),
            (3, 1) => Message::DestinationUnreachable(DestinationUnreachable::HostUnreachable),
            (3, 3) => Message::DestinationUnreachable(DestinationUnreachable::PortUnreachable),
            (11, 0) => Message::TimeExceeded(TimeExceeded::TtlExpired),
            _ => return Err(Error::Malformed),
        };

        Ok(Repr {
            message,
            payload_len,
        })
    }

    /// Serializes the ICMP header into a packet.
    ///
    /// NOTE: Use fill_checksum() on the packet after the payload is
    /// written as well!
    pub fn serialize<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        fn echo<T>(packet: &mut Packet<T>, type_of: u8, id: u16, seq: u16)
        where
            T: AsRef<[u8]> + AsMut<[u8]>,
        {
            packet.set_type(type_of);
            packet.set_code(0);

            (&mut packet.header_mut()[0 .. 2])
                .write_u16::<NetworkEndian>(id)
                .unwrap();
            (&mut packet.header_mut()[2 .. 4])
                .write_u16::<NetworkEndian>(seq)
                .unwrap();
        }

        fn error<T>(packet: &mut Packet<T>, type_of: u8, code: u8)
        where
            T: AsRef<[u8]> + AsMut<[u8]>,
        {
            packet.set_type(type_of);
            packet.set_code(code);
            let zeros = [0; 4];
            packet.header_mut().copy_from_slice(&zeros[..]);
        }

        match self.message {
            Message::EchoReply { id, seq } => echo(packet, 0, id, seq),
            Message::EchoRequest { id, seq } => echo(packet, 8, id, seq),
            Message::DestinationUnreachable(message) => {
                let code = match message {
                    DestinationUnreachable::NetUnreachable => 0,
                    DestinationUnreachable::HostUnreachable => 1,
                    DestinationUnreachable::PortUnreachable => 3,
                };
                error(packet, 3, code);
            }
            Message::TimeExceeded(message) => {
                let code = match message {
                    TimeExceeded::TtlExpired => 0,
                };
                error(packet, 11, code);
            }
        };
    }
}

/// [https://en.wikipedia.org/wiki/Internet_Control_Message_Protocol](https://en.wikipedia.org/wiki/Internet_Control_Message_Protocol)
mod fields {
    use std::ops::{
        Range,
        RangeFrom,
    };

    pub const TYPE: usize = 0;

    pub const CODE: usize = 1;

    pub const CHECKSUM: Range<usize> = 2 .. 4;

    pub const HEADER: Range<usize> = 4 .. 8;

    pub const PAYLOAD: RangeFrom<usize> = 8 ..;
}

/// View of a byte buffer as an ICMP packet.
#[derive(Debug)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const HEADER_LEN: usize = 8;

    /// Tries to create an ICMP packet view over a byte buffer.
    ///
    /// NOTE: Use check_encoding() before operating on the packet if the
    /// buffer originates from an untrusted source such as a link.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of an ICMP packet with the specified payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::HEADER_LEN + payload_len
    }

    /// Checks if the packet has a valid checksum.
    pub fn check_encoding(&self) -> Result<()> {
        if self.gen_packet_checksum() != 0 {
            Err(Error::Checksum)
        } else {
            Ok(())
        }
    }

    /// Calculates the checksum over the entire packet.
    pub fn gen_packet_checksum(&self) -> u16 {
        internet_checksum(self.buffer.as_ref())
    }

    pub fn _type(&self) -> u8 {
        self.buffer.as_ref()[fields::TYPE]
    }

    pub fn code(&self) -> u8 {
        self.buffer.as_ref()[fields::CODE]
    }

    pub fn checksum(&self) -> u16 {
        (&self.buffer.as_ref()[fields::CHECKSUM])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn header(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::HEADER]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::PAYLOAD]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_type(&mut self, type_of: u8) {
        self.buffer.as_mut()[fields::TYPE] = type_of
    }

    pub fn set_code(&mut self, code: u8) {
        self.buffer.as_mut()[fields::CODE] = code;
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        (&mut self.buffer.as_mut()[fields::CHECKSUM])
            .write_u16::<NetworkEndian>(checksum)
            .unwrap()
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::HEADER]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::PAYLOAD]
    }

    /// Zeroes the checksum field and writes the recomputed value.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let checksum = self.gen_packet_checksum();
        self.set_checksum(checksum);
    }
}
