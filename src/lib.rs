#[cfg(test)]
#[macro_use]
extern crate assert_matches;
extern crate byteorder;
#[macro_use]
extern crate log;

pub mod core;

use std::io::Error as IOError;
use std::result::Result as StdResult;

#[derive(Debug)]
pub enum Error {
    /// Indicates an error where a buffer is too small or too large.
    Exhausted,
    /// Indicates an error where a packet or frame is malformed.
    Malformed,
    /// Indicates an error where a checksum is invalid.
    Checksum,
    /// Indicates an error where no route matches a destination.
    Unroutable,
    /// Indicates an error where the routing table file could not be parsed.
    InvalidRoutingTable,
    /// Indicates an error where the operation was not performed.
    NoOp,
    /// Indicates a generic IO error.
    IO(IOError),
}

impl From<IOError> for Error {
    fn from(err: IOError) -> Error {
        Error::IO(err)
    }
}

pub type Result<T> = StdResult<T, Error>;
