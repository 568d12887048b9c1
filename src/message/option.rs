use std::fmt;

use nom::bytes::complete::take;
use nom::error::{make_error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::PAYLOAD_MARKER;
use crate::Error;

/// Longest option value we accept (Proxy-Uri).
pub const MAX_OPTION_LEN: usize = 1034;

/// Option number as registered with IANA.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptionNumber(pub u16);

impl OptionNumber {
    pub const IF_MATCH: OptionNumber = OptionNumber(1);
    pub const URI_HOST: OptionNumber = OptionNumber(3);
    pub const ETAG: OptionNumber = OptionNumber(4);
    pub const IF_NONE_MATCH: OptionNumber = OptionNumber(5);
    pub const URI_PORT: OptionNumber = OptionNumber(7);
    pub const LOCATION_PATH: OptionNumber = OptionNumber(8);
    pub const URI_PATH: OptionNumber = OptionNumber(11);
    pub const CONTENT_FORMAT: OptionNumber = OptionNumber(12);
    pub const MAX_AGE: OptionNumber = OptionNumber(14);
    pub const URI_QUERY: OptionNumber = OptionNumber(15);
    pub const ACCEPT: OptionNumber = OptionNumber(17);
    pub const LOCATION_QUERY: OptionNumber = OptionNumber(20);
    pub const PROXY_URI: OptionNumber = OptionNumber(35);
    pub const PROXY_SCHEME: OptionNumber = OptionNumber(39);
    pub const SIZE1: OptionNumber = OptionNumber(60);

    /// Options that may occur more than once in a message.
    pub fn is_repeatable(&self) -> bool {
        matches!(
            *self,
            OptionNumber::IF_MATCH
                | OptionNumber::ETAG
                | OptionNumber::LOCATION_PATH
                | OptionNumber::URI_PATH
                | OptionNumber::URI_QUERY
                | OptionNumber::LOCATION_QUERY
        )
    }

    /// Odd option numbers must be understood by the receiver.
    pub fn is_critical(&self) -> bool {
        self.0 & 1 == 1
    }

    fn name(&self) -> Option<&'static str> {
        let name = match *self {
            OptionNumber::IF_MATCH => "If-Match",
            OptionNumber::URI_HOST => "Uri-Host",
            OptionNumber::ETAG => "ETag",
            OptionNumber::IF_NONE_MATCH => "If-None-Match",
            OptionNumber::URI_PORT => "Uri-Port",
            OptionNumber::LOCATION_PATH => "Location-Path",
            OptionNumber::URI_PATH => "Uri-Path",
            OptionNumber::CONTENT_FORMAT => "Content-Format",
            OptionNumber::MAX_AGE => "Max-Age",
            OptionNumber::URI_QUERY => "Uri-Query",
            OptionNumber::ACCEPT => "Accept",
            OptionNumber::LOCATION_QUERY => "Location-Query",
            OptionNumber::PROXY_URI => "Proxy-Uri",
            OptionNumber::PROXY_SCHEME => "Proxy-Scheme",
            OptionNumber::SIZE1 => "Size1",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for OptionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

impl fmt::Debug for OptionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OptionNumber({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: OptionNumber,
    pub value: Vec<u8>,
}

impl CoapOption {
    pub fn new(number: OptionNumber, value: impl Into<Vec<u8>>) -> Self {
        CoapOption {
            number,
            value: value.into(),
        }
    }

    /// Unsigned integer option, encoded in as few bytes as possible.
    pub fn uint(number: OptionNumber, value: u32) -> Self {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        CoapOption::new(number, &bytes[skip..])
    }

    pub fn as_uint(&self) -> Option<u32> {
        if self.value.len() > 4 {
            return None;
        }
        Some(self.value.iter().fold(0, |acc, b| (acc << 8) | *b as u32))
    }
}

/// Options of one message, kept in wire order.
///
/// The wire encoding stores each number as a delta to the previous one, so
/// insertion must be in ascending order. Only repeatable options may repeat
/// the previous number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionList(Vec<CoapOption>);

impl OptionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, option: CoapOption) -> Result<(), Error> {
        if option.value.len() > MAX_OPTION_LEN {
            return Err(Error::MessageBuild(format!(
                "Option {} value too long: {}",
                option.number,
                option.value.len()
            )));
        }

        if let Some(last) = self.0.last() {
            let in_order = option.number > last.number
                || (option.number == last.number && option.number.is_repeatable());
            if !in_order {
                return Err(Error::OptionOrder {
                    number: option.number,
                    previous: last.number,
                });
            }
        }

        self.0.push(option);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoapOption> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First option with the given number.
    pub fn get(&self, number: OptionNumber) -> Option<&CoapOption> {
        self.0.iter().find(|o| o.number == number)
    }

    pub fn get_all(&self, number: OptionNumber) -> impl Iterator<Item = &CoapOption> {
        self.0.iter().filter(move |o| o.number == number)
    }

    /// Parse options up to the payload marker or end of input.
    ///
    /// The payload marker is left in the returned input.
    pub fn parse(mut input: &[u8]) -> IResult<&[u8], OptionList> {
        let mut list = OptionList::new();
        let mut number: u32 = 0;

        loop {
            match input.first() {
                None | Some(&PAYLOAD_MARKER) => return Ok((input, list)),
                Some(_) => {}
            }

            let (rest, header) = be_u8(input)?;
            let (rest, delta) = extended(rest, header >> 4)?;
            let (rest, length) = extended(rest, header & 0x0f)?;
            let (rest, value) = take(length as usize)(rest)?;

            number += delta;
            if number > u16::MAX as u32 {
                return Err(Err::Failure(make_error(input, ErrorKind::TooLarge)));
            }

            // Sorted by construction, no need to check order.
            list.0.push(CoapOption::new(OptionNumber(number as u16), value));
            input = rest;
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let mut previous = 0;

        for option in &self.0 {
            let delta = (option.number.0 - previous) as u32;
            let (delta_nibble, delta_ext) = nibble(delta);
            let (len_nibble, len_ext) = nibble(option.value.len() as u32);

            output.push((delta_nibble << 4) | len_nibble);
            delta_ext.serialize(output);
            len_ext.serialize(output);
            output.extend_from_slice(&option.value);

            previous = option.number.0;
        }
    }
}

impl<'a> IntoIterator for &'a OptionList {
    type Item = &'a CoapOption;
    type IntoIter = std::slice::Iter<'a, CoapOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn extended(input: &[u8], nibble: u8) -> IResult<&[u8], u32> {
    match nibble {
        0..=12 => Ok((input, nibble as u32)),
        13 => {
            let (input, b) = be_u8(input)?;
            Ok((input, b as u32 + 13))
        }
        14 => {
            let (input, b) = be_u16(input)?;
            Ok((input, b as u32 + 269))
        }
        // 15 is reserved for the payload marker.
        _ => Err(Err::Failure(make_error(input, ErrorKind::Verify))),
    }
}

enum Extended {
    None,
    One(u8),
    Two(u16),
}

impl Extended {
    fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            Extended::None => {}
            Extended::One(v) => output.push(*v),
            Extended::Two(v) => output.extend_from_slice(&v.to_be_bytes()),
        }
    }
}

fn nibble(value: u32) -> (u8, Extended) {
    match value {
        0..=12 => (value as u8, Extended::None),
        13..=268 => (13, Extended::One((value - 13) as u8)),
        _ => (14, Extended::Two((value - 269) as u16)),
    }
}
