// Hand-rolled DNS message decoder (RFC 1035 layout, compression
// supported). Only what the analyzer needs: header bits, the four
// sections as display strings, and the EDNS pseudo-record.

pub mod name;
pub mod record;
pub mod tables;

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

use crate::event::ResourceRecord;

pub use record::{OptPseudo, Question, SectionEntry};
pub use tables::{rclass_str, rcode_str, rtype_str};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,
    #[error("compression pointer loop")]
    PointerLoop,
    #[error("compression pointer out of range ({0})")]
    BadPointer(u64),
    #[error("unsupported label type byte {0:#x}")]
    BadLabelType(u8),
    #[error("name exceeds 255 bytes")]
    NameTooLong,
    #[error("bad rdata length {rdlength} for type {rtype}")]
    BadRdataLength { rtype: u16, rdlength: u16 },
    #[error("malformed client-subnet option")]
    BadClientSubnet,
}

impl From<std::io::Error> for WireError {
    fn from(_: std::io::Error) -> Self {
        // Cursor reads only fail by running off the end of the buffer.
        WireError::Truncated
    }
}

/// Decoded header flags (RFC 1035 §4.1.1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub response: bool,
    pub opcode: u8,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub zero: bool,
    pub authenticated_data: bool,
    pub checking_disabled: bool,
    pub rcode: u8,
}

/// A fully decoded DNS message. Resource records are kept as display
/// strings; the OPT pseudo-record is pulled out of the additional
/// section.
#[derive(Debug, Clone, Default)]
pub struct DnsMessage {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
    pub opt: Option<OptPseudo>,
    pub wire_len: usize,
}

impl DnsMessage {
    pub fn parse(payload: &[u8]) -> Result<Self, WireError> {
        let mut c = Cursor::new(payload);

        let id = c.read_u16::<BigEndian>()?;
        let flags = c.read_u16::<BigEndian>()?;
        let qdcount = c.read_u16::<BigEndian>()?;
        let ancount = c.read_u16::<BigEndian>()?;
        let nscount = c.read_u16::<BigEndian>()?;
        let arcount = c.read_u16::<BigEndian>()?;

        let header = Header {
            id,
            response: flags & 0x8000 != 0,
            opcode: ((flags >> 11) & 0x0F) as u8,
            authoritative: flags & 0x0400 != 0,
            truncated: flags & 0x0200 != 0,
            recursion_desired: flags & 0x0100 != 0,
            recursion_available: flags & 0x0080 != 0,
            zero: flags & 0x0040 != 0,
            authenticated_data: flags & 0x0020 != 0,
            checking_disabled: flags & 0x0010 != 0,
            rcode: (flags & 0x000F) as u8,
        };

        let mut msg = DnsMessage { header, wire_len: payload.len(), ..Default::default() };

        for _ in 0..qdcount {
            msg.questions.push(record::read_question(&mut c)?);
        }
        for _ in 0..ancount {
            match record::read_entry(&mut c)? {
                SectionEntry::Record(rr) => msg.answers.push(rr),
                SectionEntry::Opt(opt) => msg.opt = Some(opt),
            }
        }
        for _ in 0..nscount {
            match record::read_entry(&mut c)? {
                SectionEntry::Record(rr) => msg.authorities.push(rr),
                SectionEntry::Opt(opt) => msg.opt = Some(opt),
            }
        }
        for _ in 0..arcount {
            match record::read_entry(&mut c)? {
                SectionEntry::Record(rr) => msg.additionals.push(rr),
                SectionEntry::Opt(opt) => msg.opt = Some(opt),
            }
        }

        Ok(msg)
    }
}
