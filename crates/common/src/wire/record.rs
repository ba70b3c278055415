// Question and resource-record decoding, including the OPT
// pseudo-record and its client-subnet option.

use std::io::{Cursor, Read};
use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ReadBytesExt};

use crate::event::ResourceRecord;

use super::name::read_name;
use super::tables::{self, rclass_str, rtype_str};
use super::WireError;

const EDNS_OPTION_CLIENT_SUBNET: u16 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl Question {
    pub fn qtype_str(&self) -> String {
        rtype_str(self.qtype)
    }

    pub fn qclass_str(&self) -> String {
        rclass_str(self.qclass)
    }
}

pub fn read_question(c: &mut Cursor<&[u8]>) -> Result<Question, WireError> {
    let name = read_name(c)?;
    let qtype = c.read_u16::<BigEndian>()?;
    let qclass = c.read_u16::<BigEndian>()?;
    Ok(Question { name, qtype, qclass })
}

/// One parsed section entry. OPT pseudo-records are carried separately
/// so they never land in the additional list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionEntry {
    Record(ResourceRecord),
    Opt(OptPseudo),
}

/// The EDNS(0) OPT pseudo-record (RFC 6891).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptPseudo {
    pub udp_payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub dnssec_ok: bool,
    /// Client-subnet option rendered as `address/prefix`, when present.
    pub client_subnet: Option<String>,
}

impl OptPseudo {
    /// Single-line presentation used for the event's `edns` field.
    pub fn render(&self) -> String {
        let flags = if self.dnssec_ok { " flags: do;" } else { " flags:;" };
        let mut s = format!(
            "; EDNS: version {};{} udp: {}",
            self.version, flags, self.udp_payload_size
        );
        if let Some(subnet) = &self.client_subnet {
            s.push_str("; SUBNET: ");
            s.push_str(subnet);
        }
        s
    }
}

pub fn read_entry(c: &mut Cursor<&[u8]>) -> Result<SectionEntry, WireError> {
    let name = read_name(c)?;
    let rtype = c.read_u16::<BigEndian>()?;

    if rtype == tables::TYPE_OPT {
        return Ok(SectionEntry::Opt(read_opt(c)?));
    }

    let rclass = c.read_u16::<BigEndian>()?;
    let ttl = c.read_u32::<BigEndian>()?;
    let rdlength = c.read_u16::<BigEndian>()?;
    let rdata_end = c
        .position()
        .checked_add(u64::from(rdlength))
        .ok_or(WireError::Truncated)?;
    if rdata_end > c.get_ref().len() as u64 {
        return Err(WireError::Truncated);
    }

    let rdata = read_rdata(c, rtype, rdlength)?;
    // rdata renderers stop at their own natural end; the declared
    // length is authoritative for where the next record starts.
    c.set_position(rdata_end);

    Ok(SectionEntry::Record(ResourceRecord {
        domain: name,
        ttl,
        rclass: rclass_str(rclass),
        rtype: rtype_str(rtype),
        rdata,
    }))
}

fn read_rdata(c: &mut Cursor<&[u8]>, rtype: u16, rdlength: u16) -> Result<String, WireError> {
    match rtype {
        tables::TYPE_A => {
            if rdlength != 4 {
                return Err(WireError::BadRdataLength { rtype, rdlength });
            }
            let mut octets = [0u8; 4];
            c.read_exact(&mut octets)?;
            Ok(Ipv4Addr::from(octets).to_string())
        }
        tables::TYPE_AAAA => {
            if rdlength != 16 {
                return Err(WireError::BadRdataLength { rtype, rdlength });
            }
            let mut octets = [0u8; 16];
            c.read_exact(&mut octets)?;
            Ok(Ipv6Addr::from(octets).to_string())
        }
        tables::TYPE_NS | tables::TYPE_CNAME | tables::TYPE_PTR | 39 => read_name(c),
        tables::TYPE_SOA => {
            let mname = read_name(c)?;
            let rname = read_name(c)?;
            let serial = c.read_u32::<BigEndian>()?;
            let refresh = c.read_u32::<BigEndian>()?;
            let retry = c.read_u32::<BigEndian>()?;
            let expire = c.read_u32::<BigEndian>()?;
            let minimum = c.read_u32::<BigEndian>()?;
            Ok(format!("{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"))
        }
        tables::TYPE_MX => {
            let preference = c.read_u16::<BigEndian>()?;
            let exchange = read_name(c)?;
            Ok(format!("{preference} {exchange}"))
        }
        tables::TYPE_SRV => {
            let priority = c.read_u16::<BigEndian>()?;
            let weight = c.read_u16::<BigEndian>()?;
            let port = c.read_u16::<BigEndian>()?;
            let target = read_name(c)?;
            Ok(format!("{priority} {weight} {port} {target}"))
        }
        tables::TYPE_TXT => {
            let end = c.position() + u64::from(rdlength);
            let mut strings = Vec::new();
            while c.position() < end {
                let len = c.read_u8()?;
                let mut raw = vec![0u8; usize::from(len)];
                c.read_exact(&mut raw)?;
                strings.push(format!("\"{}\"", String::from_utf8_lossy(&raw)));
            }
            Ok(strings.join(" "))
        }
        _ => {
            let mut raw = vec![0u8; usize::from(rdlength)];
            c.read_exact(&mut raw)?;
            let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
            Ok(format!("\\# {} {hex}", raw.len()))
        }
    }
}

/// Parse the OPT pseudo-record body. The cursor sits after the record
/// type; the OPT reuses the class field as the UDP payload size and
/// the TTL as extended flags (RFC 6891 §6.1.3).
fn read_opt(c: &mut Cursor<&[u8]>) -> Result<OptPseudo, WireError> {
    let udp_payload_size = c.read_u16::<BigEndian>()?;
    let extended_rcode = c.read_u8()?;
    let version = c.read_u8()?;
    let flags = c.read_u16::<BigEndian>()?;
    let dnssec_ok = flags & 0x8000 != 0;
    let rdlength = c.read_u16::<BigEndian>()?;
    let end = c.position() + u64::from(rdlength);
    if end > c.get_ref().len() as u64 {
        return Err(WireError::Truncated);
    }

    let mut client_subnet = None;
    while c.position() + 4 <= end {
        let code = c.read_u16::<BigEndian>()?;
        let optlen = c.read_u16::<BigEndian>()?;
        let opt_end = c.position() + u64::from(optlen);
        if opt_end > end {
            return Err(WireError::Truncated);
        }
        if code == EDNS_OPTION_CLIENT_SUBNET {
            client_subnet = Some(read_client_subnet(c, optlen)?);
        }
        c.set_position(opt_end);
    }
    c.set_position(end);

    Ok(OptPseudo { udp_payload_size, extended_rcode, version, dnssec_ok, client_subnet })
}

fn read_client_subnet(c: &mut Cursor<&[u8]>, optlen: u16) -> Result<String, WireError> {
    if optlen < 4 {
        return Err(WireError::Truncated);
    }
    let family = c.read_u16::<BigEndian>()?;
    let source_prefix = c.read_u8()?;
    let _scope_prefix = c.read_u8()?;
    let addr_len = usize::from(optlen) - 4;

    match family {
        1 => {
            if addr_len > 4 {
                return Err(WireError::BadClientSubnet);
            }
            let mut octets = [0u8; 4];
            c.read_exact(&mut octets[..addr_len])?;
            Ok(format!("{}/{}", Ipv4Addr::from(octets), source_prefix))
        }
        2 => {
            if addr_len > 16 {
                return Err(WireError::BadClientSubnet);
            }
            let mut octets = [0u8; 16];
            c.read_exact(&mut octets[..addr_len])?;
            Ok(format!("{}/{}", Ipv6Addr::from(octets), source_prefix))
        }
        _ => Err(WireError::BadClientSubnet),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_a_record_entry() {
        // name "a." + A IN ttl 300 + 1.2.3.4
        let buf = b"\x01a\x00\x00\x01\x00\x01\x00\x00\x01\x2c\x00\x04\x01\x02\x03\x04";
        let mut c = Cursor::new(&buf[..]);
        match read_entry(&mut c).unwrap() {
            SectionEntry::Record(rr) => {
                assert_eq!(rr.domain, "a.");
                assert_eq!(rr.ttl, 300);
                assert_eq!(rr.rclass, "IN");
                assert_eq!(rr.rtype, "A");
                assert_eq!(rr.rdata, "1.2.3.4");
            }
            other => panic!("expected record, got {other:?}"),
        }
        assert_eq!(c.position(), buf.len() as u64);
    }

    #[test]
    fn reads_txt_strings_quoted() {
        let buf = b"\x01t\x00\x00\x10\x00\x01\x00\x00\x00\x3c\x00\x08\x03foo\x03bar";
        let mut c = Cursor::new(&buf[..]);
        match read_entry(&mut c).unwrap() {
            SectionEntry::Record(rr) => assert_eq!(rr.rdata, "\"foo\" \"bar\""),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_falls_back_to_hex() {
        let buf = b"\x01u\x00\x10\x00\x00\x01\x00\x00\x00\x00\x00\x02\xAB\xCD";
        let mut c = Cursor::new(&buf[..]);
        match read_entry(&mut c).unwrap() {
            SectionEntry::Record(rr) => {
                assert_eq!(rr.rtype, "TYPE4096");
                assert_eq!(rr.rdata, "\\# 2 abcd");
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn opt_with_client_subnet_parses_to_cidr() {
        // root name, OPT, udp 4096, no ext flags, one ECS option:
        // family 1, source /24, scope 0, addr 1.2.3
        let buf = b"\x00\x00\x29\x10\x00\x00\x00\x00\x00\x00\x0b\x00\x08\x00\x07\x00\x01\x18\x00\x01\x02\x03";
        let mut c = Cursor::new(&buf[..]);
        match read_entry(&mut c).unwrap() {
            SectionEntry::Opt(opt) => {
                assert_eq!(opt.udp_payload_size, 4096);
                assert_eq!(opt.version, 0);
                assert!(!opt.dnssec_ok);
                assert_eq!(opt.client_subnet.as_deref(), Some("1.2.3.0/24"));
                assert_eq!(opt.render(), "; EDNS: version 0; flags:; udp: 4096; SUBNET: 1.2.3.0/24");
            }
            other => panic!("expected opt, got {other:?}"),
        }
        assert_eq!(c.position(), buf.len() as u64);
    }

    #[test]
    fn opt_without_options_renders_bare() {
        let buf = b"\x00\x00\x29\x04\xd0\x00\x00\x80\x00\x00\x00";
        let mut c = Cursor::new(&buf[..]);
        match read_entry(&mut c).unwrap() {
            SectionEntry::Opt(opt) => {
                assert!(opt.dnssec_ok);
                assert_eq!(opt.client_subnet, None);
                assert_eq!(opt.render(), "; EDNS: version 0; flags: do; udp: 1232");
            }
            other => panic!("expected opt, got {other:?}"),
        }
    }

    #[test]
    fn truncated_rdata_is_rejected() {
        let buf = b"\x01a\x00\x00\x01\x00\x01\x00\x00\x01\x2c\x00\x04\x01\x02";
        let mut c = Cursor::new(&buf[..]);
        assert!(matches!(read_entry(&mut c), Err(WireError::Truncated)));
    }
}
