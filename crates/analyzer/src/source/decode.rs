// Captured packet → DnsEvent.
//
// Requires exactly one IPv4/IPv6 layer and one UDP layer; fragments
// and TCP never produce events. The UDP payload must parse as a
// well-formed DNS message.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use thiserror::Error;

use dnspipe_common::event::DnsEvent;
use dnspipe_common::wire::{DnsMessage, WireError};

/// Link layer of the capture handle, resolved once per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    LinuxSll,
    RawIp,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("packet slicing failed: {0}")]
    Slice(String),
    #[error("packet missing ip layer")]
    MissingIp,
    #[error("packet missing udp layer")]
    MissingUdp,
    #[error("fragmented ip payload")]
    Fragmented,
    #[error("dns message parse failed: {0}")]
    Dns(#[from] WireError),
}

/// Decode one captured frame into a DNS event.
pub fn decode_packet(
    link: LinkLayer,
    timestamp: DateTime<Utc>,
    data: &[u8],
) -> Result<DnsEvent, DecodeError> {
    let sliced = match link {
        LinkLayer::Ethernet => SlicedPacket::from_ethernet(data),
        LinkLayer::LinuxSll => SlicedPacket::from_linux_sll(data),
        LinkLayer::RawIp => SlicedPacket::from_ip(data),
    }
    .map_err(|e| DecodeError::Slice(e.to_string()))?;

    let (source_ip, destination_ip): (IpAddr, IpAddr) = match &sliced.net {
        Some(NetSlice::Ipv4(v4)) => {
            if v4.is_payload_fragmented() {
                return Err(DecodeError::Fragmented);
            }
            (
                IpAddr::V4(v4.header().source_addr()),
                IpAddr::V4(v4.header().destination_addr()),
            )
        }
        Some(NetSlice::Ipv6(v6)) => {
            if v6.is_payload_fragmented() {
                return Err(DecodeError::Fragmented);
            }
            (
                IpAddr::V6(v6.header().source_addr()),
                IpAddr::V6(v6.header().destination_addr()),
            )
        }
        _ => return Err(DecodeError::MissingIp),
    };

    let udp = match &sliced.transport {
        Some(TransportSlice::Udp(udp)) => udp,
        _ => return Err(DecodeError::MissingUdp),
    };

    let msg = DnsMessage::parse(udp.payload())?;

    let mut event = DnsEvent {
        event_time: timestamp,
        source_ip,
        destination_ip,
        source_port: udp.source_port(),
        destination_port: udp.destination_port(),
        ..Default::default()
    };
    fill_from_message(&mut event, &msg);
    Ok(event)
}

/// Populate the event's DNS fields from a decoded message. Split out
/// so tests can exercise it without building link-layer frames.
pub fn fill_from_message(event: &mut DnsEvent, msg: &DnsMessage) {
    event.transaction_id = msg.header.id;
    event.response = msg.header.response;
    event.authoritative = msg.header.authoritative;
    event.truncated = msg.header.truncated;
    event.recursion_desired = msg.header.recursion_desired;
    event.recursion_available = msg.header.recursion_available;
    event.zero = msg.header.zero;
    event.authenticated_data = msg.header.authenticated_data;
    event.checking_disabled = msg.header.checking_disabled;
    event.rcode = dnspipe_common::wire::rcode_str(msg.header.rcode);

    if let Some(q) = msg.questions.first() {
        event.domain = q.name.clone();
        event.query_class = q.qclass_str();
        event.query_type = q.qtype_str();
    }

    event.answer = msg.answers.clone();
    event.authority = msg.authorities.clone();
    event.additional = msg.additionals.clone();

    // First A or AAAA answer in arrival order.
    if let Some(rr) = msg
        .answers
        .iter()
        .find(|rr| rr.rtype == "A" || rr.rtype == "AAAA")
    {
        event.answer_ip = rr.rdata.clone();
    }

    if let Some(opt) = &msg.opt {
        event.edns = opt.render();
        if let Some(subnet) = &opt.client_subnet {
            event.edns_client_subnet = subnet.clone();
        }
    }

    event.byte_length = msg.wire_len as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    fn dns_query_payload() -> Vec<u8> {
        let mut b: Vec<u8> = Vec::new();
        b.extend_from_slice(&7u16.to_be_bytes());
        b.extend_from_slice(&0x0100u16.to_be_bytes());
        b.extend_from_slice(&1u16.to_be_bytes());
        b.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        b.extend_from_slice(b"\x01x\x04test\x00");
        b.extend_from_slice(&1u16.to_be_bytes());
        b.extend_from_slice(&1u16.to_be_bytes());
        b
    }

    fn udp_frame(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4([10, 0, 0, 1], [8, 8, 8, 8], 64)
            .udp(5353, 53);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    #[test]
    fn decodes_udp_dns_query() {
        let frame = udp_frame(&dns_query_payload());
        let ts = Utc::now();
        let event = decode_packet(LinkLayer::Ethernet, ts, &frame).unwrap();

        assert_eq!(event.event_time, ts);
        assert_eq!(event.source_ip.to_string(), "10.0.0.1");
        assert_eq!(event.destination_ip.to_string(), "8.8.8.8");
        assert_eq!(event.source_port, 5353);
        assert_eq!(event.destination_port, 53);
        assert_eq!(event.transaction_id, 7);
        assert_eq!(event.domain, "x.test.");
        assert_eq!(event.query_type, "A");
        assert_eq!(event.query_class, "IN");
        assert!(!event.response);
        assert_eq!(event.byte_length as usize, dns_query_payload().len());
    }

    #[test]
    fn rejects_tcp_packets() {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv4([10, 0, 0, 1], [8, 8, 8, 8], 64)
            .tcp(4444, 53, 1, 1024);
        let payload = dns_query_payload();
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();

        assert!(matches!(
            decode_packet(LinkLayer::Ethernet, Utc::now(), &frame),
            Err(DecodeError::MissingUdp)
        ));
    }

    #[test]
    fn rejects_garbage_dns_payload() {
        let frame = udp_frame(&[0xFF; 5]);
        assert!(matches!(
            decode_packet(LinkLayer::Ethernet, Utc::now(), &frame),
            Err(DecodeError::Dns(_))
        ));
    }

    #[test]
    fn no_question_leaves_fields_empty() {
        let mut event = DnsEvent::default();
        let msg = DnsMessage::parse(&[0, 1, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        fill_from_message(&mut event, &msg);
        assert_eq!(event.domain, "");
        assert_eq!(event.query_class, "");
        assert_eq!(event.query_type, "");
    }

    #[test]
    fn first_address_answer_wins() {
        use dnspipe_common::event::ResourceRecord;
        let mut msg = DnsMessage::parse(&[0, 1, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        msg.answers = vec![
            ResourceRecord {
                domain: "x.test.".into(),
                ttl: 60,
                rclass: "IN".into(),
                rtype: "CNAME".into(),
                rdata: "y.test.".into(),
            },
            ResourceRecord {
                domain: "y.test.".into(),
                ttl: 60,
                rclass: "IN".into(),
                rtype: "A".into(),
                rdata: "1.1.1.1".into(),
            },
            ResourceRecord {
                domain: "y.test.".into(),
                ttl: 60,
                rclass: "IN".into(),
                rtype: "A".into(),
                rdata: "2.2.2.2".into(),
            },
        ];
        let mut event = DnsEvent::default();
        fill_from_message(&mut event, &msg);
        assert_eq!(event.answer_ip, "1.1.1.1");
    }
}
