// Core event types shared across the dnspipe workspace.

use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded DNS message, enriched with derived fields as it moves
/// through the pipeline. Created by the decoder, transformed by the
/// middleware handlers, consumed by the result sinks.
///
/// JSON keys are PascalCase for output parity with the historical
/// log format (including the `TranscationID` spelling).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct DnsEvent {
    pub event_time: DateTime<Utc>,
    #[serde(rename = "SourceIP")]
    pub source_ip: IpAddr,
    pub source_port: u16,
    #[serde(rename = "DestinationIP")]
    pub destination_ip: IpAddr,
    pub destination_port: u16,
    #[serde(rename = "TranscationID")]
    pub transaction_id: u16,
    pub view: String,
    pub domain: String,
    pub query_class: String,
    pub query_type: String,
    pub rcode: String,
    pub response: bool,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub zero: bool,
    pub authenticated_data: bool,
    pub checking_disabled: bool,
    pub delay_microsecond: i64,
    pub answer: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
    pub edns: String,
    pub edns_client_subnet: String,
    pub edns_client_subnet_info: IpInfo,

    pub source_ip_info: IpInfo,
    #[serde(rename = "AnswerIP")]
    pub answer_ip: String,
    pub answer_ip_info: IpInfo,

    pub second_level_domain: String,
    pub byte_length: u32,
    pub query_byte_length: u32,
    pub subdomain_byte_length: u32,
    pub label_count: u32,
    pub subdomain_label_count: u32,
    pub subdomain_entropy: f64,
    pub subdomain_label_encoded: bool,

    pub traffic_direction: String,
}

impl Default for DnsEvent {
    fn default() -> Self {
        Self {
            event_time: DateTime::<Utc>::UNIX_EPOCH,
            source_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            source_port: 0,
            destination_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            destination_port: 0,
            transaction_id: 0,
            view: String::new(),
            domain: String::new(),
            query_class: String::new(),
            query_type: String::new(),
            rcode: String::new(),
            response: false,
            authoritative: false,
            truncated: false,
            recursion_desired: false,
            recursion_available: false,
            zero: false,
            authenticated_data: false,
            checking_disabled: false,
            delay_microsecond: 0,
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            edns: String::new(),
            edns_client_subnet: String::new(),
            edns_client_subnet_info: IpInfo::default(),
            source_ip_info: IpInfo::default(),
            answer_ip: String::new(),
            answer_ip_info: IpInfo::default(),
            second_level_domain: String::new(),
            byte_length: 0,
            query_byte_length: 0,
            subdomain_byte_length: 0,
            label_count: 0,
            subdomain_label_count: 0,
            subdomain_entropy: 0.0,
            subdomain_label_encoded: false,
            traffic_direction: String::new(),
        }
    }
}

/// A resource record kept as display strings to preserve fidelity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResourceRecord {
    pub domain: String,
    #[serde(rename = "TTL")]
    pub ttl: u32,
    pub rclass: String,
    pub rtype: String,
    pub rdata: String,
}

/// Subnet attributes attached to an address. Empty string means
/// unknown; there is no separate null.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct IpInfo {
    #[serde(rename = "IP")]
    pub ip: String,
    pub country: String,
    pub province: String,
    pub city: String,
    pub county: String,
    pub isp: String,
    #[serde(rename = "DC")]
    pub dc: String,
    pub app: String,
    pub custom: String,
}

impl DnsEvent {
    /// Compact single-line JSON rendering.
    pub fn json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The fixed CSV row for this event. Column order is part of the
    /// output contract and must not change.
    pub fn csv_record(&self) -> Vec<String> {
        vec![
            self.event_time.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            self.source_ip.to_string(),
            self.source_port.to_string(),
            self.destination_ip.to_string(),
            self.destination_port.to_string(),
            self.transaction_id.to_string(),
            self.view.clone(),
            self.domain.clone(),
            self.query_class.clone(),
            self.query_type.clone(),
            self.rcode.clone(),
            self.response.to_string(),
            self.authoritative.to_string(),
            self.truncated.to_string(),
            self.recursion_desired.to_string(),
            self.recursion_available.to_string(),
            self.zero.to_string(),
            self.authenticated_data.to_string(),
            self.checking_disabled.to_string(),
            self.delay_microsecond.to_string(),
            render_records(&self.answer),
            render_records(&self.authority),
            render_records(&self.additional),
            self.edns.clone(),
            self.edns_client_subnet.clone(),
            render_ip_info(&self.edns_client_subnet_info),
            render_ip_info(&self.source_ip_info),
            self.answer_ip.clone(),
            render_ip_info(&self.answer_ip_info),
            self.second_level_domain.clone(),
            self.byte_length.to_string(),
            self.query_byte_length.to_string(),
            self.subdomain_byte_length.to_string(),
            self.label_count.to_string(),
            self.subdomain_label_count.to_string(),
            format!("{:.2}", self.subdomain_entropy),
            self.subdomain_label_encoded.to_string(),
            self.traffic_direction.clone(),
        ]
    }
}

/// Bracketed list of brace-rendered records with single-quoted keys.
/// Not RFC 4180; the format matches the historical CSV output and is
/// not meant to be machine-parsed back.
pub fn render_records(rrs: &[ResourceRecord]) -> String {
    if rrs.is_empty() {
        return "[]".to_string();
    }
    let items: Vec<String> = rrs
        .iter()
        .map(|r| {
            format!(
                "{{'Domain': {}, 'TTL': {}, 'Rclass': {}, 'Rtype': {}, 'Rdata': {}}}",
                r.domain, r.ttl, r.rclass, r.rtype, r.rdata
            )
        })
        .collect();
    format!("[{}]", items.join(", "))
}

/// Brace-rendered IpInfo with single-quoted keys, same caveats as
/// [`render_records`].
pub fn render_ip_info(info: &IpInfo) -> String {
    format!(
        "{{'IP': {}, 'Country': {}, 'Province': {}, 'City': {}, 'County': {}, 'Isp': {}, 'DC': {}, 'App': {}, 'Custom': {}}}",
        info.ip,
        info.country,
        info.province,
        info.city,
        info.county,
        info.isp,
        info.dc,
        info.app,
        info.custom
    )
}
