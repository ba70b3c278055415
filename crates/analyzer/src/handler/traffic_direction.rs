// Classifies each event relative to a set of "self" resolver
// addresses. Only port 53 traffic gets a direction.

use std::collections::HashSet;
use std::net::IpAddr;

use tracing::warn;

use dnspipe_common::event::DnsEvent;

pub const CLIENT_QUERY: &str = "client_query";
pub const CLIENT_RESPONSE: &str = "client_response";
pub const RECURSION_QUERY: &str = "recursion_query";
pub const RECURSION_RESPONSE: &str = "recursion_response";

const DNS_PORT: u16 = 53;

pub struct TrafficDirectionHandler {
    self_ips: HashSet<IpAddr>,
}

impl TrafficDirectionHandler {
    pub fn new(self_ips: &[String]) -> Self {
        let mut parsed = HashSet::new();
        for raw in self_ips {
            match raw.parse::<IpAddr>() {
                Ok(ip) => {
                    parsed.insert(ip);
                }
                Err(_) => warn!(ip = %raw, "ignoring unparseable self ip"),
            }
        }
        Self { self_ips: parsed }
    }

    pub fn handle(&self, mut event: DnsEvent) -> DnsEvent {
        let from_self = self.self_ips.contains(&event.source_ip);

        let mut direction = "";
        if from_self {
            if event.destination_port == DNS_PORT {
                direction = RECURSION_QUERY;
            }
            if event.source_port == DNS_PORT {
                direction = CLIENT_RESPONSE;
            }
        } else {
            if event.destination_port == DNS_PORT {
                direction = CLIENT_QUERY;
            }
            if event.source_port == DNS_PORT {
                direction = RECURSION_RESPONSE;
            }
        }

        event.traffic_direction = direction.to_string();
        event
    }
}
