// Query/response pairing over an LRU-bounded session cache.
//
// Pairing is temporal: the pipeline runs single-worker whenever this
// handler is enabled, so the cache only needs a lock to satisfy the
// shared dispatch signature.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::debug;

use dnspipe_common::event::DnsEvent;

/// The transaction tuple. Response lookup inverts the endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub transaction_id: u16,
    pub domain: String,
    pub query_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionValue {
    pub query_time: DateTime<Utc>,
    pub query_byte_length: u32,
}

pub struct SessionHandler {
    cache: Mutex<LruCache<SessionKey, SessionValue>>,
}

impl SessionHandler {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self { cache: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn handle(&self, mut event: DnsEvent) -> DnsEvent {
        let mut cache = self.cache.lock().expect("session cache lock poisoned");

        if !event.response {
            let key = query_key(&event);
            let value = SessionValue {
                query_time: event.event_time,
                query_byte_length: event.byte_length,
            };
            if let Some((evicted, _)) = cache.push(key.clone(), value) {
                if evicted != key {
                    debug!(len = cache.len(), "session cache full, evicted oldest entry");
                }
            }
            return event;
        }

        let key = response_key(&event);
        let Some(value) = cache.peek(&key).cloned() else {
            debug!(domain = %event.domain, "session fetch failed, no matching query");
            return event;
        };

        event.delay_microsecond = (event.event_time - value.query_time)
            .num_microseconds()
            .unwrap_or(0);
        event.query_byte_length = value.query_byte_length;
        cache.pop(&key);
        event
    }
}

fn query_key(event: &DnsEvent) -> SessionKey {
    SessionKey {
        src_ip: event.source_ip,
        dst_ip: event.destination_ip,
        src_port: event.source_port,
        dst_port: event.destination_port,
        transaction_id: event.transaction_id,
        domain: event.domain.clone(),
        query_type: event.query_type.clone(),
    }
}

/// The stored key as seen from the response side: endpoints swapped.
fn response_key(event: &DnsEvent) -> SessionKey {
    SessionKey {
        src_ip: event.destination_ip,
        dst_ip: event.source_ip,
        src_port: event.destination_port,
        dst_port: event.source_port,
        transaction_id: event.transaction_id,
        domain: event.domain.clone(),
        query_type: event.query_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn query(tx: u16, domain: &str, micros: i64) -> DnsEvent {
        DnsEvent {
            event_time: Utc.timestamp_micros(micros).unwrap(),
            source_ip: "192.0.2.1".parse().unwrap(),
            destination_ip: "192.0.2.53".parse().unwrap(),
            source_port: 1111,
            destination_port: 53,
            transaction_id: tx,
            domain: domain.into(),
            query_type: "A".into(),
            byte_length: 40,
            response: false,
            ..Default::default()
        }
    }

    fn response_for(q: &DnsEvent, micros: i64) -> DnsEvent {
        DnsEvent {
            event_time: Utc.timestamp_micros(micros).unwrap(),
            source_ip: q.destination_ip,
            destination_ip: q.source_ip,
            source_port: q.destination_port,
            destination_port: q.source_port,
            transaction_id: q.transaction_id,
            domain: q.domain.clone(),
            query_type: q.query_type.clone(),
            byte_length: 120,
            response: true,
            ..Default::default()
        }
    }

    #[test]
    fn pairs_query_with_response() {
        let handler = SessionHandler::new(16);
        let q = query(7, "x.test.", 1_000_000);
        let q = handler.handle(q);
        let r = handler.handle(response_for(&q, 1_002_500));

        assert_eq!(r.delay_microsecond, 2500);
        assert_eq!(r.query_byte_length, 40);
    }

    #[test]
    fn pairing_removes_the_entry() {
        let handler = SessionHandler::new(16);
        let q = query(7, "x.test.", 1_000_000);
        let q = handler.handle(q);
        let first = handler.handle(response_for(&q, 1_001_000));
        assert_eq!(first.delay_microsecond, 1000);

        // A duplicate response no longer finds the query.
        let second = handler.handle(response_for(&q, 1_005_000));
        assert_eq!(second.delay_microsecond, 0);
    }

    #[test]
    fn response_without_query_keeps_zero_delay() {
        let handler = SessionHandler::new(16);
        let q = query(9, "y.test.", 1_000_000);
        let r = handler.handle(response_for(&q, 1_001_000));
        assert_eq!(r.delay_microsecond, 0);
        assert_eq!(r.query_byte_length, 0);
    }

    #[test]
    fn mismatched_tuple_does_not_pair() {
        let handler = SessionHandler::new(16);
        let q = handler.handle(query(7, "x.test.", 1_000_000));
        let mut r = response_for(&q, 1_001_000);
        r.domain = "other.test.".into();
        let r = handler.handle(r);
        assert_eq!(r.delay_microsecond, 0);
    }

    #[test]
    fn eviction_drops_oldest_queries() {
        let capacity = 4;
        let total = 10;
        let handler = SessionHandler::new(capacity);

        let queries: Vec<DnsEvent> = (0..total)
            .map(|i| handler.handle(query(i as u16, &format!("q{i}.test."), 1_000_000 + i)))
            .collect();

        // The first N - K queries were evicted and no longer pair.
        for (i, q) in queries.iter().enumerate() {
            let r = handler.handle(response_for(q, 2_000_000 + i as i64));
            if i < total - capacity {
                assert_eq!(r.delay_microsecond, 0, "query {i} should have been evicted");
            } else {
                assert!(r.delay_microsecond > 0, "query {i} should still pair");
            }
        }
    }
}
