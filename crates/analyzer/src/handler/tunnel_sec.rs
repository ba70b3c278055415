// Tunneling indicators: second-level-domain extraction, subdomain
// shape metrics, Shannon entropy, and encoded-label detection.
//
// Label counts follow DNS convention and include the root label, so
// `www.example.com.` counts 4. Names of 3 labels or fewer carry no
// subdomain and are left untouched.

use std::collections::{HashMap, HashSet};

use base64::Engine;

use dnspipe_common::event::DnsEvent;
use dnspipe_common::name::{fqdn, DomainName};

pub struct TunnelSecHandler {
    special_tlds: HashSet<String>,
    entropy_enabled: bool,
    encoding_enabled: bool,
    encoding_min_label_len: usize,
}

impl TunnelSecHandler {
    pub fn new(
        special_tlds: &[String],
        entropy_enabled: bool,
        encoding_enabled: bool,
        encoding_min_label_len: usize,
    ) -> Self {
        Self {
            special_tlds: special_tlds.iter().map(|t| fqdn(t)).collect(),
            entropy_enabled,
            encoding_enabled,
            encoding_min_label_len,
        }
    }

    pub fn handle(&self, mut event: DnsEvent) -> DnsEvent {
        let Ok(name) = DomainName::parse(&event.domain) else {
            return event;
        };

        // `DomainName` stores labels without the root; +1 converts to
        // the root-inclusive count used throughout this handler.
        let real = name.label_count();
        let label_count = real + 1;
        if label_count <= 3 {
            return event;
        }

        // TLD plus one; a known two-level TLD claims one more label
        // when there is still a subdomain left over.
        let mut parent_labels = 2;
        if self.special_tlds.contains(&name.suffix(2).to_fqdn()) && label_count > 4 {
            parent_labels = 3;
        }
        let parent = name.suffix(parent_labels);
        let subdomain = name.prefix(parent_labels);

        event.second_level_domain = parent.to_fqdn();
        event.subdomain_byte_length = subdomain.wire_len() as u32;
        event.label_count = label_count as u32;
        event.subdomain_label_count = subdomain.label_count() as u32;

        if self.entropy_enabled {
            event.subdomain_entropy = shannon_entropy(&subdomain.to_relative());
        }
        if self.encoding_enabled {
            event.subdomain_label_encoded = subdomain
                .labels()
                .iter()
                .any(|label| label.len() >= self.encoding_min_label_len && looks_encoded(label));
        }
        event
    }
}

/// Shannon entropy in bits over the Unicode scalars of `s`.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut freq: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
        total += 1;
    }
    let total = total as f64;
    freq.values().fold(0.0, |acc, &count| {
        let p = count as f64 / total;
        acc - p * p.log2()
    })
}

/// True when the label decodes as hex, standard base32, or standard
/// base64. Labels never carry padding characters, so the base
/// decoders accept unpadded input of a valid length.
fn looks_encoded(label: &str) -> bool {
    if hex::decode(label).is_ok() {
        return true;
    }
    if base32::decode(base32::Alphabet::Rfc4648 { padding: false }, label).is_some() {
        return true;
    }
    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(label)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler_with(tlds: &[&str], min_len: usize) -> TunnelSecHandler {
        let tlds: Vec<String> = tlds.iter().map(|s| s.to_string()).collect();
        TunnelSecHandler::new(&tlds, true, true, min_len)
    }

    fn event_for(domain: &str) -> DnsEvent {
        DnsEvent { domain: domain.into(), ..Default::default() }
    }

    #[test]
    fn bare_registrable_domain_sets_nothing() {
        let handler = handler_with(&[], 8);
        let event = handler.handle(event_for("example.com."));
        assert_eq!(event.second_level_domain, "");
        assert_eq!(event.label_count, 0);
        assert_eq!(event.subdomain_label_count, 0);
    }

    #[test]
    fn single_host_label_becomes_the_subdomain() {
        let handler = handler_with(&[], 8);
        let event = handler.handle(event_for("www.example.com."));
        assert_eq!(event.second_level_domain, "example.com.");
        assert_eq!(event.label_count, 4);
        assert_eq!(event.subdomain_label_count, 1);
        assert_eq!(event.subdomain_byte_length, 4); // 1 + "www"
    }

    #[test]
    fn deep_name_keeps_tld_plus_one_parent() {
        let handler = handler_with(&[], 8);
        let event = handler.handle(event_for("a.b.www.example.com."));
        assert_eq!(event.second_level_domain, "example.com.");
        assert_eq!(event.label_count, 6);
        assert_eq!(event.subdomain_label_count, 3);
        // "a.b.www" on the wire: (1+1) + (1+1) + (1+3)
        assert_eq!(event.subdomain_byte_length, 8);
    }

    #[test]
    fn special_tld_extends_parent_by_one_label() {
        let handler = handler_with(&["edu.cn"], 8);
        let event = handler.handle(event_for("a.b.c.edu.cn."));
        assert_eq!(event.second_level_domain, "c.edu.cn.");
        assert_eq!(event.subdomain_label_count, 2);
        assert_eq!(event.label_count, 6);
    }

    #[test]
    fn special_tld_needs_a_label_left_for_the_subdomain() {
        // a.edu.cn. — growing the parent would consume the whole name.
        let handler = handler_with(&["edu.cn"], 8);
        let event = handler.handle(event_for("a.edu.cn."));
        assert_eq!(event.second_level_domain, "edu.cn.");
        assert_eq!(event.subdomain_label_count, 1);
    }

    #[test]
    fn subdomain_and_sld_partition_the_name() {
        let handler = handler_with(&["edu.cn"], 8);
        let domain = "x1.x2.x3.host.example.org.";
        let event = handler.handle(event_for(domain));
        assert_eq!(event.second_level_domain, "example.org.");
        let rebuilt = format!("x1.x2.x3.host.{}", event.second_level_domain);
        assert_eq!(rebuilt, domain);
        // root-inclusive total = subdomain labels + parent labels + root
        assert_eq!(event.subdomain_label_count + 2 + 1, event.label_count);
    }

    #[test]
    fn unparseable_domain_is_a_no_op() {
        let handler = handler_with(&[], 8);
        let event = handler.handle(event_for("bad..name.example.com."));
        assert_eq!(event.second_level_domain, "");
        assert_eq!(event.subdomain_entropy, 0.0);
    }

    // ── Entropy ────────────────────────────────────────────────────

    #[test]
    fn constant_string_has_zero_entropy() {
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert_eq!(shannon_entropy(""), 0.0);
    }

    #[test]
    fn uniform_four_symbols_have_two_bits() {
        assert!((shannon_entropy("abcd") - 2.0).abs() < 1e-9);
    }

    #[test]
    fn entropy_is_bounded_by_log2_of_distinct_chars() {
        let s = "abcabcddee";
        let distinct = 5.0f64;
        let h = shannon_entropy(s);
        assert!(h > 0.0);
        assert!(h <= distinct.log2() + 1e-9);
    }

    #[test]
    fn entropy_covers_label_separators() {
        let handler = handler_with(&[], 8);
        let event = handler.handle(event_for("ab.ab.example.com."));
        // subdomain string is "ab.ab": p(a)=p(b)=2/5, p(.)=1/5
        let expected = -(2.0 * (0.4f64 * 0.4f64.log2()) + 0.2f64 * 0.2f64.log2());
        assert!((event.subdomain_entropy - expected).abs() < 1e-9);
    }

    // ── Encoding detection ─────────────────────────────────────────

    #[test]
    fn base32_label_is_detected() {
        let handler = handler_with(&[], 8);
        let event = handler.handle(event_for("MZXW6YTBOI.data.example.com."));
        assert!(event.subdomain_label_encoded);
    }

    #[test]
    fn hex_label_is_detected() {
        let handler = handler_with(&[], 8);
        let event = handler.handle(event_for("deadbeef41424344.example.com."));
        assert!(event.subdomain_label_encoded);
    }

    #[test]
    fn short_labels_are_skipped() {
        let handler = handler_with(&[], 16);
        let event = handler.handle(event_for("MZXW6YTBOI.t.example.com."));
        assert!(!event.subdomain_label_encoded);
    }

    #[test]
    fn ordinary_words_do_not_trigger() {
        let handler = handler_with(&[], 8);
        let event = handler.handle(event_for("intranet-portal.corp.example.com."));
        assert!(!event.subdomain_label_encoded);
    }

    #[test]
    fn detection_disabled_leaves_flag_false() {
        let tlds: Vec<String> = Vec::new();
        let handler = TunnelSecHandler::new(&tlds, true, false, 8);
        let event = handler.handle(event_for("MZXW6YTBOI.data.example.com."));
        assert!(!event.subdomain_label_encoded);
    }
}
