// Longest-prefix-match radix tree over address bits.
//
// One tree instance holds one address family; the ipinfo enricher
// keeps a v4 tree (32-bit keys) and a v6 tree (128-bit keys).
// Insert-only during startup, read-only afterwards.

use std::net::IpAddr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrefixError {
    #[error("invalid subnet address `{0}`")]
    InvalidAddress(String),
    #[error("prefix length {len} exceeds {max} bits for `{cidr}`")]
    PrefixTooLong { cidr: String, len: u8, max: u8 },
}

#[derive(Debug)]
struct Node<T> {
    value: Option<T>,
    zero: Option<Box<Node<T>>>,
    one: Option<Box<Node<T>>>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self { value: None, zero: None, one: None }
    }
}

/// Binary radix tree keyed by the big-endian bit string of an address.
#[derive(Debug)]
pub struct NetRadixTree<T> {
    root: Node<T>,
    len: usize,
}

impl<T> Default for NetRadixTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> NetRadixTree<T> {
    pub fn new() -> Self {
        Self { root: Node::new(), len: 0 }
    }

    /// Number of stored prefixes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Parse `cidr` (`10.0.0.0/8`, `2001:db8::/32`, or a bare address
    /// meaning a host route) and insert. Duplicate prefixes overwrite.
    pub fn insert_cidr(&mut self, cidr: &str, value: T) -> Result<(), PrefixError> {
        let (addr_part, len_part) = match cidr.split_once('/') {
            Some((a, l)) => (a, Some(l)),
            None => (cidr, None),
        };
        let addr: IpAddr = addr_part
            .trim()
            .parse()
            .map_err(|_| PrefixError::InvalidAddress(cidr.to_string()))?;
        let max = address_bits(&addr);
        let prefix_len = match len_part {
            Some(l) => l
                .trim()
                .parse::<u8>()
                .map_err(|_| PrefixError::InvalidAddress(cidr.to_string()))?,
            None => max,
        };
        if prefix_len > max {
            return Err(PrefixError::PrefixTooLong {
                cidr: cidr.to_string(),
                len: prefix_len,
                max,
            });
        }
        self.insert(addr, prefix_len, value);
        Ok(())
    }

    pub fn insert(&mut self, addr: IpAddr, prefix_len: u8, value: T) {
        let key = key_bits(&addr);
        let mut node = &mut self.root;
        for i in 0..prefix_len {
            let child = if bit(key, i) { &mut node.one } else { &mut node.zero };
            node = child.get_or_insert_with(|| Box::new(Node::new())).as_mut();
        }
        if node.value.replace(value).is_none() {
            self.len += 1;
        }
    }

    /// The value of the longest stored prefix covering `addr`.
    pub fn search_best(&self, addr: IpAddr) -> Option<&T> {
        let key = key_bits(&addr);
        let max = address_bits(&addr);
        let mut node = &self.root;
        let mut best = node.value.as_ref();
        for i in 0..max {
            let child = if bit(key, i) { &node.one } else { &node.zero };
            match child.as_deref() {
                Some(next) => {
                    node = next;
                    if node.value.is_some() {
                        best = node.value.as_ref();
                    }
                }
                None => break,
            }
        }
        best
    }
}

fn address_bits(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Address bits left-aligned in a u128 so bit 0 is the MSB of the key.
fn key_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => (u128::from(u32::from(*v4))) << 96,
        IpAddr::V6(v6) => u128::from_be_bytes(v6.octets()),
    }
}

fn bit(key: u128, index: u8) -> bool {
    (key >> (127 - index)) & 1 == 1
}
