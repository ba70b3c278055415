// Display tables for record types, classes, and response codes.

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_MX: u16 = 15;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_OPT: u16 = 41;

pub fn rtype_str(rtype: u16) -> String {
    match rtype {
        TYPE_A => "A".into(),
        TYPE_NS => "NS".into(),
        3 => "MD".into(),
        4 => "MF".into(),
        TYPE_CNAME => "CNAME".into(),
        TYPE_SOA => "SOA".into(),
        7 => "MB".into(),
        8 => "MG".into(),
        9 => "MR".into(),
        10 => "NULL".into(),
        11 => "WKS".into(),
        TYPE_PTR => "PTR".into(),
        13 => "HINFO".into(),
        14 => "MINFO".into(),
        TYPE_MX => "MX".into(),
        TYPE_TXT => "TXT".into(),
        17 => "RP".into(),
        18 => "AFSDB".into(),
        24 => "SIG".into(),
        25 => "KEY".into(),
        TYPE_AAAA => "AAAA".into(),
        29 => "LOC".into(),
        TYPE_SRV => "SRV".into(),
        35 => "NAPTR".into(),
        39 => "DNAME".into(),
        TYPE_OPT => "OPT".into(),
        43 => "DS".into(),
        44 => "SSHFP".into(),
        46 => "RRSIG".into(),
        47 => "NSEC".into(),
        48 => "DNSKEY".into(),
        50 => "NSEC3".into(),
        51 => "NSEC3PARAM".into(),
        52 => "TLSA".into(),
        64 => "SVCB".into(),
        65 => "HTTPS".into(),
        99 => "SPF".into(),
        252 => "AXFR".into(),
        255 => "ANY".into(),
        256 => "URI".into(),
        257 => "CAA".into(),
        other => format!("TYPE{other}"),
    }
}

pub fn rclass_str(rclass: u16) -> String {
    match rclass {
        1 => "IN".into(),
        3 => "CH".into(),
        4 => "HS".into(),
        254 => "NONE".into(),
        255 => "ANY".into(),
        other => format!("CLASS{other}"),
    }
}

pub fn rcode_str(rcode: u8) -> String {
    match rcode {
        0 => "NOERROR".into(),
        1 => "FORMERR".into(),
        2 => "SERVFAIL".into(),
        3 => "NXDOMAIN".into(),
        4 => "NOTIMP".into(),
        5 => "REFUSED".into(),
        6 => "YXDOMAIN".into(),
        7 => "YXRRSET".into(),
        8 => "NXRRSET".into(),
        9 => "NOTAUTH".into(),
        10 => "NOTZONE".into(),
        other => format!("RCODE{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_types_render_by_mnemonic() {
        assert_eq!(rtype_str(TYPE_A), "A");
        assert_eq!(rtype_str(TYPE_AAAA), "AAAA");
        assert_eq!(rtype_str(TYPE_CNAME), "CNAME");
    }

    #[test]
    fn unknown_values_use_numeric_fallbacks() {
        assert_eq!(rtype_str(4096), "TYPE4096");
        assert_eq!(rclass_str(9), "CLASS9");
        assert_eq!(rcode_str(13), "RCODE13");
    }

    #[test]
    fn rcode_zero_is_noerror() {
        assert_eq!(rcode_str(0), "NOERROR");
        assert_eq!(rcode_str(3), "NXDOMAIN");
    }
}
