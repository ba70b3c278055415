// Compressed-name reading (RFC 1035 §4.1.4).

use std::io::Cursor;

use byteorder::ReadBytesExt;

use super::WireError;

const POINTER_MASK: u8 = 0xC0;
const MAX_POINTER_JUMPS: usize = 32;
const MAX_NAME_BYTES: usize = 255;

/// Read a possibly-compressed domain name at the cursor's position,
/// returning its presentation form with a trailing dot. The cursor is
/// left just past the name's in-place bytes regardless of pointer
/// jumps.
pub fn read_name(c: &mut Cursor<&[u8]>) -> Result<String, WireError> {
    let mut labels: Vec<String> = Vec::new();
    let mut name_bytes = 0usize;
    let mut jumps = 0usize;
    let mut return_pos: Option<u64> = None;

    loop {
        let len = c.read_u8()?;
        if len & POINTER_MASK == POINTER_MASK {
            let low = c.read_u8()?;
            if return_pos.is_none() {
                return_pos = Some(c.position());
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(WireError::PointerLoop);
            }
            let target = u64::from(len & !POINTER_MASK) << 8 | u64::from(low);
            if target >= c.get_ref().len() as u64 {
                return Err(WireError::BadPointer(target));
            }
            c.set_position(target);
        } else if len == 0 {
            break;
        } else if len & POINTER_MASK != 0 {
            // 0x40/0x80 label types were never standardized.
            return Err(WireError::BadLabelType(len));
        } else {
            name_bytes += usize::from(len) + 1;
            if name_bytes > MAX_NAME_BYTES {
                return Err(WireError::NameTooLong);
            }
            let mut raw = vec![0u8; usize::from(len)];
            std::io::Read::read_exact(c, &mut raw)?;
            labels.push(escape_label(&raw));
        }
    }

    if let Some(pos) = return_pos {
        c.set_position(pos);
    }

    if labels.is_empty() {
        return Ok(".".to_string());
    }
    let mut name = labels.join(".");
    name.push('.');
    Ok(name)
}

/// Presentation form of one label: printable ASCII kept, `.` and `\`
/// backslash-escaped, everything else rendered as `\DDD`.
fn escape_label(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        match b {
            b'.' | b'\\' => {
                out.push('\\');
                out.push(b as char);
            }
            0x21..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\{b:03}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(buf: &[u8]) -> Cursor<&[u8]> {
        Cursor::new(buf)
    }

    #[test]
    fn reads_uncompressed_name() {
        let buf = b"\x03www\x07example\x03com\x00";
        let mut c = cursor(buf);
        assert_eq!(read_name(&mut c).unwrap(), "www.example.com.");
        assert_eq!(c.position(), buf.len() as u64);
    }

    #[test]
    fn reads_root_name() {
        let mut c = cursor(b"\x00");
        assert_eq!(read_name(&mut c).unwrap(), ".");
    }

    #[test]
    fn follows_compression_pointer_and_restores_position() {
        // offset 0: "example.com." — offset 13: "www" + pointer to 0
        let buf = b"\x07example\x03com\x00\x03www\xC0\x00\xFF";
        let mut c = cursor(buf);
        c.set_position(13);
        assert_eq!(read_name(&mut c).unwrap(), "www.example.com.");
        // cursor lands after the 2-byte pointer, before the trailing 0xFF
        assert_eq!(c.position(), 19);
    }

    #[test]
    fn rejects_pointer_loop() {
        let buf = b"\xC0\x00";
        let mut c = cursor(buf);
        assert!(matches!(read_name(&mut c), Err(WireError::PointerLoop)));
    }

    #[test]
    fn rejects_out_of_range_pointer() {
        let buf = b"\xC0\x7F";
        let mut c = cursor(buf);
        assert!(matches!(read_name(&mut c), Err(WireError::BadPointer(_))));
    }

    #[test]
    fn escapes_non_printable_label_bytes() {
        let buf = b"\x02\x01a\x00";
        let mut c = cursor(buf);
        assert_eq!(read_name(&mut c).unwrap(), "\\001a.");
    }

    #[test]
    fn truncated_label_is_an_error() {
        let buf = b"\x05ab";
        let mut c = cursor(buf);
        assert!(matches!(read_name(&mut c), Err(WireError::Truncated)));
    }
}
