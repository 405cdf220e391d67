//! Hierarchical name handling.
//!
//! Names on the wire are runs of `Component` TLVs; the forwarder never
//! builds a structured name type, it works on encoded component runs with
//! offset arrays. This module has the component walker, the canonical
//! ordering used by the content store, and the URI helpers the tools use.

use crate::error::CodecError;
use crate::tlv::{self, TLV_COMPONENT};
use bytes::BytesMut;
use std::cmp::Ordering;
use std::fmt;

/// Encoded size of a name component that looks like a content digest:
/// type byte, short length byte, and 32 digest bytes.
pub const DIGEST_COMPONENT_ENCODED_LEN: usize = 1 + 1 + 32;

/// Whether an encoded component of the given size has digest shape.
pub fn is_digest_shaped(encoded_len: usize) -> bool {
    encoded_len == DIGEST_COMPONENT_ENCODED_LEN
}

/// Iterates the component values of an encoded component run.
pub struct ComponentIter<'a> {
    region: &'a [u8],
    pos: usize,
}

impl<'a> ComponentIter<'a> {
    pub fn new(region: &'a [u8]) -> Self {
        Self { region, pos: 0 }
    }
}

impl<'a> Iterator for ComponentIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.region.len() {
            return None;
        }
        let h = tlv::read_element(self.region, self.pos).ok()?;
        if h.tlv_type != TLV_COMPONENT {
            return None;
        }
        let start = self.pos + h.header_len;
        self.pos += h.total_len();
        Some(&self.region[start..start + h.value_len])
    }
}

/// Canonical name order over two encoded component runs.
///
/// Component by component as unsigned byte strings; a name that is a
/// proper component-prefix of another orders first.
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    let mut ai = ComponentIter::new(a);
    let mut bi = ComponentIter::new(b);
    loop {
        match (ai.next(), bi.next()) {
            (Some(x), Some(y)) => match x.cmp(y) {
                Ordering::Equal => continue,
                other => return other,
            },
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => return Ordering::Equal,
        }
    }
}

/// Collects per-component offsets within `msg` for the run at
/// `start..end`. The result has one entry per component plus a final
/// entry equal to `end`, so entry `i` is where component `i` begins and
/// `offsets[i+1] - offsets[i]` is its encoded size.
pub fn component_offsets(
    msg: &[u8],
    start: usize,
    end: usize,
) -> Result<Vec<usize>, CodecError> {
    let mut offsets = Vec::new();
    let mut pos = start;
    while pos < end {
        let h = tlv::read_element(msg, pos)?;
        if h.tlv_type != TLV_COMPONENT || pos + h.total_len() > end {
            return Err(CodecError::Malformed {
                kind: "name",
                reason: "expected a component",
            });
        }
        offsets.push(pos);
        pos += h.total_len();
    }
    offsets.push(end);
    Ok(offsets)
}

/// Appends one encoded component to a buffer.
pub fn encode_component(value: &[u8], buf: &mut BytesMut) {
    tlv::encode_tlv(TLV_COMPONENT, value, buf);
}

/// Splits a `/`-separated URI into component values. Empty components
/// are dropped, so `/a//b/` is the same name as `/a/b`.
pub fn components_from_uri(uri: &str) -> Vec<Vec<u8>> {
    uri.split('/')
        .filter(|c| !c.is_empty())
        .map(|c| c.as_bytes().to_vec())
        .collect()
}

/// Renders an encoded component run as a URI for log messages.
pub struct Uri<'a>(pub &'a [u8]);

impl fmt::Display for Uri<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut any = false;
        for comp in ComponentIter::new(self.0) {
            any = true;
            write!(f, "/")?;
            if comp.iter().all(|&b| b.is_ascii_graphic() || b == b' ') {
                write!(f, "{}", String::from_utf8_lossy(comp))?;
            } else {
                write!(f, "0x")?;
                for b in comp {
                    write!(f, "{:02x}", b)?;
                }
            }
        }
        if !any {
            write!(f, "/")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(comps: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for c in comps {
            encode_component(c, &mut buf);
        }
        buf.to_vec()
    }

    #[test]
    fn component_walk() {
        let r = run(&[b"a", b"bc", b""]);
        let got: Vec<&[u8]> = ComponentIter::new(&r).collect();
        assert_eq!(got, vec![b"a".as_slice(), b"bc".as_slice(), b"".as_slice()]);
    }

    #[test]
    fn canonical_order() {
        let a = run(&[b"a"]);
        let ab = run(&[b"a", b"b"]);
        let ax = run(&[b"ab"]);
        let b = run(&[b"b"]);
        assert_eq!(compare(&a, &a), Ordering::Equal);
        // A component-prefix orders before its extensions.
        assert_eq!(compare(&a, &ab), Ordering::Less);
        // First differing component decides; "ab" is one component.
        assert_eq!(compare(&ab, &ax), Ordering::Less);
        assert_eq!(compare(&ax, &b), Ordering::Less);
    }

    #[test]
    fn offsets_cover_run() {
        let r = run(&[b"one", b"two"]);
        let offs = component_offsets(&r, 0, r.len()).unwrap();
        assert_eq!(offs.len(), 3);
        assert_eq!(offs[0], 0);
        assert_eq!(*offs.last().unwrap(), r.len());
        // Encoded sizes are header + value.
        assert_eq!(offs[1] - offs[0], 2 + 3);
    }

    #[test]
    fn uri_formatting() {
        let r = run(&[b"hello", &[0xffu8, 0x01]]);
        assert_eq!(format!("{}", Uri(&r)), "/hello/0xff01");
        assert_eq!(format!("{}", Uri(&[])), "/");
    }

    #[test]
    fn digest_shape() {
        let r = run(&[&[0u8; 32]]);
        assert!(is_digest_shaped(r.len()));
        let r = run(&[&[0u8; 31]]);
        assert!(!is_digest_shaped(r.len()));
    }
}
