//! Interest and ContentObject wire messages.
//!
//! Parsing produces offset-based views over the original bytes; the
//! forwarder's tables are keyed by byte ranges of the message, so no
//! parsed field copies wire data. Builders are provided for the client
//! tools and tests, plus the nonce splice used before first propagation.

use crate::error::CodecError;
use crate::name;
use crate::tlv::{self, Header};
use bytes::{Bytes, BytesMut};
use std::ops::Range;

/// Codec era marker carried in a ContentObject's Version field; content
/// from another era is accepted but counted as downrev.
pub const CONTENT_MAGIC: u32 = 20080711;

/// Nonce value size in bytes.
pub const NONCE_LEN: usize = 6;

/// Largest accepted Interest message.
pub const MAX_INTEREST_SIZE: usize = 65535;

/// Largest accepted ContentObject name region.
pub const MAX_CONTENT_NAME_SIZE: usize = 65535;

/// Top-level classification of a framed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Interest,
    ContentObject,
    LinkPdu,
}

/// Classifies a framed message by its outermost type.
pub fn message_kind(msg: &[u8]) -> Result<(MessageKind, Header), CodecError> {
    let h = tlv::read_element(msg, 0)?;
    let kind = match h.tlv_type {
        tlv::TLV_INTEREST => MessageKind::Interest,
        tlv::TLV_CONTENT_OBJECT => MessageKind::ContentObject,
        tlv::TLV_LINK_PDU => MessageKind::LinkPdu,
        other => return Err(CodecError::UnknownMessage(other)),
    };
    Ok((kind, h))
}

/* ---------------------------------------------------------------- *
 * Interest
 * ---------------------------------------------------------------- */

/// Offset-based view of a parsed Interest.
#[derive(Debug, Clone)]
pub struct ParsedInterest {
    /// Scope selector; absent means unrestricted.
    pub scope: Option<u8>,
    /// Order preference; 5 selects the rightmost (latest) match.
    pub orderpref: u8,
    /// Answer origin kind bits, parsed but not consulted by matching.
    pub answer_origin: Option<u8>,
    pub min_suffix: Option<u32>,
    pub max_suffix: Option<u32>,
    /// Publisher key digest value bytes.
    pub publisher: Option<Range<usize>>,
    /// Component run the asker wants excluded at the first suffix position.
    pub exclude: Option<Range<usize>>,
    /// Number of name components forming the matching prefix.
    pub prefix_comps: usize,
    /// Component offsets; entry `i` is where component `i` begins and the
    /// final entry is one past the last component.
    pub comps: Vec<usize>,
    /// Value region of the Name element.
    pub name: Range<usize>,
    /// Whole Nonce element, or the empty range at its insertion point.
    pub nonce: Range<usize>,
    /// Nonce value bytes; empty when the Interest carries no nonce.
    pub nonce_value: Range<usize>,
    /// Response-filter (Bloom) value bytes.
    pub response_filter: Option<Range<usize>>,
    /// Everything following the nonce position.
    pub other: Range<usize>,
    /// One past the end of the whole message.
    pub end: usize,
}

impl ParsedInterest {
    /// Number of components in the name.
    pub fn ncomps(&self) -> usize {
        self.comps.len() - 1
    }

    /// Whether the Interest carries a nonce.
    pub fn has_nonce(&self) -> bool {
        !self.nonce_value.is_empty()
    }

    /// Byte range of the encoded prefix components.
    pub fn prefix_range(&self) -> Range<usize> {
        self.comps[0]..self.comps[self.prefix_comps]
    }
}

/// Ranking of Interest elements; each element must appear after every
/// lower-ranked one.
fn interest_rank(tlv_type: u8) -> Option<u8> {
    Some(match tlv_type {
        tlv::TLV_MIN_SUFFIX_COMPONENTS => 1,
        tlv::TLV_MAX_SUFFIX_COMPONENTS => 2,
        tlv::TLV_PUBLISHER_KEY_DIGEST => 3,
        tlv::TLV_EXCLUDE => 4,
        tlv::TLV_ORDER_PREFERENCE => 5,
        tlv::TLV_ANSWER_ORIGIN => 6,
        tlv::TLV_SCOPE => 7,
        tlv::TLV_NONCE => 8,
        tlv::TLV_RESPONSE_FILTER => 9,
        _ => return None,
    })
}

const NONCE_RANK: u8 = 8;

/// Parses an Interest message.
pub fn parse_interest(msg: &[u8]) -> Result<ParsedInterest, CodecError> {
    if msg.len() > MAX_INTEREST_SIZE {
        return Err(CodecError::Oversize {
            kind: "interest",
            size: msg.len(),
        });
    }
    let outer = tlv::read_element(msg, 0)?;
    if outer.tlv_type != tlv::TLV_INTEREST || outer.total_len() != msg.len() {
        return Err(CodecError::Malformed {
            kind: "interest",
            reason: "bad outer element",
        });
    }
    let end = msg.len();
    let mut pos = outer.header_len;

    // The Name comes first and is mandatory.
    let name_h = tlv::read_element(msg, pos)?;
    if name_h.tlv_type != tlv::TLV_NAME {
        return Err(CodecError::Malformed {
            kind: "interest",
            reason: "missing name",
        });
    }
    let name = pos + name_h.header_len..pos + name_h.total_len();
    let comps = name::component_offsets(msg, name.start, name.end)?;
    pos += name_h.total_len();

    let mut pi = ParsedInterest {
        scope: None,
        orderpref: 0,
        answer_origin: None,
        min_suffix: None,
        max_suffix: None,
        publisher: None,
        exclude: None,
        prefix_comps: comps.len() - 1,
        comps,
        name,
        nonce: pos..pos,
        nonce_value: pos..pos,
        response_filter: None,
        other: pos..end,
        end,
    };

    let mut last_rank = 0u8;
    let mut nonce_insert = end;
    let mut saw_nonce = false;
    while pos < end {
        let h = tlv::read_element(msg, pos)?;
        let rank = interest_rank(h.tlv_type).ok_or(CodecError::Malformed {
            kind: "interest",
            reason: "unexpected element",
        })?;
        if rank <= last_rank {
            return Err(CodecError::Malformed {
                kind: "interest",
                reason: "elements out of order",
            });
        }
        last_rank = rank;
        let value = pos + h.header_len..pos + h.total_len();
        let num = tlv::decode_number(&msg[value.clone()]);
        match h.tlv_type {
            tlv::TLV_MIN_SUFFIX_COMPONENTS => pi.min_suffix = Some(num as u32),
            tlv::TLV_MAX_SUFFIX_COMPONENTS => pi.max_suffix = Some(num as u32),
            tlv::TLV_PUBLISHER_KEY_DIGEST => pi.publisher = Some(value.clone()),
            tlv::TLV_EXCLUDE => pi.exclude = Some(value.clone()),
            tlv::TLV_ORDER_PREFERENCE => pi.orderpref = num as u8,
            tlv::TLV_ANSWER_ORIGIN => pi.answer_origin = Some(num as u8),
            tlv::TLV_SCOPE => pi.scope = Some(num as u8),
            tlv::TLV_NONCE => {
                if h.value_len != NONCE_LEN {
                    return Err(CodecError::Malformed {
                        kind: "interest",
                        reason: "nonce must be 6 bytes",
                    });
                }
                saw_nonce = true;
                pi.nonce = pos..pos + h.total_len();
                pi.nonce_value = value.clone();
            }
            tlv::TLV_RESPONSE_FILTER => {
                if !saw_nonce && nonce_insert == end {
                    nonce_insert = pos;
                }
                pi.response_filter = Some(value.clone());
            }
            _ => unreachable!(),
        }
        if !saw_nonce && rank < NONCE_RANK {
            nonce_insert = pos + h.total_len();
        }
        pos += h.total_len();
    }

    if !saw_nonce {
        pi.nonce = nonce_insert..nonce_insert;
        pi.nonce_value = nonce_insert..nonce_insert;
    }
    pi.other = pi.nonce.end..end;
    Ok(pi)
}

/// Rebuilds an Interest with a nonce spliced in at its insertion point.
/// The input must have parsed without a nonce.
pub fn splice_nonce(
    msg: &[u8],
    pi: &ParsedInterest,
    nonce: &[u8; NONCE_LEN],
) -> Result<Bytes, CodecError> {
    let outer = tlv::read_element(msg, 0)?;
    let mut value = BytesMut::with_capacity(msg.len() + NONCE_LEN + 2);
    value.extend_from_slice(&msg[outer.header_len..pi.nonce.start]);
    tlv::encode_tlv(tlv::TLV_NONCE, nonce, &mut value);
    value.extend_from_slice(&msg[pi.other.clone()]);
    let mut out = BytesMut::with_capacity(value.len() + 6);
    tlv::encode_tlv(tlv::TLV_INTEREST, &value, &mut out);
    Ok(out.freeze())
}

/* ---------------------------------------------------------------- *
 * ContentObject
 * ---------------------------------------------------------------- */

/// Offset-based view of a parsed ContentObject.
#[derive(Debug, Clone)]
pub struct ParsedContent {
    /// Codec era of the message; `CONTENT_MAGIC` unless a Version says
    /// otherwise.
    pub magic: u32,
    /// Component offsets with the same convention as Interests.
    pub comps: Vec<usize>,
    /// Value region of the Name element.
    pub name: Range<usize>,
    /// Publisher key digest value bytes from the signed info.
    pub publisher: Option<Range<usize>>,
    /// Hash key: from the Name element through the content-body boundary.
    pub key: Range<usize>,
    /// Offset of the Content element; the tail starts here.
    pub content_start: usize,
    /// Content value bytes.
    pub content: Range<usize>,
    /// Offset of the 32-byte signature bits, 0 when absent.
    pub sig_bits: usize,
    /// One past the end of the whole message.
    pub end: usize,
}

impl ParsedContent {
    /// Number of components in the name.
    pub fn ncomps(&self) -> usize {
        self.comps.len() - 1
    }

    /// Byte range of the encoded name components.
    pub fn name_range(&self) -> Range<usize> {
        self.comps[0]..self.comps[self.ncomps()]
    }
}

/// Parses a ContentObject message.
pub fn parse_content_object(msg: &[u8]) -> Result<ParsedContent, CodecError> {
    let outer = tlv::read_element(msg, 0)?;
    if outer.tlv_type != tlv::TLV_CONTENT_OBJECT || outer.total_len() != msg.len() {
        return Err(CodecError::Malformed {
            kind: "content",
            reason: "bad outer element",
        });
    }
    let end = msg.len();
    let mut pos = outer.header_len;
    let key_start = pos;

    let name_h = tlv::read_element(msg, pos)?;
    if name_h.tlv_type != tlv::TLV_NAME {
        return Err(CodecError::Malformed {
            kind: "content",
            reason: "missing name",
        });
    }
    if name_h.value_len > MAX_CONTENT_NAME_SIZE {
        return Err(CodecError::Oversize {
            kind: "content name",
            size: name_h.value_len,
        });
    }
    let name = pos + name_h.header_len..pos + name_h.total_len();
    let comps = name::component_offsets(msg, name.start, name.end)?;
    pos += name_h.total_len();

    let mut magic = CONTENT_MAGIC;
    let mut publisher = None;

    // Optional signed info ahead of the content body.
    let mut h = tlv::read_element(msg, pos)?;
    if h.tlv_type == tlv::TLV_SIGNED_INFO {
        let si = pos + h.header_len..pos + h.total_len();
        let mut p = si.start;
        while p < si.end {
            let e = tlv::read_element(msg, p)?;
            let value = p + e.header_len..p + e.total_len();
            match e.tlv_type {
                tlv::TLV_PUBLISHER_KEY_DIGEST => publisher = Some(value),
                tlv::TLV_VERSION => magic = tlv::decode_number(&msg[value]) as u32,
                tlv::TLV_TIMESTAMP => {}
                _ => {
                    return Err(CodecError::Malformed {
                        kind: "content",
                        reason: "unexpected signed-info element",
                    })
                }
            }
            p += e.total_len();
        }
        pos += h.total_len();
        h = tlv::read_element(msg, pos)?;
    }

    if h.tlv_type != tlv::TLV_CONTENT {
        return Err(CodecError::Malformed {
            kind: "content",
            reason: "missing content body",
        });
    }
    let content_start = pos;
    let content = pos + h.header_len..pos + h.total_len();
    pos += h.total_len();

    // Optional signature; only well-formed 32-byte-or-longer bits are
    // usable for Bloom suppression.
    let mut sig_bits = 0;
    if pos < end {
        let sig_h = tlv::read_element(msg, pos)?;
        if sig_h.tlv_type != tlv::TLV_SIGNATURE {
            return Err(CodecError::Malformed {
                kind: "content",
                reason: "trailing garbage after content",
            });
        }
        let sig = pos + sig_h.header_len..pos + sig_h.total_len();
        if sig.start < sig.end {
            if let Ok(bits_h) = tlv::read_element(msg, sig.start) {
                if bits_h.tlv_type == tlv::TLV_SIGNATURE_BITS
                    && bits_h.value_len >= 32
                    && sig.start + bits_h.total_len() <= sig.end
                {
                    sig_bits = sig.start + bits_h.header_len;
                }
            }
        }
        pos += sig_h.total_len();
    }
    if pos != end {
        return Err(CodecError::Malformed {
            kind: "content",
            reason: "trailing garbage",
        });
    }

    Ok(ParsedContent {
        magic,
        comps,
        name,
        publisher,
        key: key_start..content_start,
        content_start,
        content,
        sig_bits,
        end,
    })
}

/* ---------------------------------------------------------------- *
 * Selector qualifiers
 * ---------------------------------------------------------------- */

/// Applies the Interest's selector qualifiers to a content candidate
/// that is already known to be a prefix match. The content side comes
/// in as the pieces a store entry keeps: its bytes, component offsets,
/// and publisher digest range.
pub fn content_matches_qualifiers(
    interest_msg: &[u8],
    pi: &ParsedInterest,
    content_msg: &[u8],
    content_comps: &[usize],
    content_publisher: Option<Range<usize>>,
) -> bool {
    let content_ncomps = content_comps.len() - 1;
    let suffix = content_ncomps.saturating_sub(pi.prefix_comps) as u32;
    if let Some(min) = pi.min_suffix {
        if suffix < min {
            return false;
        }
    }
    if let Some(max) = pi.max_suffix {
        if suffix > max {
            return false;
        }
    }
    if let Some(ref want) = pi.publisher {
        match content_publisher {
            Some(got) if content_msg[got.clone()] == interest_msg[want.clone()] => {}
            _ => return false,
        }
    }
    if let (Some(ref excl), true) = (&pi.exclude, content_ncomps > pi.prefix_comps) {
        let next_off = content_comps[pi.prefix_comps];
        let next_end = content_comps[pi.prefix_comps + 1];
        let next = match tlv::read_element(content_msg, next_off) {
            Ok(h) => &content_msg[next_off + h.header_len..next_end],
            Err(_) => return false,
        };
        for comp in name::ComponentIter::new(&interest_msg[excl.clone()]) {
            if comp == next {
                return false;
            }
        }
    }
    true
}

/* ---------------------------------------------------------------- *
 * Builders
 * ---------------------------------------------------------------- */

/// Builds Interest messages; used by the client tool and tests.
#[derive(Default)]
pub struct InterestBuilder {
    components: Vec<Vec<u8>>,
    min_suffix: Option<u32>,
    max_suffix: Option<u32>,
    publisher: Option<Vec<u8>>,
    exclude: Vec<Vec<u8>>,
    orderpref: Option<u8>,
    answer_origin: Option<u8>,
    scope: Option<u8>,
    nonce: Option<[u8; NONCE_LEN]>,
    response_filter: Option<Vec<u8>>,
}

impl InterestBuilder {
    pub fn new(uri: &str) -> Self {
        Self {
            components: name::components_from_uri(uri),
            ..Default::default()
        }
    }

    /// Appends a raw (possibly binary) name component.
    pub fn component(mut self, comp: &[u8]) -> Self {
        self.components.push(comp.to_vec());
        self
    }

    pub fn scope(mut self, scope: u8) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn orderpref(mut self, pref: u8) -> Self {
        self.orderpref = Some(pref);
        self
    }

    pub fn answer_origin(mut self, kind: u8) -> Self {
        self.answer_origin = Some(kind);
        self
    }

    pub fn min_suffix(mut self, n: u32) -> Self {
        self.min_suffix = Some(n);
        self
    }

    pub fn max_suffix(mut self, n: u32) -> Self {
        self.max_suffix = Some(n);
        self
    }

    pub fn publisher(mut self, digest: &[u8]) -> Self {
        self.publisher = Some(digest.to_vec());
        self
    }

    pub fn exclude(mut self, component: &[u8]) -> Self {
        self.exclude.push(component.to_vec());
        self
    }

    pub fn nonce(mut self, nonce: [u8; NONCE_LEN]) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn response_filter(mut self, wire: Vec<u8>) -> Self {
        self.response_filter = Some(wire);
        self
    }

    pub fn build(&self) -> Bytes {
        let mut nm = BytesMut::new();
        for c in &self.components {
            name::encode_component(c, &mut nm);
        }
        let mut value = BytesMut::new();
        tlv::encode_tlv(tlv::TLV_NAME, &nm, &mut value);
        if let Some(n) = self.min_suffix {
            tlv::encode_tlv_number(tlv::TLV_MIN_SUFFIX_COMPONENTS, n as u64, &mut value);
        }
        if let Some(n) = self.max_suffix {
            tlv::encode_tlv_number(tlv::TLV_MAX_SUFFIX_COMPONENTS, n as u64, &mut value);
        }
        if let Some(ref p) = self.publisher {
            tlv::encode_tlv(tlv::TLV_PUBLISHER_KEY_DIGEST, p, &mut value);
        }
        if !self.exclude.is_empty() {
            let mut ex = BytesMut::new();
            for c in &self.exclude {
                name::encode_component(c, &mut ex);
            }
            tlv::encode_tlv(tlv::TLV_EXCLUDE, &ex, &mut value);
        }
        if let Some(p) = self.orderpref {
            tlv::encode_tlv_number(tlv::TLV_ORDER_PREFERENCE, p as u64, &mut value);
        }
        if let Some(k) = self.answer_origin {
            tlv::encode_tlv_number(tlv::TLV_ANSWER_ORIGIN, k as u64, &mut value);
        }
        if let Some(s) = self.scope {
            tlv::encode_tlv_number(tlv::TLV_SCOPE, s as u64, &mut value);
        }
        if let Some(ref n) = self.nonce {
            tlv::encode_tlv(tlv::TLV_NONCE, n, &mut value);
        }
        if let Some(ref f) = self.response_filter {
            tlv::encode_tlv(tlv::TLV_RESPONSE_FILTER, f, &mut value);
        }
        let mut out = BytesMut::new();
        tlv::encode_tlv(tlv::TLV_INTEREST, &value, &mut out);
        out.freeze()
    }
}

/// Builds ContentObject messages; used by the client tool and tests.
pub struct ContentObjectBuilder {
    components: Vec<Vec<u8>>,
    content: Vec<u8>,
    publisher: Option<Vec<u8>>,
    timestamp: Option<u64>,
    version: Option<u64>,
    signature_bits: Option<Vec<u8>>,
}

impl ContentObjectBuilder {
    pub fn new(uri: &str, content: &[u8]) -> Self {
        Self {
            components: name::components_from_uri(uri),
            content: content.to_vec(),
            publisher: None,
            timestamp: None,
            version: None,
            signature_bits: Some(vec![0u8; 32]),
        }
    }

    pub fn publisher(mut self, digest: &[u8]) -> Self {
        self.publisher = Some(digest.to_vec());
        self
    }

    pub fn timestamp(mut self, ts: u64) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn version(mut self, v: u64) -> Self {
        self.version = Some(v);
        self
    }

    pub fn signature_bits(mut self, bits: &[u8]) -> Self {
        self.signature_bits = Some(bits.to_vec());
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.signature_bits = None;
        self
    }

    pub fn build(&self) -> Bytes {
        let mut nm = BytesMut::new();
        for c in &self.components {
            name::encode_component(c, &mut nm);
        }
        let mut value = BytesMut::new();
        tlv::encode_tlv(tlv::TLV_NAME, &nm, &mut value);
        if self.publisher.is_some() || self.timestamp.is_some() || self.version.is_some() {
            let mut si = BytesMut::new();
            if let Some(ref p) = self.publisher {
                tlv::encode_tlv(tlv::TLV_PUBLISHER_KEY_DIGEST, p, &mut si);
            }
            if let Some(ts) = self.timestamp {
                tlv::encode_tlv_number(tlv::TLV_TIMESTAMP, ts, &mut si);
            }
            if let Some(v) = self.version {
                tlv::encode_tlv_number(tlv::TLV_VERSION, v, &mut si);
            }
            tlv::encode_tlv(tlv::TLV_SIGNED_INFO, &si, &mut value);
        }
        tlv::encode_tlv(tlv::TLV_CONTENT, &self.content, &mut value);
        if let Some(ref bits) = self.signature_bits {
            let mut sig = BytesMut::new();
            tlv::encode_tlv(tlv::TLV_SIGNATURE_BITS, bits, &mut sig);
            tlv::encode_tlv(tlv::TLV_SIGNATURE, &sig, &mut value);
        }
        let mut out = BytesMut::new();
        tlv::encode_tlv(tlv::TLV_CONTENT_OBJECT, &value, &mut out);
        out.freeze()
    }
}

/// Wraps a message in a link PDU container.
pub fn wrap_link_pdu(msg: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(msg.len() + 6);
    tlv::encode_tlv(tlv::TLV_LINK_PDU, msg, &mut out);
    out.freeze()
}
