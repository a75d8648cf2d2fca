// Minimal BER codec for SNMP messages.
//
// Covers exactly what GET / GETNEXT traffic needs: the universal INTEGER,
// OCTET STRING, NULL, OBJECT IDENTIFIER and SEQUENCE types, the SNMP
// application types, the v2c exception markers, and the PDUs a manager
// sends or receives. The v3 envelope is framed in `usm.rs` on top of these
// primitives.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub(super) mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OID: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x30;
    pub const IP_ADDRESS: u8 = 0x40;
    pub const COUNTER32: u8 = 0x41;
    pub const GAUGE32: u8 = 0x42;
    pub const TIMETICKS: u8 = 0x43;
    pub const OPAQUE: u8 = 0x44;
    pub const COUNTER64: u8 = 0x46;
    pub const NO_SUCH_OBJECT: u8 = 0x80;
    pub const NO_SUCH_INSTANCE: u8 = 0x81;
    pub const END_OF_MIB_VIEW: u8 = 0x82;
}

// ── Object identifiers ───────────────────────────────────────────────

/// A numeric object identifier such as `1.3.6.1.2.1.1.1.0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn from_slice(arcs: &[u32]) -> Self {
        Self(arcs.to_vec())
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// The arcs after `prefix`, if `self` lives under it.
    pub fn suffix(&self, prefix: &Oid) -> Option<&[u32]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }

    /// Append `arcs`, e.g. to address a table row by index.
    pub fn child(&self, arcs: &[u32]) -> Oid {
        let mut out = self.0.clone();
        out.extend_from_slice(arcs);
        Oid(out)
    }
}

impl FromStr for Oid {
    type Err = Error;

    /// Accepts dotted notation with or without a leading dot.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        let arcs = trimmed
            .split('.')
            .map(str::parse::<u32>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| Error::InvalidOid(s.to_owned()))?;
        if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
            return Err(Error::InvalidOid(s.to_owned()));
        }
        Ok(Self(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            first = false;
            write!(f, "{arc}")?;
        }
        Ok(())
    }
}

// ── Values ───────────────────────────────────────────────────────────

/// A varbind value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    Oid(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    /// `true` for the v2c exception markers.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Self::NoSuchObject | Self::NoSuchInstance | Self::EndOfMibView
        )
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => Some(i64::from(*v)),
            Self::Counter64(v) => i64::try_from(*v).ok(),
            Self::OctetString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text rendering suitable for storage in a canonical field map.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::OctetString(bytes) => Some(
                String::from_utf8_lossy(bytes)
                    .trim_end_matches('\0')
                    .trim()
                    .to_owned(),
            ),
            Self::Null | Self::NoSuchObject | Self::NoSuchInstance | Self::EndOfMibView => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::OctetString(bytes) | Self::Opaque(bytes) => {
                write!(f, "{}", String::from_utf8_lossy(bytes))
            }
            Self::Null => f.write_str("null"),
            Self::Oid(oid) => write!(f, "{oid}"),
            Self::IpAddress([a, b, c, d]) => write!(f, "{a}.{b}.{c}.{d}"),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => write!(f, "{v}"),
            Self::Counter64(v) => write!(f, "{v}"),
            Self::NoSuchObject => f.write_str("noSuchObject"),
            Self::NoSuchInstance => f.write_str("noSuchInstance"),
            Self::EndOfMibView => f.write_str("endOfMibView"),
        }
    }
}

// ── Messages ─────────────────────────────────────────────────────────

/// PDU type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    GetRequest,
    GetNextRequest,
    Response,
    /// v3 agents answer with a report when discovery or security fails.
    Report,
}

impl PduKind {
    fn tag(self) -> u8 {
        match self {
            Self::GetRequest => 0xA0,
            Self::GetNextRequest => 0xA1,
            Self::Response => 0xA2,
            Self::Report => 0xA8,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, Error> {
        match tag {
            0xA0 => Ok(Self::GetRequest),
            0xA1 => Ok(Self::GetNextRequest),
            0xA2 => Ok(Self::Response),
            0xA8 => Ok(Self::Report),
            other => Err(Error::protocol(format!("unsupported PDU type 0x{other:02x}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub kind: PduKind,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<(Oid, Value)>,
}

impl Pdu {
    pub(super) fn encode(&self, out: &mut Vec<u8>) {
        let mut varbinds = Vec::new();
        for (oid, value) in &self.varbinds {
            let mut vb = Vec::new();
            encode_oid(oid, &mut vb);
            encode_value(value, &mut vb);
            encode_tlv(tag::SEQUENCE, &vb, &mut varbinds);
        }

        let mut pdu = Vec::new();
        encode_integer(tag::INTEGER, i64::from(self.request_id), &mut pdu);
        encode_integer(tag::INTEGER, self.error_status, &mut pdu);
        encode_integer(tag::INTEGER, self.error_index, &mut pdu);
        encode_tlv(tag::SEQUENCE, &varbinds, &mut pdu);
        encode_tlv(self.kind.tag(), &pdu, out);
    }

    /// Decode the next TLV of `reader` as a PDU.
    pub(super) fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let (pdu_tag, pdu_bytes) = reader.read_tlv()?;
        let kind = PduKind::from_tag(pdu_tag)?;

        let mut pdu = Reader::new(pdu_bytes);
        let request_id = i32::try_from(decode_integer(pdu.expect(tag::INTEGER)?)?)
            .map_err(|_| Error::protocol("request id out of range"))?;
        let error_status = decode_integer(pdu.expect(tag::INTEGER)?)?;
        let error_index = decode_integer(pdu.expect(tag::INTEGER)?)?;

        let mut list = Reader::new(pdu.expect(tag::SEQUENCE)?);
        let mut varbinds = Vec::new();
        while !list.is_empty() {
            let mut vb = Reader::new(list.expect(tag::SEQUENCE)?);
            let oid = decode_oid(vb.expect(tag::OID)?)?;
            let (value_tag, value_bytes) = vb.read_tlv()?;
            varbinds.push((oid, decode_value(value_tag, value_bytes)?));
        }

        Ok(Self {
            kind,
            request_id,
            error_status,
            error_index,
            varbinds,
        })
    }
}

/// A community-based SNMP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// 0 for v1, 1 for v2c.
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        encode_integer(tag::INTEGER, self.version, &mut body);
        encode_tlv(tag::OCTET_STRING, &self.community, &mut body);
        self.pdu.encode(&mut body);

        let mut out = Vec::new();
        encode_tlv(tag::SEQUENCE, &body, &mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut outer = Reader::new(bytes);
        let mut msg = Reader::new(outer.expect(tag::SEQUENCE)?);

        let version = decode_integer(msg.expect(tag::INTEGER)?)?;
        let community = msg.expect(tag::OCTET_STRING)?.to_vec();
        let pdu = Pdu::decode(&mut msg)?;
        Ok(Self {
            version,
            community,
            pdu,
        })
    }
}

// ── Encoding ─────────────────────────────────────────────────────────

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        // Short form; the guard keeps the byte in range.
        out.push(u8::try_from(len).unwrap_or(0x7F));
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | u8::try_from(significant.len()).unwrap_or(0x7F));
    out.extend_from_slice(significant);
}

pub(super) fn encode_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    encode_length(content.len(), out);
    out.extend_from_slice(content);
}

pub(super) fn encode_integer(tag: u8, value: i64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Drop redundant sign-extension bytes, keeping two's complement intact.
    while start < 7 {
        let (cur, next) = (bytes[start], bytes[start + 1]);
        if (cur == 0x00 && next & 0x80 == 0) || (cur == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    encode_tlv(tag, &bytes[start..], out);
}

fn encode_unsigned(tag: u8, value: u64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take(7).take_while(|b| **b == 0).count();
    let mut content = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    encode_tlv(tag, &content, out);
}

fn encode_oid(oid: &Oid, out: &mut Vec<u8>) {
    let arcs = oid.arcs();
    let mut content = Vec::new();
    if let [first, second, rest @ ..] = arcs {
        encode_base128(first * 40 + second, &mut content);
        for arc in rest {
            encode_base128(*arc, &mut content);
        }
    }
    encode_tlv(tag::OID, &content, out);
}

fn encode_base128(mut value: u32, out: &mut Vec<u8>) {
    let mut stack = [0u8; 5];
    let mut n = 0;
    loop {
        stack[n] = u8::try_from(value & 0x7F).unwrap_or(0);
        n += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        out.push(stack[i] | continuation);
    }
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Integer(v) => encode_integer(tag::INTEGER, *v, out),
        Value::OctetString(bytes) => encode_tlv(tag::OCTET_STRING, bytes, out),
        Value::Null => encode_tlv(tag::NULL, &[], out),
        Value::Oid(oid) => encode_oid(oid, out),
        Value::IpAddress(octets) => encode_tlv(tag::IP_ADDRESS, octets, out),
        Value::Counter32(v) => encode_unsigned(tag::COUNTER32, u64::from(*v), out),
        Value::Gauge32(v) => encode_unsigned(tag::GAUGE32, u64::from(*v), out),
        Value::TimeTicks(v) => encode_unsigned(tag::TIMETICKS, u64::from(*v), out),
        Value::Opaque(bytes) => encode_tlv(tag::OPAQUE, bytes, out),
        Value::Counter64(v) => encode_unsigned(tag::COUNTER64, *v, out),
        Value::NoSuchObject => encode_tlv(tag::NO_SUCH_OBJECT, &[], out),
        Value::NoSuchInstance => encode_tlv(tag::NO_SUCH_INSTANCE, &[], out),
        Value::EndOfMibView => encode_tlv(tag::END_OF_MIB_VIEW, &[], out),
    }
}

// ── Decoding ─────────────────────────────────────────────────────────

pub(super) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(super) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(super) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.buf.len() < n {
            return Err(Error::protocol("truncated BER element"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn byte(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn length(&mut self) -> Result<usize, Error> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7F);
        if count == 0 || count > 4 {
            return Err(Error::protocol("unsupported BER length form"));
        }
        let mut len = 0usize;
        for b in self.take(count)? {
            len = (len << 8) | usize::from(*b);
        }
        Ok(len)
    }

    /// Next TLV as (tag, content).
    pub(super) fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), Error> {
        let tag = self.byte()?;
        let len = self.length()?;
        Ok((tag, self.take(len)?))
    }

    pub(super) fn expect(&mut self, expected: u8) -> Result<&'a [u8], Error> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(Error::protocol(format!(
                "expected BER tag 0x{expected:02x}, found 0x{tag:02x}"
            )));
        }
        Ok(content)
    }
}

pub(super) fn decode_integer(bytes: &[u8]) -> Result<i64, Error> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(Error::protocol("bad INTEGER length"));
    }
    let negative = bytes[0] & 0x80 != 0;
    let mut value: i64 = if negative { -1 } else { 0 };
    for b in bytes {
        value = (value << 8) | i64::from(*b);
    }
    Ok(value)
}

fn decode_unsigned(bytes: &[u8]) -> Result<u64, Error> {
    if bytes.len() > 9 || (bytes.len() == 9 && bytes[0] != 0) {
        return Err(Error::protocol("unsigned value too large"));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn decode_u32(bytes: &[u8]) -> Result<u32, Error> {
    u32::try_from(decode_unsigned(bytes)?).map_err(|_| Error::protocol("32-bit value overflow"))
}

fn decode_oid(bytes: &[u8]) -> Result<Oid, Error> {
    let mut arcs = Vec::new();
    let mut acc: u32 = 0;
    for (i, b) in bytes.iter().enumerate() {
        acc = acc
            .checked_mul(128)
            .ok_or_else(|| Error::protocol("OID arc overflow"))?
            | u32::from(b & 0x7F);
        if b & 0x80 == 0 {
            if arcs.is_empty() {
                let first = (acc / 40).min(2);
                arcs.push(first);
                arcs.push(acc - first * 40);
            } else {
                arcs.push(acc);
            }
            acc = 0;
        } else if i == bytes.len() - 1 {
            return Err(Error::protocol("truncated OID arc"));
        }
    }
    if arcs.is_empty() {
        return Err(Error::protocol("empty OID"));
    }
    Ok(Oid(arcs))
}

fn decode_value(kind: u8, bytes: &[u8]) -> Result<Value, Error> {
    Ok(match kind {
        tag::INTEGER => Value::Integer(decode_integer(bytes)?),
        tag::OCTET_STRING => Value::OctetString(bytes.to_vec()),
        tag::NULL => Value::Null,
        tag::OID => Value::Oid(decode_oid(bytes)?),
        tag::IP_ADDRESS => {
            let octets: [u8; 4] = bytes
                .try_into()
                .map_err(|_| Error::protocol("IpAddress must be 4 bytes"))?;
            Value::IpAddress(octets)
        }
        tag::COUNTER32 => Value::Counter32(decode_u32(bytes)?),
        tag::GAUGE32 => Value::Gauge32(decode_u32(bytes)?),
        tag::TIMETICKS => Value::TimeTicks(decode_u32(bytes)?),
        tag::OPAQUE => Value::Opaque(bytes.to_vec()),
        tag::COUNTER64 => Value::Counter64(decode_unsigned(bytes)?),
        tag::NO_SUCH_OBJECT => Value::NoSuchObject,
        tag::NO_SUCH_INSTANCE => Value::NoSuchInstance,
        tag::END_OF_MIB_VIEW => Value::EndOfMibView,
        other => return Err(Error::protocol(format!("unsupported value tag 0x{other:02x}"))),
    })
}
