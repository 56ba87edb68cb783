//! Framing of LDAP messages that keeps the request controls as the client sent them.
//!
//! ldap3_proto drops the criticality of the controls it does not know, and a
//! control it cannot decode fails the whole message. The controls are
//! therefore cut out of the BER frame here and the rest of the message is
//! handed to [`LdapCodec`].

use bytes::BytesMut;
use ldap3_proto::{proto::LdapMsg, LdapCodec};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

const BOOLEAN: u8 = 0x01;
const INTEGER: u8 = 0x02;
const OCTET_STRING: u8 = 0x04;
const SEQUENCE: u8 = 0x30;
/// `[0] Controls` in an LDAPMessage.
const CONTROLS: u8 = 0xa0;

const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BerError {
    #[error("Truncated BER element")]
    Truncated,
    #[error("Unsupported BER length encoding")]
    Length,
    #[error("Unsupported BER tag `{0:#04x}`")]
    UnsupportedTag(u8),
    #[error("Expected BER tag `{expected:#04x}`, found `{found:#04x}`")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("Invalid BER value")]
    InvalidValue,
}

/// A control attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestControl {
    pub oid: String,
    pub criticality: bool,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct LdapRequest {
    pub message: LdapMsg,
    pub controls: Vec<RequestControl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    tag: u8,
    header_len: usize,
    len: usize,
}

impl Header {
    fn total(&self) -> usize {
        self.header_len + self.len
    }
}

struct Element<'a> {
    tag: u8,
    content: &'a [u8],
    raw: &'a [u8],
}

impl Element<'_> {
    fn expect(&self, expected: u8) -> Result<(), BerError> {
        if self.tag == expected {
            Ok(())
        } else {
            Err(BerError::UnexpectedTag {
                expected,
                found: self.tag,
            })
        }
    }
}

/// `Ok(None)` while `buf` does not hold the whole header yet.
fn read_header(buf: &[u8]) -> Result<Option<Header>, BerError> {
    let (Some(&tag), Some(&first)) = (buf.first(), buf.get(1)) else {
        return Ok(None);
    };
    if tag & 0x1f == 0x1f {
        return Err(BerError::UnsupportedTag(tag));
    }
    if first & 0x80 == 0 {
        return Ok(Some(Header {
            tag,
            header_len: 2,
            len: usize::from(first),
        }));
    }
    let count = usize::from(first & 0x7f);
    if count == 0 || count > 4 {
        return Err(BerError::Length);
    }
    let Some(bytes) = buf.get(2..2 + count) else {
        return Ok(None);
    };
    let len = bytes
        .iter()
        .fold(0usize, |len, byte| (len << 8) | usize::from(*byte));
    Ok(Some(Header {
        tag,
        header_len: 2 + count,
        len,
    }))
}

fn next_element(buf: &[u8]) -> Result<(Element<'_>, &[u8]), BerError> {
    let header = read_header(buf)?.ok_or(BerError::Truncated)?;
    let total = header.total();
    let raw = buf.get(..total).ok_or(BerError::Truncated)?;
    Ok((
        Element {
            tag: header.tag,
            content: &raw[header.header_len..],
            raw,
        },
        &buf[total..],
    ))
}

/// The elements of a constructed value, up to the first malformed one.
fn elements(mut buf: &[u8]) -> impl Iterator<Item = Result<Element<'_>, BerError>> {
    std::iter::from_fn(move || {
        if buf.is_empty() {
            return None;
        }
        match next_element(buf) {
            Ok((element, rest)) => {
                buf = rest;
                Some(Ok(element))
            }
            Err(e) => {
                buf = &[];
                Some(Err(e))
            }
        }
    })
}

fn next_field<'a>(
    fields: &mut impl Iterator<Item = Result<Element<'a>, BerError>>,
    tag: u8,
) -> Result<Element<'a>, BerError> {
    let field = fields.next().ok_or(BerError::Truncated)??;
    field.expect(tag)?;
    Ok(field)
}

pub(crate) fn encode_element(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    match u8::try_from(content.len()) {
        Ok(len) if len < 0x80 => out.push(len),
        _ => {
            let len = content.len().to_be_bytes();
            let skip = len.iter().take_while(|byte| **byte == 0).count();
            out.push(0x80 | (len.len() - skip) as u8);
            out.extend_from_slice(&len[skip..]);
        }
    }
    out.extend_from_slice(content);
    out
}

fn decode_integer(content: &[u8]) -> Result<i64, BerError> {
    match content.first() {
        Some(first) if content.len() <= 8 => {
            let sign = if first & 0x80 == 0 { 0 } else { -1 };
            Ok(content
                .iter()
                .fold(sign, |value: i64, byte| (value << 8) | i64::from(*byte)))
        }
        _ => Err(BerError::InvalidValue),
    }
}

fn parse_control(element: Element<'_>) -> Result<RequestControl, BerError> {
    element.expect(SEQUENCE)?;
    let mut fields = elements(element.content);
    let oid = next_field(&mut fields, OCTET_STRING)?;
    let oid = std::str::from_utf8(oid.content)
        .map_err(|_| BerError::InvalidValue)?
        .to_string();
    let mut criticality = false;
    let mut value = None;
    for field in fields {
        let field = field?;
        match (field.tag, field.content) {
            (BOOLEAN, [flag]) if value.is_none() => criticality = *flag != 0,
            (OCTET_STRING, content) if value.is_none() => value = Some(content.to_vec()),
            (found, _) => {
                return Err(BerError::UnexpectedTag {
                    expected: OCTET_STRING,
                    found,
                })
            }
        }
    }
    Ok(RequestControl {
        oid,
        criticality,
        value,
    })
}

fn parse_controls(content: &[u8]) -> Vec<RequestControl> {
    elements(content)
        .filter_map(|element| match element.and_then(parse_control) {
            Ok(control) => Some(control),
            Err(e) => {
                warn!("Ignoring a malformed request control: {e}");
                None
            }
        })
        .collect()
}

/// Cuts the controls out of a complete LDAPMessage.
fn split_controls(frame: &[u8]) -> Result<(Vec<u8>, Vec<RequestControl>), BerError> {
    let (message, _) = next_element(frame)?;
    message.expect(SEQUENCE)?;
    let mut content = Vec::with_capacity(message.content.len());
    let mut controls = Vec::new();
    for (position, element) in elements(message.content).enumerate() {
        let element = element?;
        // After the message id and the protocol op.
        if position >= 2 && element.tag == CONTROLS {
            controls = parse_controls(element.content);
        } else {
            content.extend_from_slice(element.raw);
        }
    }
    Ok((encode_element(SEQUENCE, &content), controls))
}

/// Decodes the value of a paged results control into the page size and the cookie.
pub fn decode_paged_results(value: &[u8]) -> Result<(i64, Vec<u8>), BerError> {
    let (sequence, rest) = next_element(value)?;
    sequence.expect(SEQUENCE)?;
    if !rest.is_empty() {
        return Err(BerError::InvalidValue);
    }
    let mut fields = elements(sequence.content);
    let size = decode_integer(next_field(&mut fields, INTEGER)?.content)?;
    let cookie = next_field(&mut fields, OCTET_STRING)?.content.to_vec();
    Ok((size, cookie))
}

fn invalid_data<E>(error: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// Decodes [`LdapRequest`]s and encodes response [`LdapMsg`]s.
#[derive(Default)]
pub struct DirectoryCodec {
    inner: LdapCodec,
}

impl Decoder for DirectoryCodec {
    type Item = LdapRequest;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<LdapRequest>> {
        let Some(header) = read_header(buf).map_err(invalid_data)? else {
            return Ok(None);
        };
        let total = header.total();
        if total > MAX_MESSAGE_SIZE {
            return Err(invalid_data(format!(
                "LDAP message of {total} bytes is too large"
            )));
        }
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }
        let frame = buf.split_to(total);
        let (message, controls) = split_controls(&frame).map_err(invalid_data)?;
        let mut message = BytesMut::from(message.as_slice());
        let message = self
            .inner
            .decode(&mut message)?
            .ok_or_else(|| invalid_data(BerError::Truncated))?;
        Ok(Some(LdapRequest { message, controls }))
    }
}

impl Encoder<LdapMsg> for DirectoryCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: LdapMsg, buf: &mut BytesMut) -> io::Result<()> {
        self.inner.encode(msg, buf)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::search::PAGED_RESULTS_OID;
    use ldap3_proto::{
        control::LdapControl,
        proto::{LdapDerefAliases, LdapFilter, LdapOp, LdapSearchRequest},
        LdapSearchScope,
    };
    use pretty_assertions::assert_eq;

    fn encode_integer(value: i64) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        while start < 7
            && ((bytes[start] == 0 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0))
        {
            start += 1;
        }
        bytes[start..].to_vec()
    }

    pub(crate) fn encode_paged_results(size: i64, cookie: &[u8]) -> Vec<u8> {
        let mut content = encode_element(INTEGER, &encode_integer(size));
        content.extend(encode_element(OCTET_STRING, cookie));
        encode_element(SEQUENCE, &content)
    }

    pub(crate) fn paged_control(size: i64, cookie: &[u8]) -> RequestControl {
        RequestControl {
            oid: PAGED_RESULTS_OID.to_string(),
            criticality: false,
            value: Some(encode_paged_results(size, cookie)),
        }
    }

    fn encode_control(control: &RequestControl) -> Vec<u8> {
        let mut content = encode_element(OCTET_STRING, control.oid.as_bytes());
        if control.criticality {
            content.extend(encode_element(BOOLEAN, &[0xff]));
        }
        if let Some(value) = &control.value {
            content.extend(encode_element(OCTET_STRING, value));
        }
        encode_element(SEQUENCE, &content)
    }

    fn search_message(ctrl: Vec<LdapControl>) -> LdapMsg {
        LdapMsg {
            msgid: 7,
            op: LdapOp::SearchRequest(LdapSearchRequest {
                base: "dc=example,dc=com".to_string(),
                scope: LdapSearchScope::Subtree,
                aliases: LdapDerefAliases::Never,
                sizelimit: 0,
                timelimit: 0,
                typesonly: false,
                filter: LdapFilter::Present("objectClass".to_string()),
                attrs: vec![],
            }),
            ctrl,
        }
    }

    /// Encodes `msg` and appends `controls` the way a client puts them on the wire.
    fn frame_with_controls(msg: LdapMsg, controls: &[Vec<u8>]) -> BytesMut {
        let mut plain = BytesMut::new();
        LdapCodec::default().encode(msg, &mut plain).unwrap();
        let (message, _) = next_element(&plain).unwrap();
        let mut content = message.content.to_vec();
        content.extend(encode_element(CONTROLS, &controls.concat()));
        BytesMut::from(encode_element(SEQUENCE, &content).as_slice())
    }

    fn decode_one(mut buf: BytesMut) -> LdapRequest {
        let request = DirectoryCodec::default().decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        request
    }

    #[test]
    fn test_keeps_criticality_of_unknown_controls() {
        let critical = RequestControl {
            oid: "1.2.3.4".to_string(),
            criticality: true,
            value: Some(b"opaque".to_vec()),
        };
        let lenient = RequestControl {
            oid: "1.2.3.5".to_string(),
            criticality: false,
            value: None,
        };
        let request = decode_one(frame_with_controls(
            search_message(vec![]),
            &[encode_control(&critical), encode_control(&lenient)],
        ));
        assert_eq!(request.message.msgid, 7);
        assert!(matches!(request.message.op, LdapOp::SearchRequest(_)));
        assert_eq!(request.controls, vec![critical, lenient]);
    }

    #[test]
    fn test_reads_paged_control_from_ldap3_proto() {
        let request = decode_one({
            let mut buf = BytesMut::new();
            LdapCodec::default()
                .encode(
                    search_message(vec![LdapControl::SimplePagedResults {
                        size: 2,
                        cookie: b"next".to_vec(),
                    }]),
                    &mut buf,
                )
                .unwrap();
            buf
        });
        let [control] = request.controls.as_slice() else {
            panic!("Unexpected controls: {:?}", request.controls);
        };
        assert_eq!(control.oid, PAGED_RESULTS_OID);
        assert_eq!(
            decode_paged_results(control.value.as_deref().unwrap()),
            Ok((2, b"next".to_vec()))
        );
    }

    #[test]
    fn test_malformed_paged_value_still_decodes_the_message() {
        let broken = RequestControl {
            oid: PAGED_RESULTS_OID.to_string(),
            criticality: true,
            value: Some(vec![0x30, 0x03, 0x02, 0x01]),
        };
        let request = decode_one(frame_with_controls(
            search_message(vec![]),
            &[encode_control(&broken)],
        ));
        assert!(matches!(request.message.op, LdapOp::SearchRequest(_)));
        let value = request.controls[0].value.as_deref().unwrap();
        assert_eq!(decode_paged_results(value), Err(BerError::Truncated));
    }

    #[test]
    fn test_malformed_control_is_dropped() {
        let good = paged_control(1, b"");
        let request = decode_one(frame_with_controls(
            search_message(vec![]),
            &[vec![0x30, 0x02, 0x01, 0x01], encode_control(&good)],
        ));
        assert_eq!(request.controls, vec![good]);
    }

    #[test]
    fn test_partial_frames() {
        let mut full = frame_with_controls(search_message(vec![]), &[]);
        let rest = full.split_off(5);
        let mut codec = DirectoryCodec::default();
        assert!(codec.decode(&mut full).unwrap().is_none());
        full.extend_from_slice(&rest);
        let request = codec.decode(&mut full).unwrap().unwrap();
        assert_eq!(request.controls, vec![]);
    }

    #[test]
    fn test_long_lengths() {
        let cookie = vec![0x5a; 300];
        let value = encode_paged_results(-1, &cookie);
        assert_eq!(decode_paged_results(&value), Ok((-1, cookie)));
        assert_eq!(encode_integer(128), vec![0x00, 0x80]);
        assert_eq!(decode_integer(&[0x00, 0x80]), Ok(128));
    }

    #[test]
    fn test_not_a_message() {
        let mut buf = BytesMut::from(&[0x04, 0x01, 0x00][..]);
        assert!(DirectoryCodec::default().decode(&mut buf).is_err());
    }
}
