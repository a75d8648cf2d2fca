// SNMPv3 message framing and the user-based security model.
//
// Key localization and HMAC-96 authentication follow RFC 3414; privacy is
// AES-128 in CFB mode per RFC 3826. Only what a polling manager needs is
// here: discovery, authenticated requests and decrypted responses.

use std::ops::Range;
use std::time::Instant;

use aes::Aes128;
use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use super::ber::{Oid, Pdu, PduKind, Reader, decode_integer, encode_integer, encode_tlv, tag};
use crate::error::Error;

const VERSION_3: i64 = 3;
const USM_SECURITY_MODEL: i64 = 3;
const MAX_MESSAGE_SIZE: i64 = 65_507;

pub(crate) const FLAG_AUTH: u8 = 0x01;
pub(crate) const FLAG_PRIV: u8 = 0x02;
pub(crate) const FLAG_REPORTABLE: u8 = 0x04;

/// Truncated HMAC length carried in `msgAuthenticationParameters`.
const AUTH_PARAMS_LEN: usize = 12;
const SALT_LEN: usize = 8;
const AES_KEY_LEN: usize = 16;

/// Bytes of repeated password hashed into the master key.
const PASSWORD_EXPANSION: usize = 1_048_576;
const MIN_PASSWORD_LEN: usize = 8;

// ── User configuration ───────────────────────────────────────────────

/// Authentication digest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthProtocol {
    Md5,
    Sha1,
}

/// Privacy cipher.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PrivProtocol {
    /// AES-128 in CFB mode.
    Aes,
}

#[derive(Debug, Clone)]
pub struct UsmPrivacy {
    pub protocol: PrivProtocol,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct UsmAuth {
    pub protocol: AuthProtocol,
    pub password: SecretString,
    /// Privacy needs authentication, so it only exists under it.
    pub privacy: Option<UsmPrivacy>,
}

/// A USM principal: noAuthNoPriv without `auth`, authNoPriv or authPriv
/// depending on `auth.privacy`.
#[derive(Debug, Clone)]
pub struct UsmUser {
    pub name: String,
    pub auth: Option<UsmAuth>,
}

impl UsmUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth: None,
        }
    }

    pub fn with_auth(mut self, protocol: AuthProtocol, password: SecretString) -> Self {
        self.auth = Some(UsmAuth {
            protocol,
            password,
            privacy: None,
        });
        self
    }

    /// Ignored unless authentication is configured first.
    pub fn with_privacy(mut self, protocol: PrivProtocol, password: SecretString) -> Self {
        if let Some(auth) = self.auth.as_mut() {
            auth.privacy = Some(UsmPrivacy { protocol, password });
        }
        self
    }

    /// `msgFlags` security bits for this user.
    pub(crate) fn security_flags(&self) -> u8 {
        match &self.auth {
            None => 0,
            Some(UsmAuth { privacy: None, .. }) => FLAG_AUTH,
            Some(UsmAuth {
                privacy: Some(_), ..
            }) => FLAG_AUTH | FLAG_PRIV,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::Authentication {
                message: "SNMPv3 user name must not be empty".into(),
            });
        }
        let Some(auth) = &self.auth else {
            return Ok(());
        };
        let short = |secret: &SecretString| secret.expose_secret().len() < MIN_PASSWORD_LEN;
        if short(&auth.password) || auth.privacy.as_ref().is_some_and(|p| short(&p.password)) {
            return Err(Error::Authentication {
                message: format!("SNMPv3 passwords must be at least {MIN_PASSWORD_LEN} characters"),
            });
        }
        Ok(())
    }
}

// ── Key localization ─────────────────────────────────────────────────

fn password_to_master_key<D: Digest>(password: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    let mut chunk = [0u8; 64];
    let mut cursor = password.iter().cycle();
    for _ in 0..PASSWORD_EXPANSION / chunk.len() {
        for byte in &mut chunk {
            *byte = cursor.next().copied().unwrap_or(0);
        }
        Digest::update(&mut hasher, chunk);
    }
    hasher.finalize().to_vec()
}

fn localize<D: Digest>(master: &[u8], engine_id: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    Digest::update(&mut hasher, master);
    Digest::update(&mut hasher, engine_id);
    Digest::update(&mut hasher, master);
    hasher.finalize().to_vec()
}

/// Derive the key `password` localizes to at `engine_id` (RFC 3414 A.2).
pub fn localized_key(protocol: AuthProtocol, password: &[u8], engine_id: &[u8]) -> Vec<u8> {
    match protocol {
        AuthProtocol::Md5 => localize::<Md5>(&password_to_master_key::<Md5>(password), engine_id),
        AuthProtocol::Sha1 => {
            localize::<Sha1>(&password_to_master_key::<Sha1>(password), engine_id)
        }
    }
}

// ── HMAC-96 ──────────────────────────────────────────────────────────

fn keyed<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<M, Error> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| Error::protocol("invalid authentication key"))?;
    mac.update(data);
    Ok(mac)
}

fn sign(protocol: AuthProtocol, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let full = match protocol {
        AuthProtocol::Md5 => keyed::<Hmac<Md5>>(key, data)?.finalize().into_bytes().to_vec(),
        AuthProtocol::Sha1 => keyed::<Hmac<Sha1>>(key, data)?.finalize().into_bytes().to_vec(),
    };
    full.get(..AUTH_PARAMS_LEN)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::protocol("digest shorter than HMAC-96"))
}

fn verify(protocol: AuthProtocol, key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    if tag.len() != AUTH_PARAMS_LEN {
        return false;
    }
    match protocol {
        AuthProtocol::Md5 => keyed::<Hmac<Md5>>(key, data)
            .is_ok_and(|mac| mac.verify_truncated_left(tag).is_ok()),
        AuthProtocol::Sha1 => keyed::<Hmac<Sha1>>(key, data)
            .is_ok_and(|mac| mac.verify_truncated_left(tag).is_ok()),
    }
}

// ── AES-CFB ──────────────────────────────────────────────────────────

fn aes_iv(boots: u32, time: u32, salt: &[u8]) -> Vec<u8> {
    let mut iv = Vec::with_capacity(16);
    iv.extend_from_slice(&boots.to_be_bytes());
    iv.extend_from_slice(&time.to_be_bytes());
    iv.extend_from_slice(salt);
    iv
}

fn aes_key(key: &[u8]) -> Result<&[u8], Error> {
    key.get(..AES_KEY_LEN)
        .ok_or_else(|| Error::protocol("privacy key too short for AES-128"))
}

fn encrypt(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), Error> {
    cfb_mode::Encryptor::<Aes128>::new_from_slices(aes_key(key)?, iv)
        .map_err(|_| Error::protocol("invalid AES parameters"))?
        .encrypt(data);
    Ok(())
}

fn decrypt(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<(), Error> {
    cfb_mode::Decryptor::<Aes128>::new_from_slices(aes_key(key)?, iv)
        .map_err(|_| Error::protocol("invalid AES parameters"))?
        .decrypt(data);
    Ok(())
}

// ── Message framing ──────────────────────────────────────────────────

/// `UsmSecurityParameters`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityParams {
    pub engine_id: Vec<u8>,
    pub engine_boots: u32,
    pub engine_time: u32,
    pub user_name: Vec<u8>,
    pub auth_params: Vec<u8>,
    pub priv_params: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedPdu {
    pub context_engine_id: Vec<u8>,
    pub context_name: Vec<u8>,
    pub pdu: Pdu,
}

impl ScopedPdu {
    fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        encode_tlv(tag::OCTET_STRING, &self.context_engine_id, &mut body);
        encode_tlv(tag::OCTET_STRING, &self.context_name, &mut body);
        self.pdu.encode(&mut body);
        let mut out = Vec::new();
        encode_tlv(tag::SEQUENCE, &body, &mut out);
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Self::from_content(Reader::new(bytes).expect(tag::SEQUENCE)?)
    }

    fn from_content(content: &[u8]) -> Result<Self, Error> {
        let mut scoped = Reader::new(content);
        Ok(Self {
            context_engine_id: scoped.expect(tag::OCTET_STRING)?.to_vec(),
            context_name: scoped.expect(tag::OCTET_STRING)?.to_vec(),
            pdu: Pdu::decode(&mut scoped)?,
        })
    }
}

/// `msgData`: plaintext under noAuthNoPriv/authNoPriv, ciphertext under
/// authPriv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopedData {
    Plain(ScopedPdu),
    Encrypted(Vec<u8>),
}

/// A v3 message with the USM security model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V3Message {
    pub msg_id: i32,
    pub flags: u8,
    pub security: SecurityParams,
    pub data: ScopedData,
}

fn decode_u32(bytes: &[u8]) -> Result<u32, Error> {
    u32::try_from(decode_integer(bytes)?).map_err(|_| Error::protocol("engine counter out of range"))
}

fn byte_span(whole: &[u8], part: &[u8]) -> Range<usize> {
    let start = part.as_ptr().addr().saturating_sub(whole.as_ptr().addr());
    start..start + part.len()
}

impl V3Message {
    pub fn encode(&self) -> Vec<u8> {
        let mut global = Vec::new();
        encode_integer(tag::INTEGER, i64::from(self.msg_id), &mut global);
        encode_integer(tag::INTEGER, MAX_MESSAGE_SIZE, &mut global);
        encode_tlv(tag::OCTET_STRING, &[self.flags], &mut global);
        encode_integer(tag::INTEGER, USM_SECURITY_MODEL, &mut global);

        let sec = &self.security;
        let mut usm = Vec::new();
        encode_tlv(tag::OCTET_STRING, &sec.engine_id, &mut usm);
        encode_integer(tag::INTEGER, i64::from(sec.engine_boots), &mut usm);
        encode_integer(tag::INTEGER, i64::from(sec.engine_time), &mut usm);
        encode_tlv(tag::OCTET_STRING, &sec.user_name, &mut usm);
        encode_tlv(tag::OCTET_STRING, &sec.auth_params, &mut usm);
        encode_tlv(tag::OCTET_STRING, &sec.priv_params, &mut usm);
        let mut usm_seq = Vec::new();
        encode_tlv(tag::SEQUENCE, &usm, &mut usm_seq);

        let mut body = Vec::new();
        encode_integer(tag::INTEGER, VERSION_3, &mut body);
        encode_tlv(tag::SEQUENCE, &global, &mut body);
        encode_tlv(tag::OCTET_STRING, &usm_seq, &mut body);
        match &self.data {
            ScopedData::Plain(scoped) => body.extend_from_slice(&scoped.encode()),
            ScopedData::Encrypted(bytes) => encode_tlv(tag::OCTET_STRING, bytes, &mut body),
        }

        let mut out = Vec::new();
        encode_tlv(tag::SEQUENCE, &body, &mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Self::decode_with_auth_span(bytes).map(|(message, _)| message)
    }

    /// Decode, also returning where `msgAuthenticationParameters` sits in
    /// `bytes` so the digest can be checked over the original encoding.
    fn decode_with_auth_span(bytes: &[u8]) -> Result<(Self, Range<usize>), Error> {
        let mut outer = Reader::new(bytes);
        let mut msg = Reader::new(outer.expect(tag::SEQUENCE)?);

        if decode_integer(msg.expect(tag::INTEGER)?)? != VERSION_3 {
            return Err(Error::protocol("not an SNMPv3 message"));
        }

        let mut global = Reader::new(msg.expect(tag::SEQUENCE)?);
        let msg_id = i32::try_from(decode_integer(global.expect(tag::INTEGER)?)?)
            .map_err(|_| Error::protocol("message id out of range"))?;
        let _max_size = global.expect(tag::INTEGER)?;
        let flags = match global.expect(tag::OCTET_STRING)? {
            [flags] => *flags,
            _ => return Err(Error::protocol("msgFlags must be one octet")),
        };
        if decode_integer(global.expect(tag::INTEGER)?)? != USM_SECURITY_MODEL {
            return Err(Error::protocol("unsupported security model"));
        }

        let mut usm_outer = Reader::new(msg.expect(tag::OCTET_STRING)?);
        let mut usm = Reader::new(usm_outer.expect(tag::SEQUENCE)?);
        let engine_id = usm.expect(tag::OCTET_STRING)?.to_vec();
        let engine_boots = decode_u32(usm.expect(tag::INTEGER)?)?;
        let engine_time = decode_u32(usm.expect(tag::INTEGER)?)?;
        let user_name = usm.expect(tag::OCTET_STRING)?.to_vec();
        let auth_slice = usm.expect(tag::OCTET_STRING)?;
        let priv_params = usm.expect(tag::OCTET_STRING)?.to_vec();

        let data = if flags & FLAG_PRIV == 0 {
            let (data_tag, content) = msg.read_tlv()?;
            if data_tag != tag::SEQUENCE {
                return Err(Error::protocol("expected a plaintext scoped PDU"));
            }
            ScopedData::Plain(ScopedPdu::from_content(content)?)
        } else {
            ScopedData::Encrypted(msg.expect(tag::OCTET_STRING)?.to_vec())
        };

        let message = Self {
            msg_id,
            flags,
            security: SecurityParams {
                engine_id,
                engine_boots,
                engine_time,
                user_name,
                auth_params: auth_slice.to_vec(),
                priv_params,
            },
            data,
        };
        Ok((message, byte_span(bytes, auth_slice)))
    }
}

// ── Session state ────────────────────────────────────────────────────

/// Why a v3 agent sent a report instead of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReportReason {
    UnsupportedSecurityLevel,
    NotInTimeWindow,
    UnknownUserName,
    UnknownEngineId,
    WrongDigest,
    DecryptionError,
    Other,
}

impl ReportReason {
    pub(crate) fn of(pdu: &Pdu) -> Self {
        // usmStats counters live under 1.3.6.1.6.3.15.1.1.<n>.0
        const USM_STATS: [u32; 9] = [1, 3, 6, 1, 6, 3, 15, 1, 1];
        let Some((oid, _)) = pdu.varbinds.first() else {
            return Self::Other;
        };
        match oid.suffix(&Oid::from_slice(&USM_STATS)) {
            Some([1, 0]) => Self::UnsupportedSecurityLevel,
            Some([2, 0]) => Self::NotInTimeWindow,
            Some([3, 0]) => Self::UnknownUserName,
            Some([4, 0]) => Self::UnknownEngineId,
            Some([5, 0]) => Self::WrongDigest,
            Some([6, 0]) => Self::DecryptionError,
            _ => Self::Other,
        }
    }

    pub(crate) fn describe(self) -> &'static str {
        match self {
            Self::UnsupportedSecurityLevel => "agent does not support this security level",
            Self::NotInTimeWindow => "message outside the agent's time window",
            Self::UnknownUserName => "unknown SNMPv3 user",
            Self::UnknownEngineId => "unknown engine id",
            Self::WrongDigest => "authentication digest rejected",
            Self::DecryptionError => "agent could not decrypt the request",
            Self::Other => "agent sent an unexpected report",
        }
    }
}

struct Engine {
    id: Vec<u8>,
    boots: u32,
    time: u32,
    synced: Instant,
    auth_key: Option<SecretSlice<u8>>,
    priv_key: Option<SecretSlice<u8>>,
}

impl Engine {
    fn now(&self) -> u32 {
        let elapsed = u32::try_from(self.synced.elapsed().as_secs()).unwrap_or(u32::MAX);
        self.time.saturating_add(elapsed)
    }
}

/// What came back for one request.
pub(crate) struct Inbound {
    pub security: SecurityParams,
    pub pdu: Pdu,
}

/// Per-agent USM state: the user, the discovered engine and its keys.
pub(crate) struct UsmSession {
    user: UsmUser,
    engine: Option<Engine>,
    salt: u64,
}

impl UsmSession {
    pub(crate) fn new(user: UsmUser) -> Result<Self, Error> {
        user.validate()?;
        Ok(Self {
            user,
            engine: None,
            salt: rand::random(),
        })
    }

    pub(crate) fn is_discovered(&self) -> bool {
        self.engine.is_some()
    }

    /// Empty unauthenticated GET that makes the agent reveal its engine.
    pub(crate) fn discovery_request(msg_id: i32) -> Vec<u8> {
        V3Message {
            msg_id,
            flags: FLAG_REPORTABLE,
            security: SecurityParams::default(),
            data: ScopedData::Plain(ScopedPdu {
                context_engine_id: Vec::new(),
                context_name: Vec::new(),
                pdu: Pdu {
                    kind: PduKind::GetRequest,
                    request_id: msg_id,
                    error_status: 0,
                    error_index: 0,
                    varbinds: Vec::new(),
                },
            }),
        }
        .encode()
    }

    /// Adopt the engine a discovery report advertised and localize keys.
    pub(crate) fn learn_engine(&mut self, security: &SecurityParams) -> Result<(), Error> {
        if security.engine_id.is_empty() {
            return Err(Error::protocol("discovery report carried no engine id"));
        }
        let (auth_key, priv_key) = match &self.user.auth {
            None => (None, None),
            Some(auth) => {
                let key = |password: &SecretString| {
                    SecretSlice::from(localized_key(
                        auth.protocol,
                        password.expose_secret().as_bytes(),
                        &security.engine_id,
                    ))
                };
                (
                    Some(key(&auth.password)),
                    auth.privacy.as_ref().map(|p| key(&p.password)),
                )
            }
        };
        self.engine = Some(Engine {
            id: security.engine_id.clone(),
            boots: security.engine_boots,
            time: security.engine_time,
            synced: Instant::now(),
            auth_key,
            priv_key,
        });
        Ok(())
    }

    /// Take the agent's clock from an authenticated report.
    pub(crate) fn resync(&mut self, security: &SecurityParams) {
        if let Some(engine) = self.engine.as_mut() {
            engine.boots = security.engine_boots;
            engine.time = security.engine_time;
            engine.synced = Instant::now();
        }
    }

    /// Build an outgoing request for the discovered engine.
    pub(crate) fn seal(&mut self, msg_id: i32, pdu: Pdu) -> Result<Vec<u8>, Error> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| Error::protocol("SNMPv3 engine not discovered"))?;
        let flags = self.user.security_flags();
        let boots = engine.boots;
        let time = engine.now();

        let scoped = ScopedPdu {
            context_engine_id: engine.id.clone(),
            context_name: Vec::new(),
            pdu,
        };

        let mut security = SecurityParams {
            engine_id: engine.id.clone(),
            engine_boots: boots,
            engine_time: time,
            user_name: self.user.name.as_bytes().to_vec(),
            auth_params: Vec::new(),
            priv_params: Vec::new(),
        };

        let data = match &engine.priv_key {
            Some(key) if flags & FLAG_PRIV != 0 => {
                self.salt = self.salt.wrapping_add(1);
                let salt = self.salt.to_be_bytes();
                let mut payload = scoped.encode();
                encrypt(key.expose_secret(), &aes_iv(boots, time, &salt), &mut payload)?;
                security.priv_params = salt.to_vec();
                ScopedData::Encrypted(payload)
            }
            _ => ScopedData::Plain(scoped),
        };

        let mut message = V3Message {
            msg_id,
            flags: flags | FLAG_REPORTABLE,
            security,
            data,
        };

        let (Some(auth), Some(key)) = (&self.user.auth, &engine.auth_key) else {
            return Ok(message.encode());
        };
        message.security.auth_params = vec![0; AUTH_PARAMS_LEN];
        let digest = sign(auth.protocol, key.expose_secret(), &message.encode())?;
        message.security.auth_params = digest;
        Ok(message.encode())
    }

    /// Decode a datagram answering `msg_id`: check its digest and decrypt
    /// it. `Ok(None)` means the datagram belongs to another request.
    pub(crate) fn open(&self, raw: &[u8], msg_id: i32) -> Result<Option<Inbound>, Error> {
        let (message, auth_span) = V3Message::decode_with_auth_span(raw)?;
        if message.msg_id != msg_id {
            return Ok(None);
        }

        // Only reports may come back below the requested security level.
        if self.user.auth.is_some()
            && message.flags & FLAG_AUTH == 0
            && !is_report(&message.data)
        {
            return Err(Error::protocol("unauthenticated reply to an authenticated request"));
        }

        let engine = self.engine.as_ref();
        if message.flags & FLAG_AUTH != 0 {
            let (Some(auth), Some(key)) = (&self.user.auth, engine.and_then(|e| e.auth_key.as_ref()))
            else {
                return Err(Error::protocol("authenticated reply to an unauthenticated request"));
            };
            let mut zeroed = raw.to_vec();
            let span = zeroed
                .get_mut(auth_span)
                .ok_or_else(|| Error::protocol("authentication parameters out of bounds"))?;
            span.fill(0);
            if !verify(auth.protocol, key.expose_secret(), &zeroed, &message.security.auth_params)
            {
                return Err(Error::protocol("reply failed authentication"));
            }
        }

        let scoped = match message.data {
            ScopedData::Plain(scoped) => scoped,
            ScopedData::Encrypted(mut payload) => {
                let key = engine
                    .and_then(|e| e.priv_key.as_ref())
                    .ok_or_else(|| Error::protocol("encrypted reply without a privacy key"))?;
                let sec = &message.security;
                if sec.priv_params.len() != SALT_LEN {
                    return Err(Error::protocol("privacy parameters must be 8 octets"));
                }
                let iv = aes_iv(sec.engine_boots, sec.engine_time, &sec.priv_params);
                decrypt(key.expose_secret(), &iv, &mut payload)?;
                ScopedPdu::decode(&payload)?
            }
        };

        Ok(Some(Inbound {
            security: message.security,
            pdu: scoped.pdu,
        }))
    }
}

fn is_report(data: &ScopedData) -> bool {
    matches!(data, ScopedData::Plain(scoped) if scoped.pdu.kind == PduKind::Report)
}
