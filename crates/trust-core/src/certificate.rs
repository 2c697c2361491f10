//! Deterministic CBOR certificate codec.
//!
//! `Certificate = [TBSCertificate, signature]`
//! `TBSCertificate = [serial, issuer, [not_before, not_after], subject, tags, pubkey]`
//! `StereotypeTags = [device_class]`

use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{PublicKeyBytes, SignatureBytes};
use crate::eui64::Eui64;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("cbor encode error: {0}")]
    Encode(String),
    #[error("cbor decode error: {0}")]
    Decode(String),
    #[error("wrong array arity: expected {expected}, got {actual}")]
    WrongArity { expected: usize, actual: usize },
    #[error("device class {0} outside 1..=5")]
    InvalidDeviceClass(u8),
    #[error("trailing bytes after certificate")]
    TrailingBytes,
    #[error("encoding exceeds length bound of {0} bytes")]
    TooLarge(usize),
}

/// Maximum encoded certificate size; encoding beyond this is rejected.
pub const MAX_CERTIFICATE_BYTES: usize = 512;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StereotypeTags {
    pub device_class: u8,
}

impl StereotypeTags {
    pub fn new(device_class: u8) -> Result<Self, CertificateError> {
        if !(1..=5).contains(&device_class) {
            return Err(CertificateError::InvalidDeviceClass(device_class));
        }
        Ok(Self { device_class })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TbsCertificate {
    pub serial: u32,
    pub issuer: Eui64,
    pub not_before: u32,
    pub not_after: u32,
    pub subject: Eui64,
    pub tags: StereotypeTags,
    pub pubkey: PublicKeyBytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    pub tbs: TbsCertificate,
    pub signature: SignatureBytes,
}

fn encode_tbs(tbs: &TbsCertificate) -> Result<Vec<u8>, CertificateError> {
    let value = Value::Array(vec![
        Value::Integer(tbs.serial.into()),
        Value::Bytes(tbs.issuer.as_bytes().to_vec()),
        Value::Array(vec![
            Value::Integer(tbs.not_before.into()),
            Value::Integer(tbs.not_after.into()),
        ]),
        Value::Bytes(tbs.subject.as_bytes().to_vec()),
        Value::Array(vec![Value::Integer(tbs.tags.device_class.into())]),
        Value::Bytes(tbs.pubkey.to_vec()),
    ]);

    let mut out = Vec::new();
    ciborium::ser::into_writer(&value, &mut out).map_err(|e| CertificateError::Encode(e.to_string()))?;
    Ok(out)
}

/// Encodes the bytes that the issuer's signature covers: exactly the
/// re-encoded TBS, never the as-received slice.
pub fn tbs_signing_bytes(tbs: &TbsCertificate) -> Result<Vec<u8>, CertificateError> {
    encode_tbs(tbs)
}

pub fn encode_certificate(cert: &Certificate) -> Result<Vec<u8>, CertificateError> {
    let tbs_bytes = encode_tbs(&cert.tbs)?;
    let tbs_value: Value =
        ciborium::de::from_reader(tbs_bytes.as_slice()).map_err(|e| CertificateError::Decode(e.to_string()))?;

    let value = Value::Array(vec![tbs_value, Value::Bytes(cert.signature.to_vec())]);

    let mut out = Vec::new();
    ciborium::ser::into_writer(&value, &mut out).map_err(|e| CertificateError::Encode(e.to_string()))?;

    if out.len() > MAX_CERTIFICATE_BYTES {
        return Err(CertificateError::TooLarge(out.len()));
    }

    Ok(out)
}

fn get_array(value: Value) -> Result<Vec<Value>, CertificateError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(CertificateError::Decode(format!("expected array, got {other:?}"))),
    }
}

fn get_u32(value: &Value) -> Result<u32, CertificateError> {
    value
        .as_integer()
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| CertificateError::Decode("expected u32".into()))
}

fn get_bytes_exact<const N: usize>(value: &Value) -> Result<[u8; N], CertificateError> {
    let bytes = value
        .as_bytes()
        .ok_or_else(|| CertificateError::Decode("expected bytes".into()))?;
    if bytes.len() != N {
        return Err(CertificateError::Decode(format!(
            "expected {N} bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn decode_tbs(items: Vec<Value>) -> Result<TbsCertificate, CertificateError> {
    if items.len() != 6 {
        return Err(CertificateError::WrongArity {
            expected: 6,
            actual: items.len(),
        });
    }
    let mut it = items.into_iter();
    let serial = get_u32(&it.next().unwrap())?;
    let issuer = Eui64::from_bytes(get_bytes_exact(&it.next().unwrap())?);

    let validity = get_array(it.next().unwrap())?;
    if validity.len() != 2 {
        return Err(CertificateError::WrongArity {
            expected: 2,
            actual: validity.len(),
        });
    }
    let not_before = get_u32(&validity[0])?;
    let not_after = get_u32(&validity[1])?;

    let subject = Eui64::from_bytes(get_bytes_exact(&it.next().unwrap())?);

    let tags = get_array(it.next().unwrap())?;
    if tags.len() != 1 {
        return Err(CertificateError::WrongArity {
            expected: 1,
            actual: tags.len(),
        });
    }
    let device_class = tags[0]
        .as_integer()
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| CertificateError::Decode("expected u8 device class".into()))?;
    let tags = StereotypeTags::new(device_class)?;

    let pubkey = get_bytes_exact(&it.next().unwrap())?;

    Ok(TbsCertificate {
        serial,
        issuer,
        not_before,
        not_after,
        subject,
        tags,
        pubkey,
    })
}

pub fn decode_certificate(bytes: &[u8]) -> Result<Certificate, CertificateError> {
    let mut cursor = bytes;
    let value: Value =
        ciborium::de::from_reader(&mut cursor).map_err(|e| CertificateError::Decode(e.to_string()))?;

    if !cursor.is_empty() {
        return Err(CertificateError::TrailingBytes);
    }

    let outer = get_array(value)?;
    if outer.len() != 2 {
        return Err(CertificateError::WrongArity {
            expected: 2,
            actual: outer.len(),
        });
    }
    let mut it = outer.into_iter();
    let tbs_value = it.next().unwrap();
    let tbs_items = get_array(tbs_value)?;
    let tbs = decode_tbs(tbs_items)?;

    let signature = get_bytes_exact(&it.next().unwrap())?;

    Ok(Certificate { tbs, signature })
}
