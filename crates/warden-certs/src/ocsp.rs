//! OCSP request encoding, response parsing and the HTTP client
//!
//! Only what a single-certificate status query needs: a SHA-1 `CertID`,
//! an unsigned request, and the basic response type.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};
use warden_core::config::HttpConfig;
use x509_parser::asn1_rs::{
    oid, Any, BitString, Class, FromDer, Integer, Null, OctetString, Oid, Sequence,
    SerializeError, Tag, ToDer,
};
use x509_parser::num_bigint::{BigInt, BigUint, Sign};
use x509_parser::oid_registry::OID_HASH_SHA1;
use x509_parser::prelude::*;

use crate::crl::normalize_serial;
use crate::error::{CertError, CertResult};
use crate::metrics;

const OID_PKIX_OCSP_BASIC: Oid<'static> = oid!(1.3.6.1.5.5.7.48.1.1);

/// Certificate status reported by a responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspStatus {
    Good,
    Revoked,
    Unknown,
}

impl OcspStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcspStatus::Good => "good",
            OcspStatus::Revoked => "revoked",
            OcspStatus::Unknown => "unknown",
        }
    }
}

// ============================================================================
// CertID
// ============================================================================

/// Identifies one certificate to the responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertId {
    pub name_hash: Vec<u8>,
    pub key_hash: Vec<u8>,
    /// Serial number without leading zero bytes
    pub serial: Vec<u8>,
}

impl CertId {
    pub fn from_certs(cert_der: &[u8], issuer_der: &[u8]) -> CertResult<Self> {
        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| CertError::Parse(format!("invalid certificate: {}", e)))?;
        let (_, issuer) = X509Certificate::from_der(issuer_der)
            .map_err(|e| CertError::Parse(format!("invalid issuer certificate: {}", e)))?;

        Ok(Self::from_parts(
            cert.issuer().as_raw(),
            &issuer.public_key().subject_public_key.data,
            cert.raw_serial(),
        ))
    }

    /// Build from the raw issuer name, issuer key bits and serial
    pub fn from_parts(issuer_name: &[u8], issuer_key: &[u8], serial: &[u8]) -> Self {
        Self {
            name_hash: Sha1::digest(issuer_name).to_vec(),
            key_hash: Sha1::digest(issuer_key).to_vec(),
            serial: normalize_serial(serial).to_vec(),
        }
    }

    pub fn to_der(&self) -> CertResult<Vec<u8>> {
        // INTEGER content is two's complement, so a set high bit gains a zero byte
        let serial = BigInt::from_biguint(Sign::Plus, BigUint::from_bytes_be(&self.serial))
            .to_signed_bytes_be();
        let hash_algorithm = sequence(&[to_der(&OID_HASH_SHA1)?, to_der(&Null::new())?])?;
        sequence(&[
            hash_algorithm,
            to_der(&OctetString::new(&self.name_hash))?,
            to_der(&OctetString::new(&self.key_hash))?,
            to_der(&Integer::new(&serial))?,
        ])
    }

    fn parse(any: Any<'_>) -> CertResult<Self> {
        let mut fields = universal(any, Tag::Sequence, "CertID")?;
        universal(next_element(&mut fields, "hashAlgorithm")?.0, Tag::Sequence, "hashAlgorithm")?;
        let name_hash = universal(
            next_element(&mut fields, "issuerNameHash")?.0,
            Tag::OctetString,
            "issuerNameHash",
        )?;
        let key_hash = universal(
            next_element(&mut fields, "issuerKeyHash")?.0,
            Tag::OctetString,
            "issuerKeyHash",
        )?;
        let serial = universal(
            next_element(&mut fields, "serialNumber")?.0,
            Tag::Integer,
            "serialNumber",
        )?;
        Ok(Self {
            name_hash: name_hash.to_vec(),
            key_hash: key_hash.to_vec(),
            serial: normalize_serial(serial).to_vec(),
        })
    }
}

/// DER `OCSPRequest` for a single certificate, unsigned and without nonce
pub fn encode_request(cert_id: &CertId) -> CertResult<Vec<u8>> {
    let request = sequence(&[cert_id.to_der()?])?;
    let request_list = sequence(&[request])?;
    let tbs_request = sequence(&[request_list])?;
    sequence(&[tbs_request])
}

fn encoding_failed(e: SerializeError) -> CertError {
    CertError::Parse(format!("DER encoding failed: {}", e))
}

fn to_der(value: &impl ToDer) -> CertResult<Vec<u8>> {
    value.to_der_vec().map_err(encoding_failed)
}

/// SEQUENCE over already-encoded elements
pub(crate) fn sequence(parts: &[Vec<u8>]) -> CertResult<Vec<u8>> {
    to_der(&Sequence::new(parts.concat().into()))
}

// ============================================================================
// Decoding helpers
// ============================================================================

fn malformed(what: &str, e: impl Display) -> CertError {
    CertError::Parse(format!("invalid {}: {}", what, e))
}

/// Next element of `input` with its encoded bytes
fn next_element<'a>(input: &mut &'a [u8], what: &str) -> CertResult<(Any<'a>, &'a [u8])> {
    let data = *input;
    let (rest, any) = Any::from_der(data).map_err(|e| malformed(what, e))?;
    *input = rest;
    Ok((any, &data[..data.len() - rest.len()]))
}

/// Content of a universal element carrying `tag`
fn universal<'a>(any: Any<'a>, tag: Tag, what: &str) -> CertResult<&'a [u8]> {
    if any.class() != Class::Universal || any.tag() != tag {
        return Err(CertError::Parse(format!(
            "expected {}, found {:?} tag {}",
            what,
            any.class(),
            any.tag().0
        )));
    }
    Ok(any.as_bytes())
}

fn is_context(any: &Any<'_>, n: u32) -> bool {
    any.class() == Class::ContextSpecific && any.tag() == Tag(n)
}

/// Consume the next element only when it is tagged `[n]`
fn next_context<'a>(input: &mut &'a [u8], n: u32, what: &str) -> CertResult<Option<Any<'a>>> {
    if input.is_empty() {
        return Ok(None);
    }
    let (rest, any) = Any::from_der(*input).map_err(|e| malformed(what, e))?;
    if !is_context(&any, n) {
        return Ok(None);
    }
    *input = rest;
    Ok(Some(any))
}

/// The one element inside `data`
fn single_element<'a>(data: &'a [u8], what: &str) -> CertResult<Any<'a>> {
    let (rest, any) = Any::from_der(data).map_err(|e| malformed(what, e))?;
    if !rest.is_empty() {
        return Err(CertError::Parse(format!("trailing bytes after {}", what)));
    }
    Ok(any)
}

/// Unix seconds of a GeneralizedTime
fn unix_time(any: Any<'_>, what: &str) -> CertResult<i64> {
    any.generalizedtime()
        .and_then(|t| t.utc_datetime())
        .map(|t| t.unix_timestamp())
        .map_err(|e| malformed(what, e))
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub status: OcspStatus,
    /// Unix seconds
    pub next_update: Option<i64>,
}

/// Decoded `BasicOCSPResponse`
#[derive(Debug, Clone)]
pub struct BasicResponse {
    /// Raw `tbsResponseData`, the signed bytes
    pub tbs_raw: Vec<u8>,
    /// Raw `AlgorithmIdentifier`
    pub signature_algorithm: Vec<u8>,
    pub signature: Vec<u8>,
    pub unused_bits: u8,
    pub responses: Vec<SingleResponse>,
}

impl BasicResponse {
    /// Status for `cert_id`; expired or missing answers are `Unknown`
    pub fn status_for(&self, cert_id: &CertId, now: i64) -> OcspStatus {
        self.responses
            .iter()
            .find(|r| &r.cert_id == cert_id)
            .map(|r| match r.next_update {
                Some(next) if next <= now => OcspStatus::Unknown,
                _ => r.status,
            })
            .unwrap_or(OcspStatus::Unknown)
    }
}

fn unknown(msg: impl Into<String>) -> CertError {
    CertError::RevocationStatusUnknown(msg.into())
}

fn parse_single_response(any: Any<'_>) -> CertResult<SingleResponse> {
    let mut fields = universal(any, Tag::Sequence, "SingleResponse")?;
    let cert_id = CertId::parse(next_element(&mut fields, "certID")?.0)?;

    let (cert_status, _) = next_element(&mut fields, "certStatus")?;
    let constructed = cert_status.header.is_constructed();
    let status = match cert_status.tag().0 {
        0 if is_context(&cert_status, 0) && !constructed => OcspStatus::Good,
        1 if is_context(&cert_status, 1) && constructed => OcspStatus::Revoked,
        2 if is_context(&cert_status, 2) && !constructed => OcspStatus::Unknown,
        t => return Err(CertError::Parse(format!("unexpected certStatus tag {}", t))),
    };

    unix_time(next_element(&mut fields, "thisUpdate")?.0, "thisUpdate")?;
    let next_update = match next_context(&mut fields, 0, "nextUpdate")? {
        Some(wrapper) => Some(unix_time(
            single_element(wrapper.as_bytes(), "nextUpdate")?,
            "nextUpdate",
        )?),
        None => None,
    };

    Ok(SingleResponse {
        cert_id,
        status,
        next_update,
    })
}

/// Decode a DER `OCSPResponse`
///
/// A non-successful response status or a non-basic response type yields
/// `RevocationStatusUnknown`.
pub fn parse_response(data: &[u8]) -> CertResult<BasicResponse> {
    let outer = single_element(data, "OCSPResponse")?;
    let mut fields = universal(outer, Tag::Sequence, "OCSPResponse")?;

    let status = next_element(&mut fields, "responseStatus")?
        .0
        .enumerated()
        .map_err(|e| malformed("responseStatus", e))?;
    if status.0 != 0 {
        return Err(unknown(format!("OCSP responder returned status {}", status.0)));
    }

    let wrapper = next_context(&mut fields, 0, "responseBytes")?
        .ok_or_else(|| unknown("OCSP response carries no response bytes"))?;
    let mut response_bytes = universal(
        single_element(wrapper.as_bytes(), "responseBytes")?,
        Tag::Sequence,
        "responseBytes",
    )?;
    let response_type = next_element(&mut response_bytes, "responseType")?
        .0
        .oid()
        .map_err(|e| malformed("responseType", e))?;
    if response_type != OID_PKIX_OCSP_BASIC {
        return Err(unknown(format!(
            "unsupported OCSP response type {}",
            response_type
        )));
    }
    let basic_der = universal(
        next_element(&mut response_bytes, "response")?.0,
        Tag::OctetString,
        "response",
    )?;

    let mut basic = universal(
        single_element(basic_der, "BasicOCSPResponse")?,
        Tag::Sequence,
        "BasicOCSPResponse",
    )?;
    let (tbs, tbs_raw) = next_element(&mut basic, "tbsResponseData")?;
    let (algorithm, algorithm_raw) = next_element(&mut basic, "signatureAlgorithm")?;
    universal(algorithm, Tag::Sequence, "signatureAlgorithm")?;
    let signature = next_element(&mut basic, "signature")?
        .0
        .bitstring()
        .map_err(|e| malformed("signature", e))?;

    let mut tbs_fields = universal(tbs, Tag::Sequence, "tbsResponseData")?;
    next_context(&mut tbs_fields, 0, "version")?;
    let (responder_id, _) = next_element(&mut tbs_fields, "responderID")?;
    if !is_context(&responder_id, 1) && !is_context(&responder_id, 2) {
        return Err(CertError::Parse(format!(
            "unexpected responderID tag {}",
            responder_id.tag().0
        )));
    }
    unix_time(next_element(&mut tbs_fields, "producedAt")?.0, "producedAt")?;

    let mut list = universal(
        next_element(&mut tbs_fields, "responses")?.0,
        Tag::Sequence,
        "responses",
    )?;
    let mut responses = Vec::new();
    while !list.is_empty() {
        responses.push(parse_single_response(next_element(&mut list, "SingleResponse")?.0)?);
    }

    Ok(BasicResponse {
        tbs_raw: tbs_raw.to_vec(),
        signature_algorithm: algorithm_raw.to_vec(),
        signature: signature.data.to_vec(),
        unused_bits: signature.unused_bits,
        responses,
    })
}

/// Check the response signature against `signer_der`
pub fn verify_response(response: &BasicResponse, signer_der: &[u8]) -> CertResult<()> {
    let (_, signer) = X509Certificate::from_der(signer_der)
        .map_err(|e| CertError::Parse(format!("invalid OCSP signing certificate: {}", e)))?;
    let (_, algorithm) = AlgorithmIdentifier::from_der(&response.signature_algorithm)
        .map_err(|e| CertError::Parse(format!("invalid OCSP signature algorithm: {}", e)))?;
    let signature = BitString::new(response.unused_bits, &response.signature);

    x509_parser::verify::verify_signature(
        signer.public_key(),
        &algorithm,
        &signature,
        &response.tbs_raw,
    )
    .map_err(|e| unknown(format!("OCSP response signature does not verify: {}", e)))
}

// ============================================================================
// Client
// ============================================================================

/// One status query
#[derive(Debug, Clone)]
pub struct OcspRequest {
    pub responder: String,
    pub cert_id: CertId,
    /// Certificate whose key signs the responses
    pub signer_der: Vec<u8>,
}

#[async_trait]
pub trait OcspClient: Send + Sync {
    async fn check(&self, request: &OcspRequest) -> CertResult<OcspStatus>;
}

/// Queries responders over HTTP POST
pub struct HttpOcspClient {
    client: reqwest::Client,
}

impl HttpOcspClient {
    pub fn new(config: &HttpConfig) -> CertResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CertError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn query(&self, request: &OcspRequest) -> CertResult<OcspStatus> {
        let body = encode_request(&request.cert_id)?;
        let response = self
            .client
            .post(&request.responder)
            .header(reqwest::header::CONTENT_TYPE, "application/ocsp-request")
            .header(reqwest::header::ACCEPT, "application/ocsp-response")
            .body(body)
            .send()
            .await
            .map_err(|e| unknown(format!("OCSP request to {} failed: {}", request.responder, e)))?;

        if !response.status().is_success() {
            return Err(unknown(format!(
                "OCSP responder {} returned {}",
                request.responder,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| unknown(format!("OCSP read from {} failed: {}", request.responder, e)))?;

        let parsed = parse_response(&bytes)?;
        verify_response(&parsed, &request.signer_der)?;
        Ok(parsed.status_for(&request.cert_id, Utc::now().timestamp()))
    }
}

#[async_trait]
impl OcspClient for HttpOcspClient {
    async fn check(&self, request: &OcspRequest) -> CertResult<OcspStatus> {
        debug!("Querying OCSP responder {}", request.responder);
        let result = self.query(request).await;
        match &result {
            Ok(status) => metrics::record_ocsp(status.as_str()),
            Err(e) => {
                metrics::record_ocsp("error");
                warn!("{}", e);
            }
        }
        result
    }
}
