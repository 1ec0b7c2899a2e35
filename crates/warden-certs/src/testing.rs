//! Test PKI built with rcgen

use base64::Engine;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateRevocationListParams,
    CrlDistributionPoint, CustomExtension, DnType, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose,
    RevocationReason, RevokedCertParams, SerialNumber,
};
use std::str::FromStr;

use ::time::{Duration, OffsetDateTime};
use x509_parser::asn1_rs::{Any, Class, Header, Length, Oid, Tag, ToDer};
use x509_parser::oid_registry::OID_PKIX_ACCESS_DESCRIPTOR_OCSP;
use x509_parser::prelude::*;

use crate::ocsp::sequence;

pub const CRL_URL: &str = "http://crl.acme.local/root.crl";
pub const OCSP_URL: &str = "http://ocsp.acme.local";
/// Where intermediates point for the root's CRL
pub const CA_CRL_URL: &str = "http://crl.acme.local/ca.crl";

/// Issuing certificate with its key
pub struct Ca {
    pub cert: Certificate,
    pub key: KeyPair,
    pub der: Vec<u8>,
}

impl Ca {
    pub fn subject_raw(&self) -> Vec<u8> {
        let (_, cert) = X509Certificate::from_der(&self.der).unwrap();
        cert.subject().as_raw().to_vec()
    }
}

fn ca_params(cn: &str, is_ca: bool) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, cn);
    params.distinguished_name.push(DnType::OrganizationName, "Acme");
    if is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
    } else {
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::CrlSign];
    }
    params
}

/// Self-signed issuer; with `is_ca` unset it lacks CA basic constraints
pub fn self_signed(cn: &str, is_ca: bool) -> Ca {
    let key = KeyPair::generate().unwrap();
    let cert = ca_params(cn, is_ca).self_signed(&key).unwrap();
    let der = cert.der().to_vec();
    Ca { cert, key, der }
}

/// A root CA named "Acme Root CA"
pub struct Pki {
    pub root: Ca,
}

impl Pki {
    pub fn new() -> Self {
        Self {
            root: self_signed("Acme Root CA", true),
        }
    }

    pub fn intermediate(&self, cn: &str) -> Ca {
        self.intermediate_with(cn, &[0x20, 0x00], &[])
    }

    pub fn intermediate_with(&self, cn: &str, serial: &[u8], crl_urls: &[&str]) -> Ca {
        let key = KeyPair::generate().unwrap();
        let mut params = ca_params(cn, true);
        params.serial_number = Some(SerialNumber::from_slice(serial));
        if !crl_urls.is_empty() {
            params.crl_distribution_points = vec![CrlDistributionPoint {
                uris: crl_urls.iter().map(|u| u.to_string()).collect(),
            }];
        }
        let cert = params
            .signed_by(&key, &self.root.cert, &self.root.key)
            .unwrap();
        let der = cert.der().to_vec();
        Ca { cert, key, der }
    }

    pub fn leaf(&self, spec: &LeafSpec) -> Vec<u8> {
        issue_leaf(&self.root, spec)
    }
}

/// Leaf certificate contents
pub struct LeafSpec {
    pub cn: String,
    pub serial: Vec<u8>,
    pub crl_urls: Vec<String>,
    pub ocsp_url: Option<String>,
    pub policy_oids: Vec<String>,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Default for LeafSpec {
    fn default() -> Self {
        Self {
            cn: "jdoe".into(),
            serial: vec![0x10, 0x01],
            crl_urls: vec![CRL_URL.into()],
            ocsp_url: Some(OCSP_URL.into()),
            policy_oids: Vec::new(),
            not_before: days_from_now(-1),
            not_after: days_from_now(30),
        }
    }
}

pub fn issue_leaf(issuer: &Ca, spec: &LeafSpec) -> Vec<u8> {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, spec.cn.as_str());
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.serial_number = Some(SerialNumber::from_slice(&spec.serial));
    params.not_before = spec.not_before;
    params.not_after = spec.not_after;

    if !spec.crl_urls.is_empty() {
        params.crl_distribution_points = vec![CrlDistributionPoint {
            uris: spec.crl_urls.clone(),
        }];
    }

    if !spec.policy_oids.is_empty() {
        let policies = spec
            .policy_oids
            .iter()
            .map(|oid| {
                let oid = Oid::from_str(oid).unwrap().to_der_vec().unwrap();
                sequence(&[oid]).unwrap()
            })
            .collect::<Vec<_>>();
        params.custom_extensions.push(CustomExtension::from_oid_content(
            &[2, 5, 29, 32],
            sequence(&policies).unwrap(),
        ));
    }

    if let Some(url) = &spec.ocsp_url {
        // uniformResourceIdentifier [6] IA5String
        let access = sequence(&[
            OID_PKIX_ACCESS_DESCRIPTOR_OCSP.to_der_vec().unwrap(),
            context_tagged(6, false, url.as_bytes()),
        ])
        .unwrap();
        params.custom_extensions.push(CustomExtension::from_oid_content(
            &[1, 3, 6, 1, 5, 5, 7, 1, 1],
            sequence(&[access]).unwrap(),
        ));
    }

    params
        .signed_by(&key, &issuer.cert, &issuer.key)
        .unwrap()
        .der()
        .to_vec()
}

pub fn crl_der(
    issuer: &Ca,
    revoked: &[&[u8]],
    this_update: OffsetDateTime,
    next_update: OffsetDateTime,
) -> Vec<u8> {
    let revoked_certs = revoked
        .iter()
        .map(|serial| RevokedCertParams {
            serial_number: SerialNumber::from_slice(serial),
            revocation_time: this_update,
            reason_code: Some(RevocationReason::KeyCompromise),
            invalidity_date: None,
        })
        .collect();

    let params = CertificateRevocationListParams {
        this_update,
        next_update,
        crl_number: SerialNumber::from_slice(&[1]),
        issuing_distribution_point: None,
        revoked_certs,
        key_identifier_method: KeyIdMethod::Sha256,
    };
    params
        .signed_by(&issuer.cert, &issuer.key)
        .unwrap()
        .der()
        .to_vec()
}

/// DER of `content` under the context tag `[n]`
pub fn context_tagged(n: u32, constructed: bool, content: &[u8]) -> Vec<u8> {
    let header = Header::new(
        Class::ContextSpecific,
        constructed,
        Tag(n),
        Length::Definite(content.len()),
    );
    Any::new(header, content).to_der_vec().unwrap()
}

pub fn days_from_now(days: i64) -> OffsetDateTime {
    OffsetDateTime::now_utc() + Duration::days(days)
}

pub fn pem_wrap(label: &str, der: &[u8]) -> String {
    let body = base64::engine::general_purpose::STANDARD.encode(der);
    let lines = body
        .as_bytes()
        .chunks(64)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    format!("-----BEGIN {label}-----\n{lines}\n-----END {label}-----\n")
}
