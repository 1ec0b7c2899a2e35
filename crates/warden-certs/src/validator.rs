//! Client-certificate path validation with CRL and OCSP revocation checks
//!
//! Validation runs in three stages: path building to a trust anchor, the
//! certificate-policy allowlist, and revocation of every certificate on the
//! path below the anchor, leaf first. Everything the revocation stage needs
//! is copied out of the parsed chain before the first network call.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use warden_core::config::{CertPolicy, HttpConfig, TenantConfig};
use warden_core::normalize_tenant;
use x509_parser::prelude::*;

use crate::crl::{parse_crl, CachedCrl, CrlCache, CrlCacheManager, CrlFetcher, SchemeCrlFetcher};
use crate::error::{CertError, CertResult};
use crate::metrics;
use crate::ocsp::{CertId, HttpOcspClient, OcspClient, OcspRequest, OcspStatus};
use crate::trust::{load_pem_certificate, TrustStore};

/// Longest accepted path, leaf included
pub const MAX_PATH_DEPTH: usize = 8;

const ID_AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";

/// One certificate on the path, with the issuer that signed it
#[derive(Debug, Clone)]
struct RevocationTarget {
    subject: String,
    serial: Vec<u8>,
    cert_der: Vec<u8>,
    issuer_der: Vec<u8>,
    /// Raw DER of the certificate's issuer name
    issuer_name: Vec<u8>,
    crl_urls: Vec<String>,
    ocsp_urls: Vec<String>,
}

impl RevocationTarget {
    fn new(cert_der: &[u8], cert: &X509Certificate<'_>, issuer_der: &[u8]) -> Self {
        let (crl_urls, ocsp_urls) = distribution_points(cert);
        Self {
            subject: cert.subject().to_string(),
            serial: cert.raw_serial().to_vec(),
            cert_der: cert_der.to_vec(),
            issuer_der: issuer_der.to_vec(),
            issuer_name: cert.issuer().as_raw().to_vec(),
            crl_urls,
            ocsp_urls,
        }
    }
}

fn invalid(msg: impl Into<String>) -> CertError {
    CertError::CertValidation(msg.into())
}

fn parse_cert(der: &[u8]) -> CertResult<X509Certificate<'_>> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| invalid(format!("malformed certificate: {}", e)))
}

fn check_validity(cert: &X509Certificate<'_>, now: i64) -> CertResult<()> {
    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();
    if now < not_before {
        return Err(invalid(format!("certificate {} is not yet valid", cert.subject())));
    }
    if now > not_after {
        return Err(invalid(format!("certificate {} has expired", cert.subject())));
    }
    Ok(())
}

/// Whether `issuer` signed `cert`
fn issued_by(cert: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
    cert.issuer().as_raw() == issuer.subject().as_raw()
        && cert.verify_signature(Some(issuer.public_key())).is_ok()
}

fn check_ca(issuer: &X509Certificate<'_>) -> CertResult<()> {
    match issuer.basic_constraints() {
        Ok(Some(bc)) if bc.value.ca => {}
        _ => {
            return Err(invalid(format!(
                "issuer {} is not a certificate authority",
                issuer.subject()
            )))
        }
    }
    if let Ok(Some(usage)) = issuer.key_usage() {
        if !usage.value.key_cert_sign() {
            return Err(invalid(format!(
                "issuer {} may not sign certificates",
                issuer.subject()
            )));
        }
    }
    Ok(())
}

fn policy_oids(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut oids = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::CertificatePolicies(policies) = ext.parsed_extension() {
            oids.extend(policies.iter().map(|p| p.policy_id.to_id_string()));
        }
    }
    oids
}

fn distribution_points(cert: &X509Certificate<'_>) -> (Vec<String>, Vec<String>) {
    let mut crl_urls = Vec::new();
    let mut ocsp_urls = Vec::new();
    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::CRLDistributionPoints(points) => {
                for point in points.iter() {
                    if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                        for name in names {
                            if let GeneralName::URI(uri) = name {
                                crl_urls.push(uri.to_string());
                            }
                        }
                    }
                }
            }
            ParsedExtension::AuthorityInfoAccess(aia) => {
                for desc in &aia.accessdescs {
                    if desc.access_method.to_id_string() == ID_AD_OCSP {
                        if let GeneralName::URI(uri) = &desc.access_location {
                            ocsp_urls.push(uri.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }
    (crl_urls, ocsp_urls)
}

// ============================================================================
// Validator
// ============================================================================

/// Validates client certificate chains for one tenant
pub struct CertPathValidator {
    tenant: String,
    trust: TrustStore,
    crl_cache: Arc<CrlCache>,
    crl_fetcher: Arc<dyn CrlFetcher>,
    ocsp: Arc<dyn OcspClient>,
}

impl CertPathValidator {
    pub fn new(
        tenant: &str,
        trust: TrustStore,
        crl_cache: Arc<CrlCache>,
        crl_fetcher: Arc<dyn CrlFetcher>,
        ocsp: Arc<dyn OcspClient>,
    ) -> Self {
        Self {
            tenant: normalize_tenant(tenant),
            trust,
            crl_cache,
            crl_fetcher,
            ocsp,
        }
    }

    /// Validator using the tenant's trust anchors, its CRL cache and network revocation clients
    pub fn for_tenant(
        tenant: &TenantConfig,
        caches: &CrlCacheManager,
        http: &HttpConfig,
    ) -> CertResult<Self> {
        let trust = TrustStore::from_pem_files(&tenant.trust_anchors)?;
        info!(
            "Loaded {} trust anchors for tenant {}",
            trust.len(),
            tenant.name
        );
        Ok(Self::new(
            &tenant.name,
            trust,
            caches.create_cache(&tenant.name),
            Arc::new(SchemeCrlFetcher::for_config(http)?),
            Arc::new(HttpOcspClient::new(http)?),
        ))
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn trust(&self) -> &TrustStore {
        &self.trust
    }

    pub fn crl_cache(&self) -> &Arc<CrlCache> {
        &self.crl_cache
    }

    /// Validate `chain`, leaf first, followed by any intermediates
    ///
    /// Fails with exactly one of `CertValidation`, `Revoked` or
    /// `RevocationStatusUnknown`.
    pub async fn validate(&self, chain: &[Vec<u8>], policy: &CertPolicy) -> CertResult<()> {
        let result = self.run(chain, policy).await;
        metrics::record_validation(
            &self.tenant,
            match &result {
                Ok(()) => "ok",
                Err(e) => e.code(),
            },
        );
        if let Err(e) = &result {
            warn!("Certificate rejected for tenant {}: {}", self.tenant, e);
        }
        result
    }

    async fn run(&self, chain: &[Vec<u8>], policy: &CertPolicy) -> CertResult<()> {
        let now = Utc::now().timestamp();
        let path = self.check_path(chain, policy, now)?;

        if !policy.revocation_check_enabled {
            debug!("Revocation checking disabled for tenant {}", self.tenant);
            return Ok(());
        }
        for target in &path {
            self.check_revocation(target, policy, now).await?;
        }

        if let Some(leaf) = path.first() {
            debug!("Certificate {} accepted", leaf.subject);
        }
        Ok(())
    }

    // ========================================================================
    // Path and policy
    // ========================================================================

    /// The path below the anchor, leaf first
    fn check_path(
        &self,
        chain: &[Vec<u8>],
        policy: &CertPolicy,
        now: i64,
    ) -> CertResult<Vec<RevocationTarget>> {
        let (leaf_der, rest) = chain
            .split_first()
            .ok_or_else(|| invalid("empty certificate chain"))?;
        if self.trust.is_empty() {
            return Err(invalid(format!(
                "no trust anchors configured for tenant {}",
                self.tenant
            )));
        }

        let leaf = parse_cert(leaf_der)?;
        let intermediates = rest
            .iter()
            .map(|der| parse_cert(der).map(|cert| (der.as_slice(), cert)))
            .collect::<CertResult<Vec<_>>>()?;
        let anchors = self
            .trust
            .anchors()
            .iter()
            .map(|der| parse_cert(der).map(|cert| (der.as_slice(), cert)))
            .collect::<CertResult<Vec<_>>>()?;

        check_validity(&leaf, now)?;

        let mut used = vec![false; intermediates.len()];
        let mut current: (&[u8], &X509Certificate<'_>) = (leaf_der.as_slice(), &leaf);
        let mut path = Vec::new();
        let mut anchored = false;

        for _ in 0..MAX_PATH_DEPTH {
            if let Some((der, anchor)) = anchors.iter().find(|(_, a)| issued_by(current.1, a)) {
                check_ca(anchor)?;
                check_validity(anchor, now)?;
                path.push(RevocationTarget::new(current.0, current.1, der));
                anchored = true;
                break;
            }

            let next = intermediates
                .iter()
                .enumerate()
                .find(|(i, (_, cert))| !used[*i] && issued_by(current.1, cert));
            let Some((index, (der, issuer))) = next else {
                return Err(invalid(format!(
                    "no path from {} to a trust anchor",
                    leaf.subject()
                )));
            };

            check_ca(issuer)?;
            check_validity(issuer, now)?;
            used[index] = true;
            path.push(RevocationTarget::new(current.0, current.1, der));
            current = (*der, issuer);
        }

        if !anchored {
            return Err(invalid(format!(
                "certificate path exceeds {} certificates",
                MAX_PATH_DEPTH
            )));
        }

        if !policy.allowed_policy_oids.is_empty() {
            let oids = policy_oids(&leaf);
            if !oids.iter().any(|oid| policy.allowed_policy_oids.contains(oid)) {
                return Err(invalid(format!(
                    "certificate {} carries no allowed policy OID",
                    leaf.subject()
                )));
            }
        }

        Ok(path)
    }

    // ========================================================================
    // Revocation
    // ========================================================================

    async fn check_revocation(
        &self,
        target: &RevocationTarget,
        policy: &CertPolicy,
        now: i64,
    ) -> CertResult<()> {
        // Revocation enabled with no mechanism selected still checks the CRL
        let mut run_crl = policy.use_crl || !policy.use_ocsp;

        if policy.use_ocsp {
            match self.check_ocsp(target, policy).await {
                Ok(OcspStatus::Revoked) => {
                    return Err(CertError::Revoked(format!(
                        "OCSP reports {} as revoked",
                        target.subject
                    )))
                }
                Ok(OcspStatus::Good) => {
                    if !policy.use_crl {
                        return Ok(());
                    }
                }
                outcome => {
                    let reason = match outcome {
                        Err(e) => e.to_string(),
                        _ => format!("OCSP status of {} is unknown", target.subject),
                    };
                    if policy.use_crl || policy.use_crl_as_failover {
                        info!("{}; falling back to CRL", reason);
                        run_crl = true;
                    } else {
                        return Err(CertError::RevocationStatusUnknown(reason));
                    }
                }
            }
        }

        if run_crl {
            self.check_crl(target, policy, now).await
        } else {
            Ok(())
        }
    }

    async fn check_ocsp(
        &self,
        target: &RevocationTarget,
        policy: &CertPolicy,
    ) -> CertResult<OcspStatus> {
        let responder = policy
            .ocsp_url
            .clone()
            .or_else(|| target.ocsp_urls.first().cloned())
            .ok_or_else(|| {
                CertError::RevocationStatusUnknown(format!(
                    "no OCSP responder for {}",
                    target.subject
                ))
            })?;

        let signer_der = match &policy.ocsp_signing_cert {
            Some(path) => load_pem_certificate(path)?,
            None => target.issuer_der.clone(),
        };

        let request = OcspRequest {
            responder,
            cert_id: CertId::from_certs(&target.cert_der, &target.issuer_der)?,
            signer_der,
        };
        self.ocsp.check(&request).await
    }

    /// The policy CRL first, then the certificate's own distribution points
    fn crl_urls(&self, target: &RevocationTarget, policy: &CertPolicy) -> Vec<String> {
        let mut urls: Vec<String> = policy.crl_url.iter().cloned().collect();
        if policy.use_cert_crl {
            for url in &target.crl_urls {
                if !urls.contains(url) {
                    urls.push(url.clone());
                }
            }
        }
        urls
    }

    /// Cached CRL for `url` when fresh, otherwise a newly fetched one
    async fn load_crl(
        &self,
        url: &str,
        target: &RevocationTarget,
        now: i64,
    ) -> CertResult<Arc<CachedCrl>> {
        if let Some(cached) = self.crl_cache.get(url) {
            if cached.is_fresh(now) {
                metrics::record_crl_cache_hit(&self.tenant);
                return Ok(cached);
            }
            debug!("Discarding stale CRL from {}", url);
            self.crl_cache.remove(url);
        }

        let der = self.crl_fetcher.fetch(url).await?;
        let crl = parse_crl(url, &der, &target.issuer_der, now)?;
        info!(
            "Cached CRL from {} with {} revoked serials",
            url,
            crl.revoked.len()
        );
        Ok(self.crl_cache.insert(crl))
    }

    async fn check_crl(
        &self,
        target: &RevocationTarget,
        policy: &CertPolicy,
        now: i64,
    ) -> CertResult<()> {
        for url in self.crl_urls(target, policy) {
            let crl = match self.load_crl(&url, target, now).await {
                Ok(crl) => crl,
                Err(e) => {
                    warn!("CRL from {} unusable: {}", url, e);
                    continue;
                }
            };
            if !crl.covers(&target.issuer_name) {
                debug!("CRL from {} does not cover {}", url, target.subject);
                continue;
            }

            if crl.is_revoked(&target.serial) {
                return Err(CertError::Revoked(format!(
                    "{} (serial {}) is listed on the CRL from {}",
                    target.subject,
                    hex::encode(&target.serial),
                    url
                )));
            }
            return Ok(());
        }

        Err(CertError::RevocationStatusUnknown(format!(
            "no usable CRL covers {}",
            target.subject
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::testing::{
        crl_der, days_from_now, issue_leaf, pem_wrap, self_signed, LeafSpec, Pki, CA_CRL_URL,
        CRL_URL, OCSP_URL,
    };

    #[derive(Default)]
    struct MockFetcher {
        crls: Mutex<HashMap<String, Vec<u8>>>,
        requested: Mutex<Vec<String>>,
        fetches: AtomicUsize,
    }

    impl MockFetcher {
        fn serving(url: &str, der: Vec<u8>) -> Arc<Self> {
            let fetcher = Self::default();
            fetcher.crls.lock().insert(url.to_string(), der);
            Arc::new(fetcher)
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CrlFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> CertResult<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().push(url.to_string());
            self.crls
                .lock()
                .get(url)
                .cloned()
                .ok_or_else(|| CertError::RevocationStatusUnknown(format!("{} unreachable", url)))
        }
    }

    /// Answers every query with `status`; `None` fails the request
    struct MockOcsp {
        status: Option<OcspStatus>,
        requests: Mutex<Vec<OcspRequest>>,
    }

    impl MockOcsp {
        fn answering(status: Option<OcspStatus>) -> Arc<Self> {
            Arc::new(Self {
                status,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl OcspClient for MockOcsp {
        async fn check(&self, request: &OcspRequest) -> CertResult<OcspStatus> {
            self.requests.lock().push(request.clone());
            self.status
                .ok_or_else(|| CertError::RevocationStatusUnknown("responder timed out".into()))
        }
    }

    fn validator_for(anchor: &[u8], fetcher: Arc<MockFetcher>, ocsp: Arc<MockOcsp>) -> CertPathValidator {
        let trust = TrustStore::new().with_der(anchor.to_vec()).unwrap();
        CertPathValidator::new("Acme", trust, Arc::new(CrlCache::new("acme")), fetcher, ocsp)
    }

    fn validator(pki: &Pki, fetcher: Arc<MockFetcher>, ocsp: Arc<MockOcsp>) -> CertPathValidator {
        validator_for(&pki.root.der, fetcher, ocsp)
    }

    fn fresh_crl(pki: &Pki, revoked: &[&[u8]]) -> Vec<u8> {
        crl_der(&pki.root, revoked, days_from_now(-1), days_from_now(1))
    }

    fn ocsp_only() -> CertPolicy {
        CertPolicy {
            use_crl: false,
            use_ocsp: true,
            ..Default::default()
        }
    }

    fn leaf(pki: &Pki) -> Vec<Vec<u8>> {
        vec![pki.leaf(&LeafSpec::default())]
    }

    // ========================================================================
    // Path and policy
    // ========================================================================

    #[tokio::test]
    async fn test_trusted_chain_without_revocation() {
        let pki = Pki::new();
        let fetcher = Arc::new(MockFetcher::default());
        let v = validator(&pki, fetcher.clone(), MockOcsp::answering(None));

        v.validate(&leaf(&pki), &CertPolicy::without_revocation())
            .await
            .unwrap();
        assert_eq!(fetcher.fetches(), 0);
        assert_eq!(v.tenant(), "acme");
    }

    #[tokio::test]
    async fn test_untrusted_root_rejected() {
        let pki = Pki::new();
        let stranger = Pki::new();
        let v = validator(&pki, Arc::new(MockFetcher::default()), MockOcsp::answering(None));

        let err = v
            .validate(&leaf(&stranger), &CertPolicy::without_revocation())
            .await
            .unwrap_err();
        assert!(matches!(err, CertError::CertValidation(_)));
    }

    #[tokio::test]
    async fn test_empty_and_malformed_chains_rejected() {
        let pki = Pki::new();
        let v = validator(&pki, Arc::new(MockFetcher::default()), MockOcsp::answering(None));
        let policy = CertPolicy::without_revocation();

        assert!(matches!(
            v.validate(&[], &policy).await,
            Err(CertError::CertValidation(_))
        ));
        assert!(matches!(
            v.validate(&[vec![0x30, 0x03, 0x02, 0x01, 0x01]], &policy).await,
            Err(CertError::CertValidation(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_leaf_rejected() {
        let pki = Pki::new();
        let v = validator(&pki, Arc::new(MockFetcher::default()), MockOcsp::answering(None));
        let expired = pki.leaf(&LeafSpec {
            not_before: days_from_now(-30),
            not_after: days_from_now(-1),
            ..Default::default()
        });

        let err = v
            .validate(&[expired], &CertPolicy::without_revocation())
            .await
            .unwrap_err();
        assert!(matches!(err, CertError::CertValidation(_)));
    }

    #[tokio::test]
    async fn test_path_through_intermediate() {
        let pki = Pki::new();
        let issuing = pki.intermediate("Acme Issuing CA");
        let leaf = issue_leaf(&issuing, &LeafSpec::default());
        let fetcher = MockFetcher::serving(
            CRL_URL,
            crl_der(&issuing, &[&[0x10, 0x01]], days_from_now(-1), days_from_now(1)),
        );
        let v = validator(&pki, fetcher, MockOcsp::answering(None));

        v.validate(&[leaf.clone(), issuing.der.clone()], &CertPolicy::without_revocation())
            .await
            .unwrap();

        assert!(matches!(
            v.validate(&[leaf.clone()], &CertPolicy::without_revocation()).await,
            Err(CertError::CertValidation(_))
        ));

        // The CRL is checked against the intermediate, which issued the leaf
        assert!(matches!(
            v.validate(&[leaf, issuing.der.clone()], &CertPolicy::default()).await,
            Err(CertError::Revoked(_))
        ));
    }

    #[tokio::test]
    async fn test_issuer_without_ca_constraint_rejected() {
        let fake = self_signed("Acme Fake CA", false);
        let leaf = issue_leaf(&fake, &LeafSpec::default());
        let v = validator_for(&fake.der, Arc::new(MockFetcher::default()), MockOcsp::answering(None));

        let err = v
            .validate(&[leaf], &CertPolicy::without_revocation())
            .await
            .unwrap_err();
        assert!(matches!(err, CertError::CertValidation(_)));
    }

    #[tokio::test]
    async fn test_policy_oid_allowlist() {
        let pki = Pki::new();
        let v = validator(&pki, Arc::new(MockFetcher::default()), MockOcsp::answering(None));
        let with_policy = pki.leaf(&LeafSpec {
            policy_oids: vec!["2.16.840.1.101.2.1.11.10".into()],
            ..Default::default()
        });

        let mut policy = CertPolicy::without_revocation();
        policy.allowed_policy_oids = vec!["2.16.840.1.101.2.1.11.10".into()];
        v.validate(&[with_policy.clone()], &policy).await.unwrap();

        assert!(matches!(
            v.validate(&leaf(&pki), &policy).await,
            Err(CertError::CertValidation(_))
        ));

        policy.allowed_policy_oids = vec!["1.2.3.4".into()];
        assert!(matches!(
            v.validate(&[with_policy], &policy).await,
            Err(CertError::CertValidation(_))
        ));
    }

    // ========================================================================
    // CRL
    // ========================================================================

    #[tokio::test]
    async fn test_crl_lists_serial() {
        let pki = Pki::new();
        let fetcher = MockFetcher::serving(CRL_URL, fresh_crl(&pki, &[&[0x10, 0x01]]));
        let v = validator(&pki, fetcher, MockOcsp::answering(None));

        let err = v.validate(&leaf(&pki), &CertPolicy::default()).await.unwrap_err();
        assert!(matches!(err, CertError::Revoked(_)));
    }

    #[tokio::test]
    async fn test_good_crl_served_from_cache() {
        let pki = Pki::new();
        let fetcher = MockFetcher::serving(CRL_URL, fresh_crl(&pki, &[&[0x7f]]));
        let v = validator(&pki, fetcher.clone(), MockOcsp::answering(None));
        let chain = leaf(&pki);

        v.validate(&chain, &CertPolicy::default()).await.unwrap();
        v.validate(&chain, &CertPolicy::default()).await.unwrap();

        assert_eq!(fetcher.fetches(), 1);
        assert_eq!(v.crl_cache().len(), 1);
        assert!(v.crl_cache().get(CRL_URL).unwrap().is_revoked(&[0x7f]));
    }

    #[tokio::test]
    async fn test_stale_cached_crl_is_refetched() {
        let pki = Pki::new();
        let fetcher = MockFetcher::serving(CRL_URL, fresh_crl(&pki, &[&[0x10, 0x01]]));
        let v = validator(&pki, fetcher.clone(), MockOcsp::answering(None));

        v.crl_cache().insert(CachedCrl {
            url: CRL_URL.into(),
            issuer: pki.root.subject_raw(),
            revoked: Default::default(),
            this_update: 0,
            next_update: Some(Utc::now().timestamp() - 60),
            fetched_at: Utc::now(),
        });

        let err = v.validate(&leaf(&pki), &CertPolicy::default()).await.unwrap_err();
        assert!(matches!(err, CertError::Revoked(_)));
        assert_eq!(fetcher.fetches(), 1);
    }

    #[tokio::test]
    async fn test_unusable_crls_leave_status_unknown() {
        let pki = Pki::new();
        let impostor = Pki::new();
        let chain = leaf(&pki);

        // Signed by a key other than the issuer's
        let forged = crl_der(&impostor.root, &[], days_from_now(-1), days_from_now(1));
        let v = validator(&pki, MockFetcher::serving(CRL_URL, forged), MockOcsp::answering(None));
        assert!(matches!(
            v.validate(&chain, &CertPolicy::default()).await,
            Err(CertError::RevocationStatusUnknown(_))
        ));
        assert!(v.crl_cache().is_empty());

        let stale = crl_der(&pki.root, &[], days_from_now(-3), days_from_now(-1));
        let v = validator(&pki, MockFetcher::serving(CRL_URL, stale), MockOcsp::answering(None));
        assert!(matches!(
            v.validate(&chain, &CertPolicy::default()).await,
            Err(CertError::RevocationStatusUnknown(_))
        ));

        let v = validator(&pki, Arc::new(MockFetcher::default()), MockOcsp::answering(None));
        assert!(matches!(
            v.validate(&chain, &CertPolicy::default()).await,
            Err(CertError::RevocationStatusUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_crl_from_other_issuer_does_not_cover() {
        let pki = Pki::new();
        let other = self_signed("Other CA", true);
        let foreign = crl_der(&other, &[&[0x10, 0x01]], days_from_now(-1), days_from_now(1));
        let v = validator(&pki, MockFetcher::serving(CRL_URL, foreign), MockOcsp::answering(None));

        assert!(matches!(
            v.validate(&leaf(&pki), &CertPolicy::default()).await,
            Err(CertError::RevocationStatusUnknown(_))
        ));
        assert!(v.crl_cache().is_empty());
    }

    #[tokio::test]
    async fn test_ldap_distribution_point_fetched() {
        let ldap_url = "ldap://dc1.acme.local/CN=Acme%20Root%20CA,CN=CDP,DC=acme,DC=local?certificateRevocationList;binary";
        let pki = Pki::new();
        let chain = vec![pki.leaf(&LeafSpec {
            crl_urls: vec![ldap_url.into()],
            ..Default::default()
        })];
        let fetcher = MockFetcher::serving(ldap_url, fresh_crl(&pki, &[&[0x10, 0x01]]));
        let v = validator(&pki, fetcher.clone(), MockOcsp::answering(None));

        let err = v.validate(&chain, &CertPolicy::default()).await.unwrap_err();
        assert!(matches!(err, CertError::Revoked(_)));
        assert_eq!(*fetcher.requested.lock(), vec![ldap_url.to_string()]);
        assert!(v.crl_cache().get(ldap_url).is_some());
    }

    #[tokio::test]
    async fn test_unreachable_ldap_location_falls_through() {
        let ldap_url = "ldaps://dc1.acme.local/CN=Acme,CN=CDP,DC=acme,DC=local";
        let pki = Pki::new();
        let chain = vec![pki.leaf(&LeafSpec {
            crl_urls: vec![ldap_url.into(), CRL_URL.into()],
            ..Default::default()
        })];
        let fetcher = MockFetcher::serving(CRL_URL, fresh_crl(&pki, &[]));
        let v = validator(&pki, fetcher.clone(), MockOcsp::answering(None));

        v.validate(&chain, &CertPolicy::default()).await.unwrap();
        assert_eq!(
            *fetcher.requested.lock(),
            vec![ldap_url.to_string(), CRL_URL.to_string()]
        );
    }

    #[tokio::test]
    async fn test_revoked_intermediate_rejected() {
        let pki = Pki::new();
        let issuing = pki.intermediate_with("Acme Issuing CA", &[0x20, 0x01], &[CA_CRL_URL]);
        let chain = vec![issue_leaf(&issuing, &LeafSpec::default()), issuing.der.clone()];
        let leaf_crl = crl_der(&issuing, &[], days_from_now(-1), days_from_now(1));

        let fetcher = Arc::new(MockFetcher::default());
        fetcher.crls.lock().insert(CRL_URL.into(), leaf_crl.clone());
        fetcher
            .crls
            .lock()
            .insert(CA_CRL_URL.into(), fresh_crl(&pki, &[&[0x20, 0x01]]));
        let v = validator(&pki, fetcher.clone(), MockOcsp::answering(None));

        let err = v.validate(&chain, &CertPolicy::default()).await.unwrap_err();
        assert!(matches!(&err, CertError::Revoked(msg) if msg.contains("Acme Issuing CA")));
        assert_eq!(
            *fetcher.requested.lock(),
            vec![CRL_URL.to_string(), CA_CRL_URL.to_string()]
        );

        // Same path with the intermediate in good standing
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.crls.lock().insert(CRL_URL.into(), leaf_crl);
        fetcher.crls.lock().insert(CA_CRL_URL.into(), fresh_crl(&pki, &[]));
        let v = validator(&pki, fetcher, MockOcsp::answering(None));
        v.validate(&chain, &CertPolicy::default()).await.unwrap();
        assert_eq!(v.crl_cache().len(), 2);
    }

    #[tokio::test]
    async fn test_intermediate_without_crl_is_status_unknown() {
        let pki = Pki::new();
        let issuing = pki.intermediate("Acme Issuing CA");
        let chain = vec![issue_leaf(&issuing, &LeafSpec::default()), issuing.der.clone()];
        let fetcher = MockFetcher::serving(
            CRL_URL,
            crl_der(&issuing, &[], days_from_now(-1), days_from_now(1)),
        );
        let v = validator(&pki, fetcher, MockOcsp::answering(None));

        let err = v.validate(&chain, &CertPolicy::default()).await.unwrap_err();
        assert!(matches!(&err, CertError::RevocationStatusUnknown(msg) if msg.contains("Acme Issuing CA")));
    }

    #[tokio::test]
    async fn test_policy_crl_url_tried_before_distribution_points() {
        let pki = Pki::new();
        let override_url = "http://pki.acme.local/override.crl";
        let fetcher = MockFetcher::serving(override_url, fresh_crl(&pki, &[]));
        let v = validator(&pki, fetcher.clone(), MockOcsp::answering(None));

        let policy = CertPolicy {
            crl_url: Some(override_url.into()),
            ..Default::default()
        };
        v.validate(&leaf(&pki), &policy).await.unwrap();
        assert_eq!(*fetcher.requested.lock(), vec![override_url.to_string()]);

        // A policy CRL from another issuer leaves the distribution point to decide
        let other = self_signed("Other CA", true);
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.crls.lock().insert(
            override_url.into(),
            crl_der(&other, &[], days_from_now(-1), days_from_now(1)),
        );
        fetcher
            .crls
            .lock()
            .insert(CRL_URL.into(), fresh_crl(&pki, &[&[0x10, 0x01]]));
        let v = validator(&pki, fetcher.clone(), MockOcsp::answering(None));
        let policy = CertPolicy {
            crl_url: Some(override_url.into()),
            ..Default::default()
        };
        assert!(matches!(
            v.validate(&leaf(&pki), &policy).await,
            Err(CertError::Revoked(_))
        ));
        assert_eq!(
            *fetcher.requested.lock(),
            vec![override_url.to_string(), CRL_URL.to_string()]
        );

        // Without the certificate's distribution points there is nothing to check
        let policy = CertPolicy {
            use_cert_crl: false,
            ..Default::default()
        };
        assert!(matches!(
            v.validate(&leaf(&pki), &policy).await,
            Err(CertError::RevocationStatusUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_no_mechanism_selected_checks_crl() {
        let pki = Pki::new();
        let fetcher = MockFetcher::serving(CRL_URL, fresh_crl(&pki, &[&[0x10, 0x01]]));
        let ocsp = MockOcsp::answering(Some(OcspStatus::Good));
        let v = validator(&pki, fetcher, ocsp.clone());

        let policy = CertPolicy {
            use_crl: false,
            use_ocsp: false,
            ..Default::default()
        };
        let err = v.validate(&leaf(&pki), &policy).await.unwrap_err();
        assert!(matches!(err, CertError::Revoked(_)));
        assert!(ocsp.requests.lock().is_empty());
    }

    // ========================================================================
    // OCSP
    // ========================================================================

    #[tokio::test]
    async fn test_ocsp_revoked() {
        let pki = Pki::new();
        let ocsp = MockOcsp::answering(Some(OcspStatus::Revoked));
        let v = validator(&pki, Arc::new(MockFetcher::default()), ocsp.clone());

        let err = v.validate(&leaf(&pki), &ocsp_only()).await.unwrap_err();
        assert!(matches!(err, CertError::Revoked(_)));

        let requests = ocsp.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].responder, OCSP_URL);
        assert_eq!(requests[0].signer_der, pki.root.der);
        assert_eq!(requests[0].cert_id.serial, vec![0x10, 0x01]);
    }

    #[tokio::test]
    async fn test_ocsp_good_without_crl() {
        let pki = Pki::new();
        let fetcher = Arc::new(MockFetcher::default());
        let v = validator(&pki, fetcher.clone(), MockOcsp::answering(Some(OcspStatus::Good)));

        v.validate(&leaf(&pki), &ocsp_only()).await.unwrap();
        assert_eq!(fetcher.fetches(), 0);
    }

    #[tokio::test]
    async fn test_ocsp_good_still_checks_requested_crl() {
        let pki = Pki::new();
        let fetcher = MockFetcher::serving(CRL_URL, fresh_crl(&pki, &[&[0x10, 0x01]]));
        let v = validator(&pki, fetcher, MockOcsp::answering(Some(OcspStatus::Good)));

        let policy = CertPolicy {
            use_ocsp: true,
            ..Default::default()
        };
        let err = v.validate(&leaf(&pki), &policy).await.unwrap_err();
        assert!(matches!(err, CertError::Revoked(_)));
    }

    #[tokio::test]
    async fn test_ocsp_unknown_fails_over_to_crl() {
        let pki = Pki::new();
        let chain = leaf(&pki);
        let policy = CertPolicy {
            use_crl_as_failover: true,
            ..ocsp_only()
        };

        for status in [Some(OcspStatus::Unknown), None] {
            let fetcher = MockFetcher::serving(CRL_URL, fresh_crl(&pki, &[]));
            let v = validator(&pki, fetcher.clone(), MockOcsp::answering(status));
            v.validate(&chain, &policy).await.unwrap();
            assert_eq!(fetcher.fetches(), 1);
        }
    }

    #[tokio::test]
    async fn test_ocsp_failure_without_failover() {
        let pki = Pki::new();
        let chain = leaf(&pki);

        for status in [Some(OcspStatus::Unknown), None] {
            let fetcher = MockFetcher::serving(CRL_URL, fresh_crl(&pki, &[]));
            let v = validator(&pki, fetcher.clone(), MockOcsp::answering(status));
            assert!(matches!(
                v.validate(&chain, &ocsp_only()).await,
                Err(CertError::RevocationStatusUnknown(_))
            ));
            assert_eq!(fetcher.fetches(), 0);
        }
    }

    #[tokio::test]
    async fn test_ocsp_without_responder() {
        let pki = Pki::new();
        let chain = vec![pki.leaf(&LeafSpec {
            ocsp_url: None,
            ..Default::default()
        })];
        let ocsp = MockOcsp::answering(Some(OcspStatus::Good));
        let v = validator(&pki, Arc::new(MockFetcher::default()), ocsp.clone());

        assert!(matches!(
            v.validate(&chain, &ocsp_only()).await,
            Err(CertError::RevocationStatusUnknown(_))
        ));
        assert!(ocsp.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_ocsp_policy_responder_and_signer() {
        let pki = Pki::new();
        let signer = self_signed("Acme OCSP Signer", false);
        let mut pem = tempfile::NamedTempFile::new().unwrap();
        pem.write_all(pem_wrap("CERTIFICATE", &signer.der).as_bytes())
            .unwrap();

        let ocsp = MockOcsp::answering(Some(OcspStatus::Good));
        let v = validator(&pki, Arc::new(MockFetcher::default()), ocsp.clone());
        let policy = CertPolicy {
            ocsp_url: Some("http://ocsp.override.local".into()),
            ocsp_signing_cert: Some(pem.path().to_path_buf()),
            ..ocsp_only()
        };

        v.validate(&leaf(&pki), &policy).await.unwrap();
        let requests = ocsp.requests.lock();
        assert_eq!(requests[0].responder, "http://ocsp.override.local");
        assert_eq!(requests[0].signer_der, signer.der);
    }

    #[test]
    fn test_for_tenant_registers_cache() {
        let pki = Pki::new();
        let mut pem = tempfile::NamedTempFile::new().unwrap();
        pem.write_all(pki.root.cert.pem().as_bytes()).unwrap();

        let tenant = TenantConfig {
            name: "Acme".into(),
            trust_anchors: vec![pem.path().to_path_buf()],
            cert_policy: CertPolicy::default(),
            stores: Vec::new(),
        };
        let caches = CrlCacheManager::new();
        let v = CertPathValidator::for_tenant(&tenant, &caches, &HttpConfig::default()).unwrap();

        assert_eq!(v.trust().len(), 1);
        assert!(Arc::ptr_eq(v.crl_cache(), &caches.get("acme").unwrap()));
    }
}
