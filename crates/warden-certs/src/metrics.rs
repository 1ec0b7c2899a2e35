//! Certificate validation metrics

use metrics::counter;

pub mod names {
    pub const VALIDATIONS_TOTAL: &str = "warden_cert_validations_total";
    pub const CRL_FETCHES_TOTAL: &str = "warden_crl_fetches_total";
    pub const CRL_CACHE_HITS_TOTAL: &str = "warden_crl_cache_hits_total";
    pub const OCSP_REQUESTS_TOTAL: &str = "warden_ocsp_requests_total";
}

/// `outcome` is `ok` or an error code
pub fn record_validation(tenant: &str, outcome: &'static str) {
    counter!(
        names::VALIDATIONS_TOTAL,
        "tenant" => tenant.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_crl_fetch(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(names::CRL_FETCHES_TOTAL, "status" => status).increment(1);
}

pub fn record_crl_cache_hit(tenant: &str) {
    counter!(names::CRL_CACHE_HITS_TOTAL, "tenant" => tenant.to_string()).increment(1);
}

/// `status` is `good`, `revoked`, `unknown` or `error`
pub fn record_ocsp(status: &'static str) {
    counter!(names::OCSP_REQUESTS_TOTAL, "status" => status).increment(1);
}
