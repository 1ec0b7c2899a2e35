//! Trust anchors for client-certificate validation

use std::path::{Path, PathBuf};

use tracing::debug;
use x509_parser::prelude::*;

use crate::error::{CertError, CertResult};

/// DER-encoded trust anchors for one tenant
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    anchors: Vec<Vec<u8>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pem_files(paths: &[PathBuf]) -> CertResult<Self> {
        let mut store = Self::new();
        for path in paths {
            for der in load_pem_certificates(path)? {
                store.add_der(der)?;
            }
            debug!("Loaded trust anchors from {}", path.display());
        }
        Ok(store)
    }

    /// Add one anchor, rejecting bytes that do not parse as a certificate
    pub fn add_der(&mut self, der: Vec<u8>) -> CertResult<()> {
        X509Certificate::from_der(&der)
            .map_err(|e| CertError::Parse(format!("invalid trust anchor: {}", e)))?;
        self.anchors.push(der);
        Ok(())
    }

    pub fn with_der(mut self, der: Vec<u8>) -> CertResult<Self> {
        self.add_der(der)?;
        Ok(self)
    }

    pub fn anchors(&self) -> &[Vec<u8>] {
        &self.anchors
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }
}

/// Read every certificate in a PEM file
pub fn load_pem_certificates(path: &Path) -> CertResult<Vec<Vec<u8>>> {
    let pem = std::fs::read(path)?;
    let mut reader = pem.as_slice();
    let certs = rustls_pemfile::certs(&mut reader)
        .map(|c| c.map(|der| der.as_ref().to_vec()))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(CertError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// First certificate of a PEM file
pub fn load_pem_certificate(path: &Path) -> CertResult<Vec<u8>> {
    load_pem_certificates(path)?
        .into_iter()
        .next()
        .ok_or_else(|| CertError::Config(format!("no certificate in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn self_signed() -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec!["ca.acme.local".to_string()]).unwrap()
    }

    #[test]
    fn test_from_pem_files() {
        let first = self_signed();
        let second = self_signed();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(first.cert.pem().as_bytes()).unwrap();
        file.write_all(second.cert.pem().as_bytes()).unwrap();

        let store = TrustStore::from_pem_files(&[file.path().to_path_buf()]).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.anchors()[0], first.cert.der().to_vec());

        let single = load_pem_certificate(file.path()).unwrap();
        assert_eq!(single, first.cert.der().to_vec());
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a pem file").unwrap();
        assert!(matches!(
            TrustStore::from_pem_files(&[file.path().to_path_buf()]),
            Err(CertError::Config(_))
        ));

        assert!(matches!(
            TrustStore::from_pem_files(&[PathBuf::from("/nonexistent/ca.pem")]),
            Err(CertError::Io(_))
        ));

        assert!(TrustStore::new().add_der(vec![0x30, 0x00]).is_err());
    }
}
