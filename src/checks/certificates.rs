use std::net::IpAddr;

use chrono::{DateTime, Utc};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{DiagnosticsError, Result};

/// Secret holding the cluster domain certificate chain.
pub const TLS_SECRET_NAMESPACE: &str = "runai";
pub const TLS_SECRET_NAME: &str = "runai-cluster-domain-tls-secret";
pub const TLS_CERT_KEY: &str = "tls.crt";

/// The parts of an X.509 certificate the check looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateSummary {
    pub subject: String,
    pub not_after: i64,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

impl CertificateSummary {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
            DiagnosticsError::check(format!("could not parse certificate: {e}"))
        })?;

        let subject = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| "<no common name>".to_string());

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        let san = cert.subject_alternative_name().map_err(|e| {
            DiagnosticsError::check(format!("could not read subject alternative names: {e}"))
        })?;
        for name in san.iter().flat_map(|ext| ext.value.general_names.iter()) {
            match name {
                GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                GeneralName::IPAddress(bytes) => ip_addresses.extend(ip_from_bytes(bytes)),
                _ => {}
            }
        }

        Ok(Self {
            subject,
            not_after: cert.validity().not_after.timestamp(),
            dns_names,
            ip_addresses,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() > self.not_after
    }

    /// Whether the certificate is valid for `host` (a DNS name or an IP).
    pub fn covers(&self, host: &str) -> bool {
        match host.parse::<IpAddr>() {
            Ok(ip) => self.ip_addresses.contains(&ip),
            Err(_) => self.dns_names.iter().any(|name| hostname_matches(name, host)),
        }
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(bytes) {
        return Some(IpAddr::from(v4));
    }
    <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from)
}

/// Match a SAN entry against a host name. A leading `*.` matches exactly one
/// label; comparison ignores case and a trailing dot.
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(suffix) => match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        },
        None => pattern == host,
    }
}

/// Decode every `CERTIFICATE` block in a PEM bundle.
pub fn parse_pem_bundle(pem: &[u8]) -> Result<Vec<CertificateSummary>> {
    let mut reader = pem;
    let mut summaries = Vec::new();

    for der in rustls_pemfile::certs(&mut reader) {
        let der = der?;
        summaries.push(CertificateSummary::from_der(&der)?);
    }

    Ok(summaries)
}

/// Every certificate must be unexpired and at least one must cover `fqdn`.
pub fn validate_certificates(pem: &[u8], fqdn: &str, now: DateTime<Utc>) -> Result<String> {
    let certificates = parse_pem_bundle(pem)?;
    if certificates.is_empty() {
        return Err(DiagnosticsError::check(format!(
            "no certificates found in secret {TLS_SECRET_NAMESPACE}/{TLS_SECRET_NAME}"
        )));
    }

    if let Some(expired) = certificates.iter().find(|c| c.is_expired(now)) {
        return Err(DiagnosticsError::check(format!(
            "cert {} is expired",
            expired.subject
        )));
    }

    let matching = certificates
        .iter()
        .find(|c| c.covers(fqdn))
        .ok_or_else(|| {
            DiagnosticsError::check(format!("no certificate found for the DNS record {fqdn}"))
        })?;

    let expiry = DateTime::from_timestamp(matching.not_after, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| matching.not_after.to_string());

    Ok(format!(
        "certificate {} is valid for {fqdn} until {expiry}",
        matching.subject
    ))
}
