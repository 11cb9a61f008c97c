//! Transport bootstrap: a fresh self-signed certificate on every start
//!
//! The ECDSA P-256 key never leaves memory. Only the certificate PEM is
//! written out, for clients to pin.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;

use quire_core::{QuireError, QuireResult};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;

/// The server's TLS config plus the certificate clients should trust
pub struct TlsMaterial {
    pub config: Arc<ServerConfig>,
    pub cert_pem: String,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial").finish_non_exhaustive()
    }
}

fn tls_err(context: &str, err: impl std::fmt::Display) -> QuireError {
    QuireError::Tls(format!("{context}: {err}"))
}

/// Names the certificate covers: hostname, loopback, every local interface
/// address and any configured extras.
pub fn subject_alt_names(extra_hosts: &[String]) -> Vec<String> {
    let mut names = BTreeSet::new();

    match hostname::get() {
        Ok(host) => match host.into_string() {
            Ok(host) if !host.is_empty() && host.is_ascii() => {
                names.insert(host);
            }
            _ => tracing::debug!("hostname is not ASCII; leaving it out of the certificate"),
        },
        Err(e) => tracing::warn!("cannot read hostname: {e}"),
    }

    names.insert("localhost".to_string());
    names.insert(IpAddr::V4(Ipv4Addr::LOCALHOST).to_string());
    names.insert(IpAddr::V6(Ipv6Addr::LOCALHOST).to_string());

    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for iface in interfaces {
                names.insert(iface.ip().to_string());
            }
        }
        Err(e) => tracing::warn!("cannot list network interfaces: {e}"),
    }

    for host in extra_hosts {
        let host = host.trim();
        if !host.is_empty() {
            names.insert(host.to_string());
        }
    }

    names.into_iter().collect()
}

/// Generate the key pair and certificate, write the PEM to `cert_path` and
/// build the rustls server config. Any failure is fatal to server start.
pub fn bootstrap(cert_path: &Path, extra_hosts: &[String]) -> QuireResult<TlsMaterial> {
    let sans = subject_alt_names(extra_hosts);

    let key_pair =
        KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|e| tls_err("generating key pair", e))?;

    let mut params =
        CertificateParams::new(sans.clone()).map_err(|e| tls_err("certificate names", e))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "quire");
    params.distinguished_name = dn;
    params.not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
    params.not_after = rcgen::date_time_ymd(2049, 12, 31);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| tls_err("signing certificate", e))?;
    let cert_pem = cert.pem();

    if let Some(parent) = cert_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(cert_path, &cert_pem)
        .map_err(|e| tls_err(&format!("writing {}", cert_path.display()), e))?;

    let cert_der: CertificateDer<'static> = cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let mut config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| tls_err("protocol versions", e))?
    .with_no_client_auth()
    .with_single_cert(vec![cert_der], key_der)
    .map_err(|e| tls_err("server config", e))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    tracing::info!(
        cert = %cert_path.display(),
        names = sans.len(),
        "generated self-signed certificate"
    );

    Ok(TlsMaterial {
        config: Arc::new(config),
        cert_pem,
    })
}
