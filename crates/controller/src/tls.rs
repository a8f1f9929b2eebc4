//! TLS setup for the agent-facing listener: client certificates are
//! mandatory on this endpoint (the admin socket carries no TLS at all —
//! see `admin.rs`).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use fleet_domain::config::TlsConfig;
use fleet_domain::{Error, Result};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

pub fn build_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let cert_chain = load_certs(&tls.cert)?;
    let key = load_key(&tls.key)?;

    let mut roots = RootCertStore::empty();
    for cert in load_certs(&tls.ca)? {
        roots
            .add(cert)
            .map_err(|e| Error::Config(format!("loading CA {}: {e}", tls.ca.display())))?;
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| Error::Config(format!("building client certificate verifier: {e}")))?;

    let mut config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::Config(format!("loading server cert/key: {e}")))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| Error::Config(format!("opening {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::Config(format!("parsing certs in {}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| Error::Config(format!("opening {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Config(format!("parsing key in {}: {e}", path.display())))?
        .ok_or_else(|| Error::Config(format!("no private key found in {}", path.display())))
}

/// Extracts the singleton client certificate CN. Errors if no certificate
/// was presented, or if the subject has zero or multiple CN attributes.
pub fn extract_cn(certs: &[rustls::pki_types::CertificateDer<'static>]) -> Result<String> {
    let leaf = certs
        .first()
        .ok_or_else(|| Error::Auth("no client certificate presented".into()))?;
    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| Error::Auth(format!("parsing client certificate: {e}")))?;

    let mut cns = parsed.subject().iter_common_name();
    let first = cns
        .next()
        .ok_or_else(|| Error::Auth("client certificate subject has no CN".into()))?;
    if cns.next().is_some() {
        return Err(Error::Auth("client certificate subject has multiple CNs".into()));
    }
    let cn = first
        .as_str()
        .map_err(|e| Error::Auth(format!("CN is not valid UTF-8: {e}")))?;
    Ok(cn.to_string())
}
