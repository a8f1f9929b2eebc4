//! TLS setup for the outbound connection to the controller: the agent
//! verifies the controller's certificate against `cafile` and presents its
//! own client certificate chain from `certfile`/`keyfile`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use fleet_domain::config::AgentConfig;
use fleet_domain::{Error, Result};
use rustls::RootCertStore;
use rustls::ClientConfig;
use tokio_rustls::TlsConnector;

pub fn build_connector(cfg: &AgentConfig) -> Result<TlsConnector> {
    let cert_chain = load_certs(&cfg.certfile)?;
    let key = load_key(&cfg.keyfile)?;

    let mut roots = RootCertStore::empty();
    for cert in load_certs(&cfg.cafile)? {
        roots
            .add(cert)
            .map_err(|e| Error::Config(format!("loading CA {}: {e}", cfg.cafile.display())))?;
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(cert_chain, key)
        .map_err(|e| Error::Config(format!("loading client cert/key: {e}")))?;

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Extracts the agent's own CN from its client certificate, for use as the
/// subject identity when rendering policy templates locally.
pub fn own_cn(cfg: &AgentConfig) -> Result<String> {
    let certs = load_certs(&cfg.certfile)?;
    let leaf = certs
        .first()
        .ok_or_else(|| Error::Config(format!("no certificate found in {}", cfg.certfile.display())))?;
    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| Error::Config(format!("parsing {}: {e}", cfg.certfile.display())))?;
    let mut cns = parsed.subject().iter_common_name();
    let first = cns
        .next()
        .ok_or_else(|| Error::Config(format!("{}: certificate subject has no CN", cfg.certfile.display())))?;
    if cns.next().is_some() {
        return Err(Error::Config(format!(
            "{}: certificate subject has multiple CNs",
            cfg.certfile.display()
        )));
    }
    let cn = first
        .as_str()
        .map_err(|e| Error::Config(format!("{}: CN is not valid UTF-8: {e}", cfg.certfile.display())))?;
    Ok(cn.to_string())
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
