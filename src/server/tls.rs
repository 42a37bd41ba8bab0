//! Listener-side TLS: PEM material is read once per port at listener
//! creation and turned into an acceptor. One certificate per port — there
//! is no SNI-based selection.

use crate::config::TlsConfig;
use crate::error::GatewayError;
use rustls::pki_types::CertificateDer;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

pub fn build_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, GatewayError> {
    let mut certs = read_cert_chain(&tls.cert)?;
    if certs.is_empty() {
        return Err(GatewayError::Tls(format!(
            "no certificates found in {}",
            tls.cert
        )));
    }

    // An optional CA bundle is appended to the presented chain
    // (intermediates shipped in a separate file).
    if let Some(ca_path) = &tls.ca {
        certs.extend(read_cert_chain(ca_path)?);
    }

    let key_file = std::fs::File::open(&tls.key)
        .map_err(|e| GatewayError::Tls(format!("open key file {}: {}", tls.key, e)))?;
    let mut key_reader = std::io::BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| GatewayError::Tls(format!("parse key file {}: {}", tls.key, e)))?
        .ok_or_else(|| GatewayError::Tls(format!("no private key found in {}", tls.key)))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Tls(format!("build server config: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn read_cert_chain(path: &str) -> Result<Vec<CertificateDer<'static>>, GatewayError> {
    let file = std::fs::File::open(path)
        .map_err(|e| GatewayError::Tls(format!("open cert file {}: {}", path, e)))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GatewayError::Tls(format!("parse cert file {}: {}", path, e)))
}
