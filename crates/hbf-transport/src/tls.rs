//! TLS setup for the external listener

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::error::{Result, TransportError};

/// Build an acceptor from a PEM certificate chain and a PEM private key
pub fn load_tls_acceptor(chainfile: &Path, private_key: &Path) -> Result<TlsAcceptor> {
    let chain_pem = std::fs::read(chainfile)?;
    let key_pem = std::fs::read(private_key)?;

    let chain = parse_chain(&chain_pem)?;
    let key = parse_private_key(&key_pem)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| TransportError::Tls(format!("TLS config failed: {}", e)))?;

    info!("Loaded TLS certificate chain from {}", chainfile.display());

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn parse_chain(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let chain = rustls_pemfile::certs(&mut &pem[..]).collect::<std::io::Result<Vec<_>>>()?;
    if chain.is_empty() {
        return Err(TransportError::Tls(
            "no certificate found in PEM file".into(),
        ));
    }
    Ok(chain)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])?
        .ok_or_else(|| TransportError::Tls("no private key found in PEM file".into()))
}
