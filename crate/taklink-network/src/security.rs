use rustls::RootCertStore;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::pem::PemObject as _;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls;

use crate::config::ClientConfig;
use crate::error::ClientError;

pub use rustls::crypto::aws_lc_rs::default_provider;

/// Build the rustls client configuration for a TLS client.
///
/// Credential sources, in order of precedence:
/// - a pre-built `rustls::ClientConfig` in `config.tls`;
/// - a PKCS#12 bundle (`.p12`/`.pfx` extension) named by `cert_file`,
///   decrypted with `p12_password`;
/// - a PEM certificate/key pair named by `cert_file` and `key_file`.
///
/// Server verification uses `ca_file` when given, the webpki root set
/// otherwise. `skip_tls_verify` replaces verification entirely.
pub fn load_client_tls_config(
    config: &ClientConfig,
) -> Result<Arc<rustls::ClientConfig>, ClientError> {
    if let Some(tls) = &config.tls {
        return Ok(Arc::clone(tls));
    }

    let mut roots = match &config.ca_file {
        Some(path) => {
            let mut roots = RootCertStore::empty();
            for cert in CertificateDer::pem_file_iter(path)
                .map_err(|err| ClientError::Config(format!("cannot read CA file: {err}")))?
            {
                let cert = cert
                    .map_err(|err| ClientError::Config(format!("invalid CA certificate: {err}")))?;
                roots.add(cert)?;
            }
            roots
        }
        None => RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        },
    };

    let identity = match &config.cert_file {
        Some(cert_file) if is_pkcs12(cert_file) => Some(load_pkcs12(
            cert_file,
            config.p12_password.as_deref().unwrap_or(""),
            &mut roots,
        )?),
        Some(cert_file) => {
            let key_file = config.key_file.as_ref().ok_or_else(|| {
                ClientError::Config("PEM certificate requires a key file".to_string())
            })?;
            let chain: Vec<CertificateDer<'static>> = CertificateDer::pem_file_iter(cert_file)
                .map_err(|err| {
                    ClientError::Config(format!("cannot read certificate file: {err}"))
                })?
                .collect::<Result<_, _>>()
                .map_err(|err| ClientError::Config(format!("invalid certificate: {err}")))?;
            if chain.is_empty() {
                return Err(ClientError::Config(
                    "certificate file holds no certificates".to_string(),
                ));
            }
            let key = PrivateKeyDer::from_pem_file(key_file)
                .map_err(|err| ClientError::Config(format!("cannot read key file: {err}")))?;
            Some((chain, key))
        }
        None => None,
    };

    let builder = rustls::ClientConfig::builder();
    let builder = if config.skip_tls_verify {
        log::warn!("TLS server verification disabled; connection is encrypted but unauthenticated");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureServerVerifier::new()))
    } else {
        builder.with_root_certificates(roots)
    };

    let tls = match identity {
        Some((chain, key)) => builder.with_client_auth_cert(chain, key)?,
        None => builder.with_no_client_auth(),
    };
    Ok(Arc::new(tls))
}

fn is_pkcs12(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("p12") || ext.eq_ignore_ascii_case("pfx")
    )
}

/// Extract the client identity from a PKCS#12 bundle.
///
/// The first certificate bag is taken as the leaf; remaining bags are
/// assumed to be issuers and added to the trust store, which is how TAK
/// server enrollment packages usually ship their CA.
fn load_pkcs12(
    path: &Path,
    password: &str,
    roots: &mut RootCertStore,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ClientError> {
    let bytes = fs::read(path)?;
    let pfx = p12::PFX::parse(&bytes)
        .map_err(|err| ClientError::Config(format!("cannot parse PKCS#12 bundle: {err:?}")))?;
    if !pfx.verify_mac(password) {
        return Err(ClientError::Config(
            "PKCS#12 MAC check failed; wrong password?".to_string(),
        ));
    }

    let keys = pfx
        .key_bags(password)
        .map_err(|err| ClientError::Config(format!("cannot decrypt PKCS#12 keys: {err:?}")))?;
    let key = keys
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::Config("PKCS#12 bundle holds no private key".to_string()))?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key));

    let certs = pfx
        .cert_bags(password)
        .map_err(|err| ClientError::Config(format!("cannot decrypt PKCS#12 certs: {err:?}")))?;
    let mut certs = certs
        .into_iter()
        .map(|der| CertificateDer::from(der).into_owned());
    let leaf = certs
        .next()
        .ok_or_else(|| ClientError::Config("PKCS#12 bundle holds no certificate".to_string()))?;
    // Self-signed TAK setups present the client's own certificate as
    // the server certificate, so the leaf belongs in the trust pool
    // too.
    if let Err(err) = roots.add(leaf.clone()) {
        log::debug!("cannot trust PKCS#12 leaf certificate: {err}");
    }
    for issuer in certs {
        if let Err(err) = roots.add(issuer) {
            log::debug!("skipping non-CA certificate from PKCS#12 bundle: {err}");
        }
    }

    Ok((vec![leaf], key))
}

/// Accepts any server certificate. Signatures within the handshake are
/// still checked, so the channel stays encrypted against passive
/// observers.
#[derive(Debug)]
struct InsecureServerVerifier {
    algos: WebPkiSupportedAlgorithms,
}

impl InsecureServerVerifier {
    fn new() -> Self {
        Self {
            algos: default_provider().signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for InsecureServerVerifier {
    fn verify_server_cert(
        &self,
        _: &rustls::pki_types::CertificateDer<'_>,
        _: &[rustls::pki_types::CertificateDer<'_>],
        _: &rustls::pki_types::ServerName<'_>,
        _: &[u8],
        _: rustls::pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algos)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algos)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.algos.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionKind, DEFAULT_TLS_PORT};
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../resources/test")
            .join(name)
    }

    fn base_config() -> ClientConfig {
        ClientConfig::new(ConnectionKind::Tls, "localhost", DEFAULT_TLS_PORT, "tester")
    }

    #[test]
    fn pem_pair_loads() -> anyhow::Result<()> {
        let mut config = base_config();
        config.cert_file = Some(fixture("client.pem"));
        config.key_file = Some(fixture("client.key"));
        config.ca_file = Some(fixture("ca.pem"));
        load_client_tls_config(&config)?;
        Ok(())
    }

    #[test]
    fn pem_without_key_is_rejected() {
        let mut config = base_config();
        config.cert_file = Some(fixture("client.pem"));
        let res = load_client_tls_config(&config);
        assert!(matches!(res, Err(ClientError::Config(_))));
    }

    #[test]
    fn pkcs12_bundle_loads() -> anyhow::Result<()> {
        let mut config = base_config();
        config.cert_file = Some(fixture("client.p12"));
        config.p12_password = Some("atakatak".to_string());
        config.ca_file = Some(fixture("ca.pem"));
        load_client_tls_config(&config)?;
        Ok(())
    }

    #[test]
    fn pkcs12_leaf_joins_the_trust_pool() -> anyhow::Result<()> {
        let mut roots = RootCertStore::empty();
        let (chain, _key) = load_pkcs12(&fixture("client.p12"), "atakatak", &mut roots)?;
        assert_eq!(1, chain.len());
        assert!(!roots.is_empty());
        Ok(())
    }

    #[test]
    fn pkcs12_wrong_password_is_rejected() {
        let mut config = base_config();
        config.cert_file = Some(fixture("client.p12"));
        config.p12_password = Some("not-the-password".to_string());
        let res = load_client_tls_config(&config);
        assert!(matches!(res, Err(ClientError::Config(_))));
    }

    #[test]
    fn missing_cert_file_is_rejected() {
        let mut config = base_config();
        config.cert_file = Some(fixture("does-not-exist.pem"));
        config.key_file = Some(fixture("does-not-exist.key"));
        let res = load_client_tls_config(&config);
        assert!(matches!(res, Err(ClientError::Config(_))));
    }

    #[test]
    fn no_client_cert_uses_webpki_roots() -> anyhow::Result<()> {
        let config = base_config();
        load_client_tls_config(&config)?;
        Ok(())
    }

    #[test]
    fn prebuilt_config_takes_precedence() -> anyhow::Result<()> {
        let mut config = base_config();
        let prebuilt = load_client_tls_config(&config)?;
        config.tls = Some(Arc::clone(&prebuilt));
        // Paths that would otherwise fail are ignored.
        config.cert_file = Some(fixture("does-not-exist.pem"));
        let loaded = load_client_tls_config(&config)?;
        assert!(Arc::ptr_eq(&prebuilt, &loaded));
        Ok(())
    }
}
