//! Mutual TLS termination
//!
//! With TLS configured, every connection must present a client certificate
//! that chains to the configured CA. The subject organizations of that
//! certificate are attached to every request on the connection as a
//! [`ClientIdentity`], which identity-mode tenant resolution reads.

use crate::ingester::ClientIdentity;
use crate::{Error, Result};

use axum::{Extension, Router};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use x509_parser::prelude::*;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// PEM files for client-certificate TLS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// CA bundle that client certificates must chain to
    pub ca_cert_path: PathBuf,
    /// Server certificate chain
    pub server_cert_path: PathBuf,
    /// Server private key
    pub server_key_path: PathBuf,
}

impl TlsConfig {
    /// TLS is on when all three paths are set and off when none is.
    /// Empty values count as unset; a partial set is a configuration error.
    pub fn from_paths(
        ca_cert_path: Option<PathBuf>,
        server_cert_path: Option<PathBuf>,
        server_key_path: Option<PathBuf>,
    ) -> Result<Option<Self>> {
        let set = |path: Option<PathBuf>| path.filter(|p| !p.as_os_str().is_empty());
        match (set(ca_cert_path), set(server_cert_path), set(server_key_path)) {
            (Some(ca_cert_path), Some(server_cert_path), Some(server_key_path)) => Ok(Some(Self {
                ca_cert_path,
                server_cert_path,
                server_key_path,
            })),
            (None, None, None) => Ok(None),
            _ => Err(Error::Config(
                "CA_CERT_PATH, SERVER_CERT_PATH and SERVER_KEY_PATH must be set together"
                    .to_string(),
            )),
        }
    }

    /// Read the PEM files and build the rustls server configuration.
    pub fn load(&self) -> Result<Arc<ServerConfig>> {
        let ca_certs = read_certs(&self.ca_cert_path)?;
        let chain = read_certs(&self.server_cert_path)?;
        let key = PrivateKeyDer::from_pem_file(&self.server_key_path)
            .map_err(|e| pem_error(&self.server_key_path, e))?;
        build_server_config(ca_certs, chain, key)
    }
}

fn pem_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Config(format!("failed to read {}: {}", path.display(), e))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| pem_error(path, e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| pem_error(path, e))?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Server configuration that requires and verifies client certificates
/// against `ca_certs`.
pub fn build_server_config(
    ca_certs: Vec<CertificateDer<'static>>,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>> {
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(ca_certs);
    if added == 0 {
        return Err(Error::Config("no usable CA certificate".to_string()));
    }
    if ignored > 0 {
        warn!(ignored, "Skipped unparsable CA certificates");
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| Error::Config(format!("invalid client CA: {e}")))?;

    let mut config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .map_err(|e| Error::Config(format!("invalid server certificate or key: {e}")))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Subject organizations of a DER client certificate, in certificate order.
pub fn client_identity(der: &[u8]) -> Result<ClientIdentity> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::Auth(format!("unreadable client certificate: {e}")))?;
    let organizations = cert
        .subject()
        .iter_organization()
        .filter_map(|attr| attr.as_str().ok())
        .map(str::to_string)
        .collect();
    Ok(ClientIdentity::new(organizations))
}

/// Accept TLS connections until `shutdown` flips to `true`, then stop
/// accepting and let open connections finish their in-flight request.
pub async fn serve_tls(
    listener: TcpListener,
    router: Router,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let acceptor = TlsAcceptor::from(config);
    let connection_shutdown = shutdown.clone();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(
                        acceptor.clone(),
                        stream,
                        peer,
                        router.clone(),
                        connection_shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }

    info!(open = connections.len(), "TLS listener closed, draining connections");
    while connections.join_next().await.is_some() {}
    Ok(())
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) {
    let stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(peer = %peer, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            debug!(peer = %peer, "TLS handshake timed out");
            return;
        }
    };

    // The verifier rejects connections without a certificate.
    let Some(leaf) = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
    else {
        return;
    };
    // An unreadable subject still reaches the handler, which answers 401.
    let identity = client_identity(leaf.as_ref()).unwrap_or_else(|e| {
        warn!(peer = %peer, error = %e, "Could not read client certificate subject");
        ClientIdentity::default()
    });
    debug!(peer = %peer, organizations = ?identity.organizations, "Client authenticated");

    let service = TowerToHyperService::new(router.layer(Extension(identity)));
    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };
    if let Err(e) = result {
        if !e.is_incomplete_message() {
            debug!(peer = %peer, error = %e, "Connection error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComponentFactory;
    use crate::ingester::{IdentityResolver, RequestContext, TenantResolver};
    use crate::schema::remote_write::{Label, Sample, TimeSeries, WriteRequest};
    use crate::store::LocalStore;
    use crate::{TenancyConfig, TenantMode};
    use rcgen::{
        BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
        KeyUsagePurpose,
    };
    use rustls::pki_types::{PrivatePkcs8KeyDer, ServerName};
    use rustls::ClientConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::TlsConnector;

    struct Pki {
        ca: rcgen::Certificate,
        ca_key: KeyPair,
    }

    impl Pki {
        fn new() -> Self {
            let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
            params.distinguished_name.push(DnType::CommonName, "meterwrite test CA");
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
                KeyUsagePurpose::DigitalSignature,
            ];
            let ca_key = KeyPair::generate().unwrap();
            let ca = params.self_signed(&ca_key).unwrap();
            Self { ca, ca_key }
        }

        fn issue(
            &self,
            names: Vec<String>,
            organization: Option<&str>,
            usage: ExtendedKeyUsagePurpose,
        ) -> (rcgen::Certificate, KeyPair) {
            let mut params = CertificateParams::new(names).unwrap();
            params.distinguished_name.push(DnType::CommonName, "meterwrite test");
            if let Some(org) = organization {
                params.distinguished_name.push(DnType::OrganizationName, org);
            }
            params.extended_key_usages = vec![usage];
            let key = KeyPair::generate().unwrap();
            let cert = params.signed_by(&key, &self.ca, &self.ca_key).unwrap();
            (cert, key)
        }

        fn server_config(&self) -> Arc<ServerConfig> {
            let (cert, key) = self.issue(
                vec!["localhost".to_string()],
                None,
                ExtendedKeyUsagePurpose::ServerAuth,
            );
            build_server_config(vec![self.ca.der().clone()], vec![cert.der().clone()], der_key(&key))
                .unwrap()
        }

        fn connector(&self, client_org: Option<&str>, with_cert: bool) -> TlsConnector {
            let mut roots = RootCertStore::empty();
            roots.add(self.ca.der().clone()).unwrap();
            let builder = ClientConfig::builder().with_root_certificates(roots);
            let config = if with_cert {
                let (cert, key) = self.issue(
                    Vec::new(),
                    client_org,
                    ExtendedKeyUsagePurpose::ClientAuth,
                );
                builder
                    .with_client_auth_cert(vec![cert.der().clone()], der_key(&key))
                    .unwrap()
            } else {
                builder.with_no_client_auth()
            };
            TlsConnector::from(Arc::new(config))
        }
    }

    fn der_key(key: &KeyPair) -> PrivateKeyDer<'static> {
        PrivatePkcs8KeyDer::from(key.serialize_der()).into()
    }

    fn write_body() -> Vec<u8> {
        let request = WriteRequest {
            timeseries: vec![TimeSeries {
                labels: vec![Label::new("__name__", "cpu_usage"), Label::new("host", "a")],
                samples: vec![Sample {
                    value: 1.0,
                    timestamp: 1_000,
                }],
            }],
        };
        crate::api::ingest::prometheus::encode_write_request(&request).unwrap()
    }

    async fn post_receive(addr: SocketAddr, connector: TlsConnector) -> String {
        let Ok(tcp) = TcpStream::connect(addr).await else {
            return String::new();
        };
        let server_name = ServerName::try_from("localhost").unwrap();
        let Ok(mut stream) = connector.connect(server_name, tcp).await else {
            return String::new();
        };

        let body = write_body();
        let head = format!(
            "POST /receive HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-protobuf\r\n\
             Content-Encoding: snappy\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        if stream.write_all(head.as_bytes()).await.is_err()
            || stream.write_all(&body).await.is_err()
        {
            return String::new();
        }

        let mut response = Vec::new();
        let _ = stream.read_to_end(&mut response).await;
        String::from_utf8_lossy(&response).into_owned()
    }

    async fn start(pki: &Pki, store: Arc<LocalStore>) -> (SocketAddr, watch::Sender<bool>) {
        let tenancy = TenancyConfig {
            mode: TenantMode::Identity,
            static_org_id: Some("fallback".to_string()),
        };
        let state = ComponentFactory::create_api_state(store, &tenancy);
        let router = crate::api::build_http_router(state, &crate::api::ApiServerConfig::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(serve_tls(listener, router, pki.server_config(), rx));
        (addr, tx)
    }

    #[test]
    fn test_client_identity_reads_subject_organization() {
        let pki = Pki::new();
        let (cert, _) = pki.issue(Vec::new(), Some("acme"), ExtendedKeyUsagePurpose::ClientAuth);

        let identity = client_identity(cert.der().as_ref()).unwrap();
        assert_eq!(identity.organizations, vec!["acme".to_string()]);
    }

    #[test]
    fn test_certificate_without_organization_fails_identity_resolution() {
        let pki = Pki::new();
        let (cert, _) = pki.issue(Vec::new(), None, ExtendedKeyUsagePurpose::ClientAuth);

        let identity = client_identity(cert.der().as_ref()).unwrap();
        assert!(identity.organizations.is_empty());

        let resolver = IdentityResolver::new(Some("fallback".to_string()));
        let ctx = RequestContext {
            client_identity: Some(&identity),
        };
        assert!(matches!(resolver.resolve(&ctx), Err(Error::Auth(_))));
    }

    #[test]
    fn test_garbage_certificate_rejected() {
        assert!(matches!(client_identity(b"not a certificate"), Err(Error::Auth(_))));
    }

    #[test]
    fn test_tls_requires_all_three_paths() {
        assert_eq!(TlsConfig::from_paths(None, None, None).unwrap(), None);
        assert_eq!(
            TlsConfig::from_paths(Some(PathBuf::new()), None, Some(PathBuf::new())).unwrap(),
            None
        );
        assert!(TlsConfig::from_paths(
            Some("ca.pem".into()),
            Some("server.pem".into()),
            Some("server.key".into())
        )
        .unwrap()
        .is_some());
        assert!(matches!(
            TlsConfig::from_paths(Some("ca.pem".into()), None, Some("server.key".into())),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_reads_pem_files() {
        let pki = Pki::new();
        let (cert, key) = pki.issue(
            vec!["localhost".to_string()],
            None,
            ExtendedKeyUsagePurpose::ServerAuth,
        );
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ca.pem"), pki.ca.pem()).unwrap();
        std::fs::write(dir.path().join("server.pem"), cert.pem()).unwrap();
        std::fs::write(dir.path().join("server.key"), key.serialize_pem()).unwrap();

        let config = TlsConfig {
            ca_cert_path: dir.path().join("ca.pem"),
            server_cert_path: dir.path().join("server.pem"),
            server_key_path: dir.path().join("server.key"),
        };
        assert!(config.load().is_ok());

        let missing = TlsConfig {
            ca_cert_path: dir.path().join("absent.pem"),
            ..config.clone()
        };
        assert!(matches!(missing.load(), Err(Error::Config(_))));

        let swapped = TlsConfig {
            server_key_path: dir.path().join("ca.pem"),
            ..config
        };
        assert!(matches!(swapped.load(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_certificate_organization_becomes_tenant() {
        let pki = Pki::new();
        let store = Arc::new(LocalStore::new());
        let (addr, shutdown) = start(&pki, store.clone()).await;

        let response = post_receive(addr, pki.connector(Some("acme"), true)).await;

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        let metrics = store.metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].metric.org_id, "acme");
        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_certificate_without_organization_is_unauthorized() {
        let pki = Pki::new();
        let store = Arc::new(LocalStore::new());
        let (addr, shutdown) = start(&pki, store.clone()).await;

        let response = post_receive(addr, pki.connector(None, true)).await;

        assert!(response.starts_with("HTTP/1.1 401"), "{response}");
        assert!(store.metrics().is_empty());
        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_connection_without_client_certificate_is_refused() {
        let pki = Pki::new();
        let store = Arc::new(LocalStore::new());
        let (addr, shutdown) = start(&pki, store.clone()).await;

        let response = post_receive(addr, pki.connector(None, false)).await;

        assert!(!response.starts_with("HTTP/1.1"), "{response}");
        assert!(store.metrics().is_empty());
        let _ = shutdown.send(true);
    }
}
