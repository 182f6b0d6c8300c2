//! Connection establishment to the build engine.
//!
//! Dials the configured endpoint (unix socket, plain TCP, or TLS), runs the
//! protocol handshake, and hands back an [`EngineConnection`] speaking
//! full-size frames. The endpoint's connect deadline bounds the whole
//! establishment sequence; once a connection is returned, frame traffic is
//! not subject to it.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use gantry_core::session::{EndpointAddress, EngineEndpoint, TlsMaterial};

use crate::codec::FrameCodec;
use crate::error::{ConnectError, ProtocolResult};
use crate::handshake::{perform_handshake, Hello, HelloAck};

/// Byte stream the connection runs over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// An established, handshake-complete connection to the engine.
pub struct EngineConnection {
    framed: Framed<Box<dyn Transport>, FrameCodec>,
    server: HelloAck,
}

impl std::fmt::Debug for EngineConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConnection")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl EngineConnection {
    /// Dials `endpoint` and completes the protocol handshake.
    ///
    /// The endpoint's `connect_timeout` covers dialing, the TLS handshake
    /// where applicable, and the protocol handshake together.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] describing which stage failed. Callers can
    /// consult [`ConnectError::is_recoverable`] to decide whether retrying
    /// later is worthwhile.
    pub async fn establish(endpoint: &EngineEndpoint) -> Result<Self, ConnectError> {
        let address = endpoint.address.to_string();

        // Fail fast on configuration errors before touching the network.
        if endpoint.requires_tls() && endpoint.tls.is_none() {
            return Err(ConnectError::MissingTlsMaterial { address });
        }

        match tokio::time::timeout(endpoint.connect_timeout, Self::establish_inner(endpoint)).await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectError::timeout(address, endpoint.connect_timeout)),
        }
    }

    async fn establish_inner(endpoint: &EngineEndpoint) -> Result<Self, ConnectError> {
        let address = endpoint.address.to_string();
        let dial_err = |source| ConnectError::Dial {
            address: address.clone(),
            source,
        };

        let transport: Box<dyn Transport> = match &endpoint.address {
            EndpointAddress::Unix(path) => {
                if !path.exists() {
                    return Err(ConnectError::SocketMissing { path: path.clone() });
                }
                let stream = UnixStream::connect(path).await.map_err(dial_err)?;
                Box::new(stream)
            }
            EndpointAddress::Tcp {
                host,
                port,
                tls: false,
            } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(dial_err)?;
                Box::new(stream)
            }
            EndpointAddress::Tcp {
                host,
                port,
                tls: true,
            } => {
                let material = endpoint
                    .tls
                    .as_ref()
                    .ok_or_else(|| ConnectError::MissingTlsMaterial {
                        address: address.clone(),
                    })?;
                let config = build_client_config(material, &address)?;

                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(dial_err)?;

                let server_name =
                    ServerName::try_from(host.clone()).map_err(|err| ConnectError::Tls {
                        address: address.clone(),
                        reason: format!("invalid server name: {err}"),
                    })?;
                let connector = TlsConnector::from(Arc::new(config));
                let tls_stream = connector.connect(server_name, stream).await.map_err(|err| {
                    ConnectError::Tls {
                        address: address.clone(),
                        reason: format!("TLS handshake failed: {err}"),
                    }
                })?;
                debug!(address = %address, "TLS handshake complete");
                Box::new(tls_stream)
            }
        };

        let mut framed = Framed::new(transport, FrameCodec::handshake());
        let client_info = concat!("gantry/", env!("CARGO_PKG_VERSION"));
        let server = perform_handshake(&mut framed, Hello::new(client_info)).await?;
        framed.codec_mut().widen();

        info!(
            address = %address,
            server = %server.server_info,
            "connected to engine"
        );
        Ok(Self { framed, server })
    }

    /// Sends one already-encoded frame.
    pub async fn send_frame(&mut self, frame: Bytes) -> ProtocolResult<()> {
        self.framed.send(frame).await
    }

    /// Receives the next frame, or `None` when the engine closed the
    /// connection cleanly.
    pub async fn next_frame(&mut self) -> ProtocolResult<Option<BytesMut>> {
        self.framed.next().await.transpose()
    }

    /// Identifier the engine reported during the handshake.
    #[must_use]
    pub fn server_info(&self) -> &str {
        &self.server.server_info
    }

    /// Capabilities the engine reported during the handshake.
    #[must_use]
    pub fn server_capabilities(&self) -> &[String] {
        &self.server.capabilities
    }
}

fn build_client_config(
    material: &TlsMaterial,
    address: &str,
) -> Result<ClientConfig, ConnectError> {
    let tls_err = |reason: String| ConnectError::Tls {
        address: address.to_string(),
        reason,
    };

    let ca_certs = parse_certificates(&material.ca_cert_pem).map_err(&tls_err)?;
    if ca_certs.is_empty() {
        return Err(tls_err("no CA certificates found".to_string()));
    }

    let mut root_store = RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert)
            .map_err(|err| tls_err(format!("failed to add CA certificate: {err}")))?;
    }

    let builder = ClientConfig::builder().with_root_certificates(root_store);
    let config = match (&material.client_cert_pem, &material.client_key_pem) {
        (Some(cert_pem), Some(key_pem)) => {
            let client_certs = parse_certificates(cert_pem).map_err(&tls_err)?;
            if client_certs.is_empty() {
                return Err(tls_err("no client certificates found".to_string()));
            }
            let client_key = parse_private_key(key_pem).map_err(&tls_err)?;
            builder
                .with_client_auth_cert(client_certs, client_key)
                .map_err(|err| tls_err(format!("client config error: {err}")))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(tls_err(
                "client certificate and key must be configured together".to_string(),
            ));
        }
    };
    Ok(config)
}

/// Parse PEM-encoded certificates.
fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("failed to parse certificates: {err}"))
}

/// Parse a PEM-encoded private key.
fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, String> {
    PrivateKeyDer::from_pem_slice(pem).map_err(|err| format!("failed to parse private key: {err}"))
}
