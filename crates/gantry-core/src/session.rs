//! Per-submission configuration.
//!
//! A [`BuildSession`] collects everything one submission needs besides the
//! graph itself: where the engine lives, what the build is entitled to do,
//! cache and export wiring, attachments forwarded to the engine, and the
//! named local paths the graph refers to. Sessions are assembled up front
//! and treated as immutable once handed to the orchestrator.
//!
//! Attachment capabilities are a closed set declared here; the engine side
//! of each attachment is opaque to this crate.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

/// Default deadline for establishing the engine connection.
///
/// Bounds connection establishment only; a running build has no implicit
/// deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors produced while assembling session configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The endpoint URL could not be understood.
    #[error("invalid engine endpoint {url:?}: {reason}")]
    InvalidEndpoint {
        /// The offending URL.
        url: String,
        /// What was wrong with it.
        reason: &'static str,
    },
}

// ============================================================================
// Endpoint
// ============================================================================

/// Parsed engine address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddress {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// TCP address, optionally TLS-wrapped.
    Tcp {
        host: String,
        port: u16,
        /// `true` for the `tls://` scheme.
        tls: bool,
    },
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp {
                host,
                port,
                tls: false,
            } => write!(f, "tcp://{host}:{port}"),
            Self::Tcp {
                host,
                port,
                tls: true,
            } => write!(f, "tls://{host}:{port}"),
        }
    }
}

/// Where and how to reach the build engine.
#[derive(Debug, Clone)]
pub struct EngineEndpoint {
    /// Parsed address.
    pub address: EndpointAddress,
    /// PEM material for TLS endpoints.
    pub tls: Option<TlsMaterial>,
    /// Deadline for connection establishment.
    pub connect_timeout: Duration,
}

impl EngineEndpoint {
    /// Parses an endpoint URL.
    ///
    /// Supported schemes: `unix://<path>`, `tcp://<host>:<port>`,
    /// `tls://<host>:<port>`.
    pub fn parse(url: &str) -> Result<Self, SessionError> {
        let invalid = |reason| SessionError::InvalidEndpoint {
            url: url.to_string(),
            reason,
        };

        let address = if let Some(path) = url.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid("empty socket path"));
            }
            EndpointAddress::Unix(PathBuf::from(path))
        } else if let Some(rest) = url.strip_prefix("tcp://") {
            parse_host_port(rest, false).ok_or_else(|| invalid("expected host:port"))?
        } else if let Some(rest) = url.strip_prefix("tls://") {
            parse_host_port(rest, true).ok_or_else(|| invalid("expected host:port"))?
        } else {
            return Err(invalid("unsupported scheme"));
        };

        Ok(Self {
            address,
            tls: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Attaches TLS material for a `tls://` endpoint.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Overrides the connection deadline.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns `true` when the address scheme requires TLS material.
    #[must_use]
    pub const fn requires_tls(&self) -> bool {
        matches!(self.address, EndpointAddress::Tcp { tls: true, .. })
    }
}

fn parse_host_port(rest: &str, tls: bool) -> Option<EndpointAddress> {
    let (host, port) = rest.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port = port.parse().ok()?;
    Some(EndpointAddress::Tcp {
        host: host.to_string(),
        port,
        tls,
    })
}

/// PEM-encoded TLS material for authenticating the engine connection.
///
/// The client key is wiped from memory on drop.
#[derive(Clone)]
pub struct TlsMaterial {
    /// Root certificate the engine's certificate must chain to.
    pub ca_cert_pem: Vec<u8>,
    /// Client certificate for mutual TLS, if the engine requires it.
    pub client_cert_pem: Option<Vec<u8>>,
    /// Client private key for mutual TLS.
    pub client_key_pem: Option<Zeroizing<Vec<u8>>>,
}

impl TlsMaterial {
    /// Server-authentication-only material.
    #[must_use]
    pub fn new(ca_cert_pem: Vec<u8>) -> Self {
        Self {
            ca_cert_pem,
            client_cert_pem: None,
            client_key_pem: None,
        }
    }

    /// Adds a client certificate and key for mutual TLS.
    #[must_use]
    pub fn with_client_auth(mut self, cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Self {
        self.client_cert_pem = Some(cert_pem);
        self.client_key_pem = Some(Zeroizing::new(key_pem));
        self
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_cert_pem", &format_args!("{} bytes", self.ca_cert_pem.len()))
            .field("client_cert_pem", &self.client_cert_pem.as_ref().map(Vec::len))
            .field("client_key_pem", &self.client_key_pem.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ============================================================================
// Entitlements
// ============================================================================

/// Privileges a submission may grant the engine for this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entitlement {
    /// Allow build steps to use the host network.
    NetworkHost,
    /// Allow build steps to run without security sandboxing.
    SecurityInsecure,
}

impl Entitlement {
    /// Wire rendering of the entitlement.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetworkHost => "network.host",
            Self::SecurityInsecure => "security.insecure",
        }
    }
}

fn toggle(list: &mut Vec<Entitlement>, value: Entitlement, allow: bool) {
    let position = list.iter().position(|&entry| entry == value);
    match (position, allow) {
        // Already in the requested state.
        (Some(_), true) | (None, false) => {}
        (None, true) => list.push(value),
        (Some(position), false) => {
            list.remove(position);
        }
    }
}

// ============================================================================
// Cache entries
// ============================================================================

/// Kind plus attributes of one cache import or export, as sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptionsEntry {
    pub kind: String,
    pub attrs: BTreeMap<String, String>,
}

/// A configured cache location.
///
/// The same entry renders differently as import and export: a local export
/// pins compression and mode attributes so re-imports are cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// Cache stored in a local directory.
    Local { path: String },
    /// Cache stored as an image in a registry.
    Registry { reference: String },
    /// GitHub Actions cache service.
    Gha { url: String, token: String },
    /// S3-compatible bucket.
    S3 { region: String, bucket: String },
    /// Azure blob storage container.
    Azure { account_url: String },
}

impl CacheEntry {
    /// Renders the entry as a cache import.
    #[must_use]
    pub fn to_import(&self) -> CacheOptionsEntry {
        match self {
            Self::Local { path } => CacheOptionsEntry {
                kind: "local".to_string(),
                attrs: [("src".to_string(), path.clone())].into(),
            },
            Self::Registry { reference } => CacheOptionsEntry {
                kind: "registry".to_string(),
                attrs: [("ref".to_string(), reference.clone())].into(),
            },
            Self::Gha { url, token } => CacheOptionsEntry {
                kind: "gha".to_string(),
                attrs: [
                    ("url".to_string(), url.clone()),
                    ("token".to_string(), token.clone()),
                ]
                .into(),
            },
            Self::S3 { region, bucket } => CacheOptionsEntry {
                kind: "s3".to_string(),
                attrs: [
                    ("region".to_string(), region.clone()),
                    ("bucket".to_string(), bucket.clone()),
                ]
                .into(),
            },
            Self::Azure { account_url } => CacheOptionsEntry {
                kind: "azure".to_string(),
                attrs: [("account_url".to_string(), account_url.clone())].into(),
            },
        }
    }

    /// Renders the entry as a cache export.
    #[must_use]
    pub fn to_export(&self) -> CacheOptionsEntry {
        match self {
            Self::Local { path } => CacheOptionsEntry {
                kind: "local".to_string(),
                attrs: [
                    ("dest".to_string(), path.clone()),
                    ("compression".to_string(), "uncompressed".to_string()),
                    ("oci-mediatypes".to_string(), "true".to_string()),
                    ("mode".to_string(), "max".to_string()),
                ]
                .into(),
            },
            Self::Registry { reference } => CacheOptionsEntry {
                kind: "registry".to_string(),
                attrs: [
                    ("ref".to_string(), reference.clone()),
                    ("mode".to_string(), "max".to_string()),
                ]
                .into(),
            },
            Self::Gha { url, token } => CacheOptionsEntry {
                kind: "gha".to_string(),
                attrs: [
                    ("url".to_string(), url.clone()),
                    ("token".to_string(), token.clone()),
                    ("mode".to_string(), "max".to_string()),
                ]
                .into(),
            },
            Self::S3 { region, bucket } => CacheOptionsEntry {
                kind: "s3".to_string(),
                attrs: [
                    ("region".to_string(), region.clone()),
                    ("bucket".to_string(), bucket.clone()),
                    ("mode".to_string(), "max".to_string()),
                ]
                .into(),
            },
            Self::Azure { account_url } => CacheOptionsEntry {
                kind: "azure".to_string(),
                attrs: [
                    ("account_url".to_string(), account_url.clone()),
                    ("mode".to_string(), "max".to_string()),
                ]
                .into(),
            },
        }
    }
}

// ============================================================================
// Export targets
// ============================================================================

/// Result export kinds understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Image,
    Local,
    Tar,
    Oci,
}

impl ExportKind {
    /// Wire rendering of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Local => "local",
            Self::Tar => "tar",
            Self::Oci => "oci",
        }
    }
}

/// One configured result export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSpec {
    pub kind: ExportKind,
    pub attrs: BTreeMap<String, String>,
    /// Directory or file the exported result lands in, for filesystem kinds.
    pub destination: Option<PathBuf>,
}

impl ExportSpec {
    /// Export to a local path.
    ///
    /// A path ending in `.tar` switches to the tar rendering of the chosen
    /// layout; `oci` selects an OCI layout instead of a plain filesystem.
    #[must_use]
    pub fn local(path: impl Into<PathBuf>, oci: bool) -> Self {
        let path: PathBuf = path.into();
        let mut kind = ExportKind::Local;
        let mut attrs = BTreeMap::new();

        if oci {
            kind = ExportKind::Oci;
            attrs.insert("tar".to_string(), "false".to_string());
        }
        if path.extension().is_some_and(|ext| ext == "tar") {
            if kind == ExportKind::Local {
                kind = ExportKind::Tar;
            } else {
                attrs.insert("tar".to_string(), "true".to_string());
            }
        }

        Self {
            kind,
            attrs,
            destination: Some(path),
        }
    }

    /// Export as an image pushed under `name`.
    #[must_use]
    pub fn image(name: impl Into<String>, push: bool) -> Self {
        Self {
            kind: ExportKind::Image,
            attrs: [
                ("name".to_string(), name.into()),
                ("push".to_string(), push.to_string()),
                ("compression".to_string(), "estargz".to_string()),
                ("oci-mediatypes".to_string(), "true".to_string()),
            ]
            .into(),
            destination: None,
        }
    }
}

// ============================================================================
// Attachments
// ============================================================================

/// One SSH agent forwarded to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshAgentConfig {
    /// Identifier build steps use to select this agent.
    pub id: String,
    /// Agent socket paths or key files.
    pub paths: Vec<String>,
}

/// One secret made available to build steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSource {
    /// Identifier build steps use to request this secret.
    pub id: String,
    /// File the secret is read from.
    pub file_path: Option<PathBuf>,
    /// Environment variable the secret is read from.
    pub env: Option<String>,
}

/// One registry credential forwarded for pulls and pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredential {
    pub server_address: String,
    pub username: String,
    pub password: String,
    /// Pre-encoded auth token, when the registry uses one.
    pub auth: String,
}

/// Capabilities attached to the submission.
///
/// A closed set: the engine-facing serialization matches on these variants
/// exhaustively, and nothing downstream probes attachment types at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// Forwarded SSH agents.
    SshAgents(Vec<SshAgentConfig>),
    /// Forwarded secrets.
    Secrets(Vec<SecretSource>),
    /// Registry credentials.
    RegistryAuth(Vec<RegistryCredential>),
}

// ============================================================================
// Local paths
// ============================================================================

/// Session-scoped registry of named local paths.
///
/// Graph producers refer to local directories by name; this table assigns
/// stable `folderN` names in first-use order and renders the name-to-path
/// map the submission carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalPaths {
    next: usize,
    names: BTreeMap<String, String>,
    paths: BTreeMap<String, String>,
}

impl LocalPaths {
    /// Returns the name for `path`, assigning the next free one on first use.
    pub fn name_for(&mut self, path: &str) -> String {
        if let Some(name) = self.names.get(path) {
            return name.clone();
        }
        self.next += 1;
        let name = format!("folder{}", self.next);
        self.names.insert(path.to_string(), name.clone());
        self.paths.insert(name.clone(), path.to_string());
        name
    }

    /// Name-to-path map, as carried by the submission.
    #[must_use]
    pub fn dump(&self) -> &BTreeMap<String, String> {
        &self.paths
    }
}

// ============================================================================
// Session
// ============================================================================

/// Everything one submission needs besides the graph.
#[derive(Debug, Clone)]
pub struct BuildSession {
    /// Where the engine lives.
    pub endpoint: EngineEndpoint,
    /// Unique reference identifying this submission.
    pub reference: String,
    /// Privileges granted to this build.
    pub entitlements: Vec<Entitlement>,
    /// Cache locations consulted before executing nodes.
    pub cache_imports: Vec<CacheEntry>,
    /// Cache locations populated from this build.
    pub cache_exports: Vec<CacheEntry>,
    /// Result exports.
    pub exports: Vec<ExportSpec>,
    /// Options forwarded to the engine-side graph interpreter.
    pub frontend_opts: BTreeMap<String, String>,
    /// Named local paths referenced by the graph.
    pub locals: LocalPaths,
    /// Where to persist the harvested result document, if anywhere.
    pub metadata_path: Option<PathBuf>,
    ssh: Vec<SshAgentConfig>,
    secrets: Vec<SecretSource>,
    registry_credentials: Vec<RegistryCredential>,
}

impl BuildSession {
    /// Creates a session for `endpoint` with a fresh submission reference.
    #[must_use]
    pub fn new(endpoint: EngineEndpoint) -> Self {
        Self {
            endpoint,
            reference: uuid::Uuid::new_v4().simple().to_string(),
            entitlements: Vec::new(),
            cache_imports: Vec::new(),
            cache_exports: Vec::new(),
            exports: Vec::new(),
            frontend_opts: BTreeMap::new(),
            locals: LocalPaths::default(),
            metadata_path: None,
            ssh: Vec::new(),
            secrets: Vec::new(),
            registry_credentials: Vec::new(),
        }
    }

    /// Grants or revokes host-network access.
    pub fn allow_network_host(&mut self, allow: bool) {
        toggle(&mut self.entitlements, Entitlement::NetworkHost, allow);
    }

    /// Grants or revokes unsandboxed execution.
    pub fn allow_insecure(&mut self, allow: bool) {
        toggle(&mut self.entitlements, Entitlement::SecurityInsecure, allow);
    }

    /// Forwards an SSH agent under `id`.
    pub fn add_ssh(&mut self, id: impl Into<String>, paths: Vec<String>) {
        self.ssh.push(SshAgentConfig {
            id: id.into(),
            paths,
        });
    }

    /// Makes a secret available under `id`, from a file, an environment
    /// variable, or both.
    pub fn add_secret(
        &mut self,
        id: impl Into<String>,
        file_path: Option<PathBuf>,
        env: Option<String>,
    ) {
        self.secrets.push(SecretSource {
            id: id.into(),
            file_path,
            env,
        });
    }

    /// Adds a registry credential.
    pub fn login(&mut self, credential: RegistryCredential) {
        self.registry_credentials.push(credential);
    }

    /// Assembles the attachment list for submission.
    ///
    /// When no SSH agent was configured, the ambient `SSH_AUTH_SOCK` agent
    /// is forwarded under the id `default`; without either, ssh-forwarded
    /// sources will fail and a warning is logged.
    #[must_use]
    pub fn attachments(&self) -> Vec<Attachment> {
        let ambient = env::var("SSH_AUTH_SOCK").ok().filter(|sock| !sock.is_empty());
        self.attachments_with_ambient_agent(ambient)
    }

    fn attachments_with_ambient_agent(&self, ambient: Option<String>) -> Vec<Attachment> {
        let mut out = Vec::new();

        let mut ssh = self.ssh.clone();
        if let Some(sock) = ambient {
            ssh.push(SshAgentConfig {
                id: "default".to_string(),
                paths: vec![sock],
            });
        }
        if ssh.is_empty() {
            warn!(
                "no SSH agent configured and SSH_AUTH_SOCK is not set; \
                 ssh-forwarded sources (for example git+ssh) will not work"
            );
        } else {
            out.push(Attachment::SshAgents(ssh));
        }

        if !self.secrets.is_empty() {
            out.push(Attachment::Secrets(self.secrets.clone()));
        }
        if !self.registry_credentials.is_empty() {
            out.push(Attachment::RegistryAuth(self.registry_credentials.clone()));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> BuildSession {
        BuildSession::new(EngineEndpoint::parse("unix:///run/engine.sock").expect("parse failed"))
    }

    #[test]
    fn test_parse_unix_endpoint() {
        let endpoint = EngineEndpoint::parse("unix:///run/engine.sock").expect("parse failed");
        assert_eq!(
            endpoint.address,
            EndpointAddress::Unix(PathBuf::from("/run/engine.sock"))
        );
        assert_eq!(endpoint.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert!(!endpoint.requires_tls());
    }

    #[test]
    fn test_parse_tcp_and_tls_endpoints() {
        let tcp = EngineEndpoint::parse("tcp://engine.internal:9340").expect("parse failed");
        assert_eq!(
            tcp.address,
            EndpointAddress::Tcp {
                host: "engine.internal".to_string(),
                port: 9340,
                tls: false,
            }
        );

        let tls = EngineEndpoint::parse("tls://engine.internal:9340").expect("parse failed");
        assert!(tls.requires_tls());
    }

    #[test]
    fn test_endpoint_address_display_round_trips_scheme() {
        for url in [
            "unix:///run/engine.sock",
            "tcp://engine.internal:9340",
            "tls://engine.internal:9340",
        ] {
            let endpoint = EngineEndpoint::parse(url).expect("parse failed");
            assert_eq!(endpoint.address.to_string(), url);
        }
    }

    #[test]
    fn test_parse_rejects_bad_endpoints() {
        for url in ["http://x", "unix://", "tcp://nohost", "tcp://:90", "tcp://h:notaport"] {
            assert!(EngineEndpoint::parse(url).is_err(), "{url} should not parse");
        }
    }

    #[test]
    fn test_entitlement_toggle_is_duplicate_free() {
        let mut s = session();
        s.allow_network_host(true);
        s.allow_network_host(true);
        assert_eq!(s.entitlements, vec![Entitlement::NetworkHost]);

        s.allow_insecure(true);
        s.allow_network_host(false);
        assert_eq!(s.entitlements, vec![Entitlement::SecurityInsecure]);

        // Revoking an absent entitlement is a no-op.
        s.allow_network_host(false);
        assert_eq!(s.entitlements, vec![Entitlement::SecurityInsecure]);
    }

    #[test]
    fn test_local_cache_entry_shapes() {
        let entry = CacheEntry::Local {
            path: "/var/cache/build".to_string(),
        };

        let import = entry.to_import();
        assert_eq!(import.kind, "local");
        assert_eq!(import.attrs["src"], "/var/cache/build");

        let export = entry.to_export();
        assert_eq!(export.kind, "local");
        assert_eq!(export.attrs["dest"], "/var/cache/build");
        assert_eq!(export.attrs["compression"], "uncompressed");
        assert_eq!(export.attrs["oci-mediatypes"], "true");
        assert_eq!(export.attrs["mode"], "max");
    }

    #[test]
    fn test_registry_cache_entry_shapes() {
        let entry = CacheEntry::Registry {
            reference: "registry.example/cache:main".to_string(),
        };
        assert_eq!(entry.to_import().attrs["ref"], "registry.example/cache:main");
        assert_eq!(entry.to_export().attrs["mode"], "max");
    }

    #[test]
    fn test_remote_bucket_cache_entry_shapes() {
        let s3 = CacheEntry::S3 {
            region: "eu-west-1".to_string(),
            bucket: "build-cache".to_string(),
        };
        let import = s3.to_import();
        assert_eq!(import.kind, "s3");
        assert_eq!(import.attrs["bucket"], "build-cache");
        assert!(!import.attrs.contains_key("mode"));
        assert_eq!(s3.to_export().attrs["mode"], "max");

        let azure = CacheEntry::Azure {
            account_url: "https://acct.blob.example".to_string(),
        };
        assert_eq!(azure.to_import().kind, "azure");
        assert_eq!(
            azure.to_export().attrs["account_url"],
            "https://acct.blob.example"
        );
    }

    #[test]
    fn test_local_export_kind_switches_on_tar_suffix() {
        let plain = ExportSpec::local("/tmp/out", false);
        assert_eq!(plain.kind, ExportKind::Local);
        assert!(plain.attrs.is_empty());

        let oci = ExportSpec::local("/tmp/out", true);
        assert_eq!(oci.kind, ExportKind::Oci);
        assert_eq!(oci.attrs["tar"], "false");

        let tar = ExportSpec::local("/tmp/out.tar", false);
        assert_eq!(tar.kind, ExportKind::Tar);

        let oci_tar = ExportSpec::local("/tmp/out.tar", true);
        assert_eq!(oci_tar.kind, ExportKind::Oci);
        assert_eq!(oci_tar.attrs["tar"], "true");
    }

    #[test]
    fn test_image_export_attrs() {
        let image = ExportSpec::image("registry.example/app:latest", true);
        assert_eq!(image.kind, ExportKind::Image);
        assert_eq!(image.attrs["name"], "registry.example/app:latest");
        assert_eq!(image.attrs["push"], "true");
        assert_eq!(image.attrs["compression"], "estargz");
        assert!(image.destination.is_none());
    }

    #[test]
    fn test_local_paths_assign_stable_names() {
        let mut locals = LocalPaths::default();
        assert_eq!(locals.name_for("/home/dev/src"), "folder1");
        assert_eq!(locals.name_for("/home/dev/assets"), "folder2");
        assert_eq!(locals.name_for("/home/dev/src"), "folder1");

        let dump = locals.dump();
        assert_eq!(dump["folder1"], "/home/dev/src");
        assert_eq!(dump["folder2"], "/home/dev/assets");
    }

    #[test]
    fn test_session_references_are_unique() {
        let a = session();
        let b = session();
        assert_ne!(a.reference, b.reference);
        assert!(!a.reference.is_empty());
    }

    #[test]
    fn test_ambient_ssh_agent_is_appended_as_default() {
        let s = session();
        let attachments = s.attachments_with_ambient_agent(Some("/run/ssh-agent.sock".to_string()));
        let Some(Attachment::SshAgents(agents)) = attachments.first() else {
            panic!("expected ssh agents attachment");
        };
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "default");
        assert_eq!(agents[0].paths, vec!["/run/ssh-agent.sock".to_string()]);
    }

    #[test]
    fn test_no_agents_yields_no_ssh_attachment() {
        let s = session();
        assert!(s.attachments_with_ambient_agent(None).is_empty());
    }

    #[test]
    fn test_configured_agents_precede_ambient() {
        let mut s = session();
        s.add_ssh("deploy", vec!["/keys/deploy".to_string()]);
        s.add_secret("token", None, Some("API_TOKEN".to_string()));
        s.login(RegistryCredential {
            server_address: "registry.example".to_string(),
            username: "ci".to_string(),
            password: "hunter2".to_string(),
            auth: String::new(),
        });

        let attachments = s.attachments_with_ambient_agent(Some("/run/agent".to_string()));
        assert_eq!(attachments.len(), 3);
        let Attachment::SshAgents(agents) = &attachments[0] else {
            panic!("expected ssh agents first");
        };
        assert_eq!(agents[0].id, "deploy");
        assert_eq!(agents[1].id, "default");
        assert!(matches!(attachments[1], Attachment::Secrets(_)));
        assert!(matches!(attachments[2], Attachment::RegistryAuth(_)));
    }

    #[test]
    fn test_tls_material_debug_redacts_key() {
        let material = TlsMaterial::new(b"ca".to_vec())
            .with_client_auth(b"cert".to_vec(), b"very secret key".to_vec());
        let rendered = format!("{material:?}");
        assert!(!rendered.contains("very secret key"));
        assert!(rendered.contains("redacted"));
    }
}
