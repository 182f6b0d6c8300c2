//! CLI command for submitting a graph to a build engine.
//!
//! Reads the serialized graph, assembles a session from the flags below, and
//! drives the solve while progress renders to stderr. Named results are
//! printed to stdout once the engine reports completion.
//!
//! # Example
//!
//! ```bash
//! gantry build --addr tcp://10.0.0.7:9432 --output ./out graph.bin
//! gantry build --image registry.example/app:latest --push < graph.bin
//! ```

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use gantry_client::harvest::DEFAULT_METADATA_FILENAME;
use gantry_client::{execute, render_results};
use gantry_core::session::{BuildSession, CacheEntry, EngineEndpoint, ExportSpec, TlsMaterial};
use tracing::debug;

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Graph file to read (stdin when omitted)
    pub file: Option<PathBuf>,

    /// Engine endpoint URL (unix://, tcp://, or tls://).
    ///
    /// Falls back to `$GANTRY_ENGINE`, then to the runtime-dir socket
    /// `unix://$XDG_RUNTIME_DIR/gantry/engine.sock`.
    #[arg(long)]
    pub addr: Option<String>,

    /// Connection deadline in seconds
    #[arg(long, value_name = "SECONDS")]
    pub connect_timeout: Option<u64>,

    /// Disable cache reuse for every operation in the graph
    #[arg(long)]
    pub no_cache: bool,

    /// Record every progress event as a JSON line in this file
    #[arg(long, value_name = "PATH")]
    pub trace: Option<PathBuf>,

    /// Export the result to this directory (or tarball when it ends in .tar)
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Lay out --output as an OCI image layout
    #[arg(long)]
    pub oci: bool,

    /// Export the result as an image under this name
    #[arg(long, value_name = "NAME")]
    pub image: Option<String>,

    /// Push the exported image to its registry
    #[arg(long)]
    pub push: bool,

    /// Cache source: local=<dir>, registry=<ref>, gha=<url>,<token>,
    /// s3=<region>,<bucket>, or azure=<account-url> (repeatable)
    #[arg(long = "cache-from", value_name = "SPEC")]
    pub cache_from: Vec<String>,

    /// Cache destination, same syntax as --cache-from (repeatable)
    #[arg(long = "cache-to", value_name = "SPEC")]
    pub cache_to: Vec<String>,

    /// Directory backing the graph's next local-folder reference
    /// (repeatable, assigned folder1, folder2, ... in order)
    #[arg(long = "local", value_name = "PATH")]
    pub locals: Vec<String>,

    /// Frontend option as key=value (repeatable)
    #[arg(long = "opt", value_name = "KEY=VALUE")]
    pub opts: Vec<String>,

    /// Grant an entitlement: network.host or security.insecure (repeatable)
    #[arg(long = "allow", value_name = "ENTITLEMENT")]
    pub allow: Vec<String>,

    /// Forward an SSH agent: a bare agent id, or <id>=<path>[,<path>...]
    /// (repeatable)
    #[arg(long = "ssh", value_name = "SPEC")]
    pub ssh: Vec<String>,

    /// Expose a secret: id=<name>[,src=<path>][,env=<var>] (repeatable)
    #[arg(long = "secret", value_name = "SPEC")]
    pub secret: Vec<String>,

    /// Where to write the harvested result document
    #[arg(long, value_name = "PATH", default_value = DEFAULT_METADATA_FILENAME)]
    pub meta: PathBuf,

    /// Skip writing the result document
    #[arg(long)]
    pub no_meta: bool,

    /// CA certificate bundle for tls:// endpoints (PEM)
    #[arg(long, value_name = "PATH")]
    pub cacert: Option<PathBuf>,

    /// Client certificate for mutual TLS (PEM)
    #[arg(long, value_name = "PATH")]
    pub cert: Option<PathBuf>,

    /// Client private key for mutual TLS (PEM)
    #[arg(long, value_name = "PATH")]
    pub key: Option<PathBuf>,
}

/// Runs `gantry build`.
pub fn run(args: BuildArgs) -> Result<()> {
    let mut graph = super::read_graph(args.file.as_deref())?;
    if args.no_cache {
        graph.bypass_cache();
    }

    let session = assemble_session(&args)?;
    debug!(nodes = graph.len(), endpoint = %session.endpoint.address, "submitting build");

    let trace_out = match &args.trace {
        Some(path) => Some(
            File::create(path)
                .with_context(|| format!("failed to create trace file {}", path.display()))?,
        ),
        None => None,
    };

    let outcome = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(execute(&graph, &session, io::stderr(), trace_out))?;

    let stdout = io::stdout();
    render_results(&outcome, &mut stdout.lock()).context("failed to print results")?;
    Ok(())
}

fn assemble_session(args: &BuildArgs) -> Result<BuildSession> {
    let endpoint = resolve_endpoint(args)?;
    let mut session = BuildSession::new(endpoint);

    for spec in &args.cache_from {
        session.cache_imports.push(parse_cache_spec(spec)?);
    }
    for spec in &args.cache_to {
        session.cache_exports.push(parse_cache_spec(spec)?);
    }

    if let Some(path) = &args.output {
        session.exports.push(ExportSpec::local(path.clone(), args.oci));
    }
    if let Some(name) = &args.image {
        session.exports.push(ExportSpec::image(name.clone(), args.push));
    }

    for spec in &args.opts {
        let (key, value) =
            parse_key_value(spec).with_context(|| format!("invalid --opt {spec:?}"))?;
        session.frontend_opts.insert(key, value);
    }

    for name in &args.allow {
        match name.as_str() {
            "network.host" => session.allow_network_host(true),
            "security.insecure" => session.allow_insecure(true),
            other => {
                bail!("unknown entitlement {other:?} (expected network.host or security.insecure)")
            },
        }
    }

    for spec in &args.ssh {
        let (id, paths) = parse_ssh_spec(spec);
        session.add_ssh(id, paths);
    }
    for spec in &args.secret {
        let (id, src, env) = parse_secret_spec(spec)?;
        session.add_secret(id, src, env);
    }

    for path in &args.locals {
        session.locals.name_for(path);
    }

    if !args.no_meta {
        session.metadata_path = Some(args.meta.clone());
    }

    Ok(session)
}

fn resolve_endpoint(args: &BuildArgs) -> Result<EngineEndpoint> {
    let url = args
        .addr
        .clone()
        .or_else(|| std::env::var("GANTRY_ENGINE").ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| default_socket_url(std::env::var("XDG_RUNTIME_DIR").ok().as_deref()));

    let mut endpoint = EngineEndpoint::parse(&url)?;

    if let Some(seconds) = args.connect_timeout {
        endpoint = endpoint.with_connect_timeout(Duration::from_secs(seconds));
    }

    match (&args.cacert, &args.cert, &args.key) {
        (None, None, None) => {},
        (Some(ca_path), cert, key) => {
            let mut material = TlsMaterial::new(read_pem(ca_path)?);
            match (cert, key) {
                (Some(cert_path), Some(key_path)) => {
                    material =
                        material.with_client_auth(read_pem(cert_path)?, read_pem(key_path)?);
                },
                (None, None) => {},
                _ => bail!("--cert and --key must be used together"),
            }
            endpoint = endpoint.with_tls(material);
        },
        _ => bail!("--cert and --key require --cacert"),
    }

    Ok(endpoint)
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Default engine socket under the runtime dir, `/tmp` when unset.
fn default_socket_url(runtime_dir: Option<&str>) -> String {
    runtime_dir.map_or_else(
        || "unix:///tmp/gantry/engine.sock".to_string(),
        |dir| format!("unix://{dir}/gantry/engine.sock"),
    )
}

fn parse_key_value(spec: &str) -> Result<(String, String)> {
    match spec.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("expected key=value, got {spec:?}"),
    }
}

/// Parses one `--cache-from` / `--cache-to` value.
fn parse_cache_spec(spec: &str) -> Result<CacheEntry> {
    let Some((kind, rest)) = spec.split_once('=') else {
        bail!("expected kind=value, got {spec:?}");
    };

    let entry = match kind {
        "local" => CacheEntry::Local {
            path: rest.to_string(),
        },
        "registry" => CacheEntry::Registry {
            reference: rest.to_string(),
        },
        "gha" => {
            let Some((url, token)) = rest.split_once(',') else {
                bail!("gha cache needs <url>,<token>, got {rest:?}");
            };
            CacheEntry::Gha {
                url: url.to_string(),
                token: token.to_string(),
            }
        },
        "s3" => {
            let Some((region, bucket)) = rest.split_once(',') else {
                bail!("s3 cache needs <region>,<bucket>, got {rest:?}");
            };
            CacheEntry::S3 {
                region: region.to_string(),
                bucket: bucket.to_string(),
            }
        },
        "azure" => CacheEntry::Azure {
            account_url: rest.to_string(),
        },
        other => bail!("unknown cache kind {other:?} (expected local, registry, gha, s3, or azure)"),
    };
    Ok(entry)
}

/// Parses one `--ssh` value: a bare agent id, or `id=path[,path...]`.
fn parse_ssh_spec(spec: &str) -> (String, Vec<String>) {
    match spec.split_once('=') {
        Some((id, paths)) => (
            id.to_string(),
            paths.split(',').map(str::to_string).collect(),
        ),
        None => (spec.to_string(), Vec::new()),
    }
}

/// Parses one `--secret` value: `id=<name>[,src=<path>][,env=<var>]`.
fn parse_secret_spec(spec: &str) -> Result<(String, Option<PathBuf>, Option<String>)> {
    let mut id = None;
    let mut src = None;
    let mut env = None;

    for part in spec.split(',') {
        let (key, value) =
            parse_key_value(part).with_context(|| format!("invalid --secret {spec:?}"))?;
        match key.as_str() {
            "id" => id = Some(value),
            "src" => src = Some(PathBuf::from(value)),
            "env" => env = Some(value),
            other => bail!("unknown secret field {other:?} in {spec:?}"),
        }
    }

    let Some(id) = id else {
        bail!("--secret needs an id field, got {spec:?}");
    };
    if src.is_none() && env.is_none() {
        bail!("--secret {id:?} needs src=<path> or env=<var>");
    }
    Ok((id, src, env))
}
