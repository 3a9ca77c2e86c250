//! Protocol beans and config builders for plugin-backed hops.
//!
//! [`ProtocolBean`] is closed: every capability query matches on all
//! variants, so a new protocol cannot be added without deciding how it is
//! launched.

use std::path::Path;

use hopline_plugins::KnownPlugin;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_yaml::{Mapping, Value as YamlValue};

use crate::cache::CacheFileFactory;
use crate::error::{InstanceError, InstanceResult};

/// Loopback address every hop listens on.
pub const LOCALHOST: &str = "127.0.0.1";

/// External config type handled by the primary engine itself.
pub const NATIVE_OUTBOUND_KIND: &str = "v2ray_outbound";

/// `host:port`, bracketing IPv6 literals.
#[must_use]
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn default_server_port() -> u16 {
    443
}

fn default_naive_proto() -> String {
    "https".to_owned()
}

fn default_log_level() -> String {
    "error".to_owned()
}

/// NaïveProxy outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaiveBean {
    /// Server host name or address.
    pub server_address: String,
    /// Server port.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// `https` or `quic`.
    #[serde(default = "default_naive_proto")]
    pub proto: String,
    /// Proxy user.
    #[serde(default)]
    pub username: String,
    /// Proxy password.
    #[serde(default)]
    pub password: String,
    /// TLS server name; also the host naive connects to.
    #[serde(default)]
    pub sni: String,
    /// Extra request headers, one per entry.
    #[serde(default)]
    pub extra_headers: Vec<String>,
    /// PEM certificate to trust instead of the configured root store.
    #[serde(default)]
    pub certificate: String,
    /// Parallel connections; 0 leaves naive's default.
    #[serde(default)]
    pub insecure_concurrency: u32,
    /// Disable post-quantum key exchange.
    #[serde(default)]
    pub no_post_quantum: bool,
    /// Enable naive's own log output.
    #[serde(default)]
    pub log: bool,
    /// Address actually dialled, when a chain routes this hop through an
    /// upstream hop.
    #[serde(default)]
    pub final_address: Option<String>,
    /// Port actually dialled.
    #[serde(default)]
    pub final_port: Option<u16>,
}

impl NaiveBean {
    fn final_address(&self) -> &str {
        self.final_address.as_deref().unwrap_or(&self.server_address)
    }

    fn final_port(&self) -> u16 {
        self.final_port.unwrap_or(self.server_port)
    }

    /// The `proxy` URI naive dials.
    ///
    /// # Errors
    ///
    /// Returns an error if the server address is empty or does not form a
    /// valid URI.
    pub fn proxy_uri(&self) -> InstanceResult<String> {
        let host = if self.sni.is_empty() {
            &self.server_address
        } else {
            &self.sni
        };
        if host.is_empty() {
            return Err(InstanceError::Build("empty server address".into()));
        }
        let invalid = |what: &str| InstanceError::Build(format!("invalid naive {what}"));

        let mut url = Url::parse(&format!(
            "{}://{}",
            self.proto,
            join_host_port(host, self.final_port())
        ))
        .map_err(|e| InstanceError::Build(format!("invalid naive server: {e}")))?;
        if !self.username.is_empty() {
            url.set_username(&self.username)
                .map_err(|()| invalid("username"))?;
        }
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|()| invalid("password"))?;
        }

        let rendered = if url.path() == "/" {
            url.as_str().trim_end_matches('/')
        } else {
            url.as_str()
        };
        // Commas delimit proxies in a naive chain.
        Ok(rendered.replace(',', "%2C"))
    }

    /// Naive JSON config listening for SOCKS on `port`.
    ///
    /// # Errors
    ///
    /// See [`proxy_uri`](Self::proxy_uri).
    pub fn build_config(&self, port: u16) -> InstanceResult<String> {
        let mut config = serde_json::Map::new();
        config.insert(
            "listen".into(),
            json!(format!("socks://{}", join_host_port(LOCALHOST, port))),
        );
        config.insert("proxy".into(), json!(self.proxy_uri()?));
        if !self.extra_headers.is_empty() {
            config.insert("extra-headers".into(), json!(self.extra_headers.join("\r\n")));
        }
        let mapped = if self.sni.is_empty() {
            &self.server_address
        } else {
            &self.sni
        };
        config.insert(
            "host-resolver-rules".into(),
            json!(format!("MAP {mapped} {}", self.final_address())),
        );
        if self.log {
            config.insert("log".into(), json!(""));
        }
        if self.insecure_concurrency > 0 {
            config.insert(
                "insecure-concurrency".into(),
                json!(self.insecure_concurrency),
            );
        }
        if self.no_post_quantum {
            config.insert("no-post-quantum".into(), json!(true));
        }

        serde_json::to_string_pretty(&serde_json::Value::Object(config))
            .map_err(|e| InstanceError::Build(e.to_string()))
    }
}

/// ShadowQUIC outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowQuicBean {
    /// Server host name or address.
    pub server_address: String,
    /// Server port.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// User name.
    #[serde(default)]
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// TLS server name.
    #[serde(default)]
    pub sni: String,
    /// ALPN protocols.
    #[serde(default)]
    pub alpn: Vec<String>,
    /// Congestion control algorithm.
    #[serde(default)]
    pub congestion_control: String,
    /// Enable 0-RTT.
    #[serde(default)]
    pub zero_rtt: bool,
    /// Carry UDP over a stream.
    #[serde(default)]
    pub udp_over_stream: bool,
    /// PEM certificate to pin; written to a cache file.
    #[serde(default)]
    pub certificate: String,
    /// ShadowQUIC log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Address actually dialled.
    #[serde(default)]
    pub final_address: Option<String>,
    /// Port actually dialled.
    #[serde(default)]
    pub final_port: Option<u16>,
}

impl ShadowQuicBean {
    /// ShadowQUIC YAML config with a SOCKS inbound on `port`. A certificate
    /// is written through `cache_files` and referenced by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be written or the config
    /// cannot be serialised.
    pub fn build_config(&self, port: u16, cache_files: &mut CacheFileFactory) -> InstanceResult<String> {
        let mut inbound = Mapping::new();
        inbound.insert("type".into(), "socks".into());
        inbound.insert("bind-addr".into(), join_host_port(LOCALHOST, port).into());

        let address = self.final_address.as_deref().unwrap_or(&self.server_address);
        let mut outbound = Mapping::new();
        outbound.insert("type".into(), "shadowquic".into());
        outbound.insert(
            "addr".into(),
            join_host_port(address, self.final_port.unwrap_or(self.server_port)).into(),
        );
        for (key, value) in [
            ("password", &self.password),
            ("username", &self.username),
            ("server-name", &self.sni),
        ] {
            if !value.is_empty() {
                outbound.insert(key.into(), value.as_str().into());
            }
        }
        if !self.alpn.is_empty() {
            outbound.insert(
                "alpn".into(),
                YamlValue::Sequence(self.alpn.iter().map(|a| a.as_str().into()).collect()),
            );
        }
        if !self.congestion_control.is_empty() {
            outbound.insert(
                "congestion-control".into(),
                self.congestion_control.as_str().into(),
            );
        }
        if self.zero_rtt {
            outbound.insert("zero-rtt".into(), true.into());
        }
        if self.udp_over_stream {
            outbound.insert("over-stream".into(), true.into());
        }
        if !self.certificate.is_empty() {
            let pem = cache_files.write("shadowquic", "pem", &self.certificate)?;
            outbound.insert("cert-path".into(), pem.display().to_string().into());
        }

        let mut config = Mapping::new();
        config.insert("inbound".into(), YamlValue::Mapping(inbound));
        config.insert("outbound".into(), YamlValue::Mapping(outbound));
        config.insert("log-level".into(), self.log_level.as_str().into());

        serde_yaml::to_string(&config).map_err(|e| InstanceError::Build(e.to_string()))
    }
}

/// A hop whose config is an opaque document for a sub-engine, or for the
/// primary engine when `kind` is [`NATIVE_OUTBOUND_KIND`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalConfigBean {
    /// Config type, naming the sub-engine.
    pub kind: String,
    /// Config document.
    pub config: String,
}

/// A hop the primary engine handles natively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeBean {
    /// Protocol name, informational.
    pub protocol: String,
}

/// How a plugin-backed hop is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginLaunch {
    /// Cache file prefix.
    pub prefix: &'static str,
    /// Config file extension.
    pub extension: &'static str,
    /// Arguments placed before the config path.
    pub args: &'static [&'static str],
}

impl PluginLaunch {
    /// `[executable, args.., config]`.
    #[must_use]
    pub fn argv(&self, executable: &Path, config: &Path) -> Vec<String> {
        std::iter::once(executable.display().to_string())
            .chain(self.args.iter().map(|a| (*a).to_owned()))
            .chain(std::iter::once(config.display().to_string()))
            .collect()
    }
}

/// Outbound protocol of one hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolBean {
    /// NaïveProxy, run through `naive-plugin`.
    Naive(NaiveBean),
    /// ShadowQUIC, run through `shadowquic-plugin`.
    #[serde(rename = "shadowquic")]
    ShadowQuic(ShadowQuicBean),
    /// Opaque external config.
    External(ExternalConfigBean),
    /// Handled by the primary engine.
    Native(NativeBean),
}

impl ProtocolBean {
    /// Plugin that runs this hop, if any.
    #[must_use]
    pub fn plugin(&self) -> Option<KnownPlugin> {
        match self {
            Self::Naive(_) => Some(KnownPlugin::Naive),
            Self::ShadowQuic(_) => Some(KnownPlugin::ShadowQuic),
            Self::External(_) | Self::Native(_) => None,
        }
    }

    /// Sub-engine type that runs this hop, if any.
    #[must_use]
    pub fn sub_engine_type(&self) -> Option<&str> {
        match self {
            Self::External(bean) if bean.kind != NATIVE_OUTBOUND_KIND => Some(bean.kind.as_str()),
            Self::External(_) | Self::Naive(_) | Self::ShadowQuic(_) | Self::Native(_) => None,
        }
    }

    /// Launch shape for plugin-backed hops.
    #[must_use]
    pub fn launch(&self) -> Option<PluginLaunch> {
        match self {
            Self::Naive(_) => Some(PluginLaunch {
                prefix: "naive",
                extension: "json",
                args: &[],
            }),
            Self::ShadowQuic(_) => Some(PluginLaunch {
                prefix: "shadowquic",
                extension: "yaml",
                args: &["-c"],
            }),
            Self::External(_) | Self::Native(_) => None,
        }
    }

    /// Certificate the plugin process should trust via `SSL_CERT_FILE`.
    #[must_use]
    pub fn trust_material(&self) -> Option<&str> {
        match self {
            Self::Naive(bean) if !bean.certificate.is_empty() => Some(bean.certificate.as_str()),
            Self::Naive(_) | Self::ShadowQuic(_) | Self::External(_) | Self::Native(_) => None,
        }
    }

    /// Plugin config payload for a hop listening on `port`; `None` for hops
    /// that are not plugin-backed.
    ///
    /// # Errors
    ///
    /// Propagates builder failures.
    pub fn build_config(
        &self,
        port: u16,
        cache_files: &mut CacheFileFactory,
    ) -> InstanceResult<Option<String>> {
        match self {
            Self::Naive(bean) => bean.build_config(port).map(Some),
            Self::ShadowQuic(bean) => bean.build_config(port, cache_files).map(Some),
            Self::External(_) | Self::Native(_) => Ok(None),
        }
    }
}
