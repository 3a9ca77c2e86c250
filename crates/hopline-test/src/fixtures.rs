//! Test fixtures for common types.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use hopline_instance::{
    ExternalConfigBean, HopDefinition, NaiveBean, NativeBean, ProtocolBean, ShadowQuicBean,
};
use hopline_plugins::{ProviderInfo, ProviderMetadata};

/// Package name the test host treats as its own.
pub const TEST_HOST_PACKAGE: &str = "io.hopline.test";

/// A minimal primary-engine config the real core would accept.
#[must_use]
pub fn core_config() -> String {
    r#"{"outbounds":[{"protocol":"socks","tag":"proxy"}]}"#.to_owned()
}

/// A naive bean pointing at `server`.
#[must_use]
pub fn naive_bean(server: &str) -> NaiveBean {
    NaiveBean {
        server_address: server.to_owned(),
        server_port: 443,
        proto: "https".into(),
        username: "user".into(),
        password: "secret".into(),
        sni: String::new(),
        extra_headers: Vec::new(),
        certificate: String::new(),
        insecure_concurrency: 0,
        no_post_quantum: false,
        log: false,
        final_address: None,
        final_port: None,
    }
}

/// A shadowquic bean pointing at `server`.
#[must_use]
pub fn shadowquic_bean(server: &str) -> ShadowQuicBean {
    ShadowQuicBean {
        server_address: server.to_owned(),
        server_port: 443,
        username: "user".into(),
        password: "secret".into(),
        sni: String::new(),
        alpn: vec!["h3".into()],
        congestion_control: "bbr".into(),
        zero_rtt: false,
        udp_over_stream: false,
        certificate: String::new(),
        log_level: "error".into(),
        final_address: None,
        final_port: None,
    }
}

/// A naive hop on `port`.
#[must_use]
pub fn naive_hop(port: u16, server: &str) -> HopDefinition {
    HopDefinition {
        port,
        bean: ProtocolBean::Naive(naive_bean(server)),
    }
}

/// A shadowquic hop on `port`.
#[must_use]
pub fn shadowquic_hop(port: u16, server: &str) -> HopDefinition {
    HopDefinition {
        port,
        bean: ProtocolBean::ShadowQuic(shadowquic_bean(server)),
    }
}

/// A hop the primary engine handles itself.
#[must_use]
pub fn native_hop(port: u16, protocol: &str) -> HopDefinition {
    HopDefinition {
        port,
        bean: ProtocolBean::Native(NativeBean {
            protocol: protocol.to_owned(),
        }),
    }
}

/// A hop carried by a sub-engine of type `kind`.
#[must_use]
pub fn external_hop(port: u16, kind: &str, config: &str) -> HopDefinition {
    HopDefinition {
        port,
        bean: ProtocolBean::External(ExternalConfigBean {
            kind: kind.to_owned(),
            config: config.to_owned(),
        }),
    }
}

/// Exported provider of `plugins` in `package`, installed under `lib_dir`.
#[must_use]
pub fn provider(package: &str, plugins: &[&str], lib_dir: &Path) -> ProviderInfo {
    ProviderInfo {
        package: package.to_owned(),
        authority: format!("{package}.binary"),
        exported: true,
        label: package.to_owned(),
        plugins: plugins.iter().map(|p| (*p).to_owned()).collect(),
        package_root: lib_dir.to_path_buf(),
        native_library_dir: lib_dir.to_path_buf(),
        metadata: ProviderMetadata::default(),
    }
}

/// Like [`provider`], advertising `executable` relative to `lib_dir` and
/// protocol `version`.
#[must_use]
pub fn direct_provider(
    package: &str,
    plugin: &str,
    lib_dir: &Path,
    executable: &str,
    version: &str,
) -> ProviderInfo {
    let mut info = provider(package, &[plugin], lib_dir);
    info.metadata.executable_path = Some(executable.to_owned());
    info.metadata.version = Some(version.to_owned());
    info
}

/// Write an executable shell script at `dir/name`.
///
/// # Panics
///
/// Panics if the file cannot be written.
#[must_use]
pub fn write_executable(dir: &Path, name: &str) -> PathBuf {
    let path = write_plain_file(dir, name, b"#!/bin/sh\nexit 0\n");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to mark fixture executable");
    path
}

/// Write a non-executable file at `dir/name`.
///
/// # Panics
///
/// Panics if the file cannot be written.
#[must_use]
pub fn write_plain_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create fixture directory");
    }
    std::fs::write(&path, content).expect("failed to write fixture file");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
        .expect("failed to set fixture permissions");
    path
}
