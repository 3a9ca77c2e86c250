//! Integration tests for plugin discovery and resolution.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use hopline_plugins::{
    EntryMode, PluginError, PluginOptions, PluginRegistry, PluginResolver, ResolutionStrategy,
};
use hopline_test::{
    MockPackageHost, TEST_HOST_PACKAGE, direct_provider, provider, write_executable,
    write_plain_file,
};
use tempfile::TempDir;

struct Fixture {
    host: Arc<MockPackageHost>,
    resolver: PluginResolver,
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(MockPackageHost::new(TEST_HOST_PACKAGE));
        let registry = Arc::new(PluginRegistry::new(host.clone()));
        let resolver = PluginResolver::new(registry, &dir.path().join("no_backup"));
        Self {
            host,
            resolver,
            dir,
        }
    }

    fn lib(&self, package: &str) -> std::path::PathBuf {
        let lib = self.dir.path().join("packages").join(package);
        std::fs::create_dir_all(&lib).unwrap();
        lib
    }
}

#[test]
fn two_providers_for_one_id_conflict_without_side_effects() {
    let fx = Fixture::new();
    for package in ["org.example.tuic", "org.other.tuic"] {
        let lib = fx.lib(package);
        let mut info = provider(package, &["tuic5-plugin"], &lib);
        info.metadata.executable_path = Some("libtuic.so".into());
        fx.host.add_provider(info);
        fx.host.add_entry(
            &format!("{package}.binary"),
            "tuic5-plugin",
            EntryMode::Int(0o755),
            b"#!/bin/sh\n",
        );
    }

    let err = fx
        .resolver
        .resolve("tuic5-plugin", &PluginOptions::with_id("tuic5-plugin"))
        .unwrap_err();
    match &err {
        PluginError::Conflict { plugin, packages } => {
            assert_eq!(plugin, "tuic5-plugin");
            assert_eq!(packages.len(), 2);
            assert!(packages.contains(&"org.example.tuic".to_owned()));
            assert!(packages.contains(&"org.other.tuic".to_owned()));
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("org.example.tuic"));
    assert!(err.to_string().contains("org.other.tuic"));

    assert_eq!(fx.host.delegate_calls(), 0);
    assert_eq!(fx.host.entry_queries(), 0);
    assert!(!fx.resolver.staging_dir().exists());
}

#[test]
fn unknown_id_is_not_found() {
    let fx = Fixture::new();
    let lib = fx.lib("org.example.naive");
    fx.host
        .add_provider(direct_provider("org.example.naive", "naive-plugin", &lib, "libnaive.so", "1"));

    for id in ["hysteria2-plugin", "none"] {
        let err = fx.resolver.resolve(id, &PluginOptions::new()).unwrap_err();
        assert!(matches!(err, PluginError::NotFound { ref plugin } if plugin == id));
    }
}

#[test]
fn non_executable_direct_falls_through_to_delegated() {
    let fx = Fixture::new();
    let lib = fx.lib("org.example.naive");
    write_plain_file(&lib, "libnaive.so", b"not executable");
    let delegated = write_executable(&fx.dir.path().join("delegate"), "naive");
    fx.host
        .add_provider(direct_provider("org.example.naive", "naive-plugin", &lib, "libnaive.so", "2.1"));
    fx.host
        .set_delegate("org.example.naive.binary", Ok(delegated.clone()));

    let descriptor = fx
        .resolver
        .resolve("naive-plugin", &PluginOptions::with_id("naive-plugin"))
        .unwrap();
    assert_eq!(descriptor.strategy, ResolutionStrategy::Delegated);
    assert_eq!(descriptor.path, delegated);
    assert_eq!(descriptor.version, 2);
    assert_eq!(fx.host.entry_queries(), 0);
}

#[test]
fn non_executable_direct_falls_through_to_streamed() {
    let fx = Fixture::new();
    let lib = fx.lib("org.example.naive");
    write_plain_file(&lib, "libnaive.so", b"not executable");
    fx.host
        .add_provider(direct_provider("org.example.naive", "naive-plugin", &lib, "libnaive.so", "2"));
    fx.host.add_entry(
        "org.example.naive.binary",
        "naive-plugin",
        EntryMode::Text("755".into()),
        b"#!/bin/sh\nexit 0\n",
    );

    let descriptor = fx
        .resolver
        .resolve("naive-plugin", &PluginOptions::with_id("naive-plugin"))
        .unwrap();
    assert_eq!(descriptor.strategy, ResolutionStrategy::Streamed);
    assert!(descriptor.path.starts_with(fx.resolver.staging_dir().canonicalize().unwrap()));
    let mode = std::fs::metadata(&descriptor.path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn exhausted_strategies_surface_first_failure() {
    let fx = Fixture::new();
    let lib = fx.lib("org.example.naive");
    write_plain_file(&lib, "libnaive.so", b"not executable");
    fx.host
        .add_provider(direct_provider("org.example.naive", "naive-plugin", &lib, "libnaive.so", "2"));
    fx.host
        .set_delegate("org.example.naive.binary", Err("delegate crashed".into()));
    fx.host.add_entry(
        "org.example.naive.binary",
        "share/readme",
        EntryMode::Int(0o644),
        b"doc",
    );

    let err = fx
        .resolver
        .resolve("naive-plugin", &PluginOptions::with_id("naive-plugin"))
        .unwrap_err();
    let PluginError::ResolutionFailed {
        plugin,
        primary,
        suppressed,
    } = err
    else {
        panic!("expected ResolutionFailed");
    };
    assert_eq!(plugin, "naive-plugin");
    assert_eq!(primary.strategy, ResolutionStrategy::Direct);
    assert!(matches!(primary.cause, PluginError::NotExecutable { .. }));
    let order: Vec<_> = suppressed.iter().map(|f| f.strategy).collect();
    assert_eq!(
        order,
        [ResolutionStrategy::Delegated, ResolutionStrategy::Streamed]
    );
    assert!(matches!(suppressed[1].cause, PluginError::EntryNotFound { .. }));
}

#[test]
fn escaping_entry_is_rejected() {
    let fx = Fixture::new();
    let lib = fx.lib("org.example.evil");
    fx.host
        .add_provider(provider("org.example.evil", &["naive-plugin"], &lib));
    fx.host.add_entry(
        "org.example.evil.binary",
        "../../evil",
        EntryMode::Int(0o755),
        b"#!/bin/sh\n",
    );

    let err = fx
        .resolver
        .resolve("naive-plugin", &PluginOptions::with_id("naive-plugin"))
        .unwrap_err();
    let PluginError::ResolutionFailed { primary, .. } = err else {
        panic!("expected ResolutionFailed");
    };
    assert_eq!(primary.strategy, ResolutionStrategy::Streamed);
    assert!(matches!(primary.cause, PluginError::PathTraversal { .. }));
    assert!(!fx.dir.path().join("evil").exists());
    assert!(!fx.dir.path().parent().unwrap().join("evil").exists());
}

#[test]
fn options_round_trip_through_encoding() {
    let mut options = PluginOptions::with_id("naive-plugin");
    options.insert("path", Some("/ws;v=2".into()));
    options.insert("host", Some("a=b\\c".into()));
    options.insert("tls", None);

    let encoded = options.to_string();
    let decoded = PluginOptions::parse(&encoded).unwrap();
    assert_eq!(decoded, options);
    assert_eq!(decoded.id(), Some("naive-plugin"));
    assert_eq!(decoded.get("path"), Some(Some("/ws;v=2")));
    assert_eq!(decoded.get("tls"), Some(None));
    assert!(!options.to_string_without_id().contains("naive-plugin"));
}

#[tokio::test]
async fn async_resolution_matches_blocking() {
    let fx = Fixture::new();
    let lib = fx.lib("org.example.naive");
    write_executable(&lib, "libnaive.so");
    fx.host
        .add_provider(direct_provider("org.example.naive", "naive-plugin", &lib, "libnaive.so", "2"));

    let options = PluginOptions::with_id("naive-plugin");
    let blocking = fx.resolver.resolve("naive-plugin", &options).unwrap();
    let awaited = fx.resolver.resolve_async("naive-plugin", &options).await.unwrap();
    assert_eq!(blocking, awaited);
}

#[test]
fn package_change_refreshes_resolution() {
    let fx = Fixture::new();
    let lib = fx.lib("org.example.naive");
    write_executable(&lib, "libnaive.so");
    fx.host
        .add_provider(direct_provider("org.example.naive", "naive-plugin", &lib, "libnaive.so", "2"));
    let options = PluginOptions::with_id("naive-plugin");
    fx.resolver.resolve("naive-plugin", &options).unwrap();

    fx.host.remove_package("org.example.naive");
    assert!(fx.resolver.resolve("naive-plugin", &options).is_ok());

    fx.host.trigger_change();
    assert!(matches!(
        fx.resolver.resolve("naive-plugin", &options),
        Err(PluginError::NotFound { .. })
    ));
}
