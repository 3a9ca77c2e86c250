//! Resolution against packages installed on disk.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hopline_plugins::{
    DirectoryPackageHost, PluginOptions, PluginRegistry, PluginResolver, ResolutionStrategy,
};

const HOST_PACKAGE: &str = "io.hopline";

fn install(root: &Path, dir: &str, manifest: &str) -> PathBuf {
    let pkg = root.join(dir);
    std::fs::create_dir_all(&pkg).unwrap();
    std::fs::write(pkg.join("Package.toml"), manifest).unwrap();
    pkg
}

fn script(path: &Path, body: &str, mode: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
}

fn resolver(packages: &Path, no_backup: &Path) -> PluginResolver {
    let host = DirectoryPackageHost::new(packages, HOST_PACKAGE).with_watch(false);
    PluginResolver::new(Arc::new(PluginRegistry::new(Arc::new(host))), no_backup)
}

#[test]
fn each_strategy_resolves_from_disk() {
    let root = tempfile::tempdir().unwrap();
    let packages = root.path().join("packages");

    let direct = install(
        &packages,
        "trojan",
        r#"
        [package]
        name = "org.example.trojan"
        [[provider]]
        authority = "org.example.trojan.binary"
        plugins = ["trojan-go-plugin"]
        [provider.metadata]
        executable_path = "libtrojan.so"
        version = "2.0"
        "#,
    );
    script(&direct.join("lib/libtrojan.so"), "exit 0", 0o755);

    let delegated = install(
        &packages,
        "naive",
        r#"
        [package]
        name = "org.example.naive"
        [[provider]]
        authority = "org.example.naive.binary"
        plugins = ["naive-plugin"]
        delegate = ["bin/locate"]
        [provider.metadata]
        executable_path = "libnaive.so"
        "#,
    );
    script(&delegated.join("lib/libnaive.so"), "exit 0", 0o644);
    script(&delegated.join("bin/locate"), "echo bin/naive", 0o755);
    script(&delegated.join("bin/naive"), "exit 0", 0o755);

    let streamed = install(
        &packages,
        "tuic",
        r#"
        [package]
        name = "org.example.tuic"
        [[provider]]
        authority = "org.example.tuic.binary"
        plugins = ["tuic5-plugin"]
        [[provider.files]]
        path = "tuic5-plugin"
        source = "payload/tuic"
        mode = "755"
        [[provider.files]]
        path = "share/LICENSE"
        source = "payload/LICENSE"
        mode = 420
        "#,
    );
    script(&streamed.join("payload/tuic"), "exit 0", 0o644);
    std::fs::write(streamed.join("payload/LICENSE"), "MIT").unwrap();

    let no_backup = root.path().join("no_backup");
    let resolver = resolver(&packages, &no_backup);

    let trojan = resolver
        .resolve("trojan-go-plugin", &PluginOptions::with_id("trojan-go-plugin"))
        .unwrap();
    assert_eq!(trojan.strategy, ResolutionStrategy::Direct);
    assert_eq!(trojan.path, direct.join("lib/libtrojan.so"));

    let naive = resolver
        .resolve("naive-plugin", &PluginOptions::with_id("naive-plugin"))
        .unwrap();
    assert_eq!(naive.strategy, ResolutionStrategy::Delegated);
    assert_eq!(naive.path, delegated.join("bin/naive"));
    assert_eq!(naive.version, 0);

    let tuic = resolver
        .resolve("tuic5-plugin", &PluginOptions::with_id("tuic5-plugin"))
        .unwrap();
    assert_eq!(tuic.strategy, ResolutionStrategy::Streamed);
    let staging = no_backup.join("plugin").canonicalize().unwrap();
    assert_eq!(tuic.path, staging.join("tuic5-plugin"));
    let license = staging.join("share/LICENSE");
    assert_eq!(std::fs::read_to_string(&license).unwrap(), "MIT");
    assert_eq!(
        std::fs::metadata(&license).unwrap().permissions().mode() & 0o777,
        0o644
    );
}

#[test]
fn host_package_plugins_are_internal() {
    let root = tempfile::tempdir().unwrap();
    let packages = root.path().join("packages");
    install(
        &packages,
        "self",
        &format!(
            r#"
            [package]
            name = "{HOST_PACKAGE}"
            [[provider]]
            authority = "io.hopline.binary"
            plugins = ["mieru-plugin"]
            "#
        ),
    );
    install(
        &packages,
        "brook",
        r#"
        [package]
        name = "org.example.brook"
        [[provider]]
        authority = "org.example.brook.binary"
        plugins = ["brook-plugin"]
        [[provider]]
        authority = "org.example.brook.private"
        exported = false
        plugins = ["juicity-plugin"]
        "#,
    );

    let resolver = resolver(&packages, &root.path().join("no_backup"));
    let registry = resolver.registry();

    let all: Vec<String> = registry
        .list(false)
        .unwrap()
        .iter()
        .map(|e| e.id.as_str().to_owned())
        .collect();
    assert!(all.contains(&"none".to_owned()));
    assert!(all.contains(&"mieru-plugin".to_owned()));
    assert!(all.contains(&"brook-plugin".to_owned()));
    assert!(!all.contains(&"juicity-plugin".to_owned()));

    let external: Vec<String> = registry
        .list(true)
        .unwrap()
        .iter()
        .map(|e| e.id.as_str().to_owned())
        .collect();
    assert_eq!(external, ["brook-plugin"]);
}

#[test]
fn explicit_invalidate_picks_up_new_packages() {
    let root = tempfile::tempdir().unwrap();
    let packages = root.path().join("packages");
    let resolver = resolver(&packages, &root.path().join("no_backup"));
    assert!(resolver.registry().find("hysteria2-plugin").unwrap().is_empty());

    let pkg = install(
        &packages,
        "hysteria",
        r#"
        [package]
        name = "org.example.hysteria"
        [[provider]]
        authority = "org.example.hysteria.binary"
        plugins = ["hysteria2-plugin"]
        [provider.metadata]
        executable_path = "libhysteria2.so"
        "#,
    );
    script(&pkg.join("lib/libhysteria2.so"), "exit 0", 0o755);
    assert!(resolver.registry().find("hysteria2-plugin").unwrap().is_empty());

    resolver.registry().invalidate();
    let found = resolver.registry().find("hysteria2-plugin").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].package, "org.example.hysteria");
}
