//! End-to-end staging scenarios over stub binaries.
//!
//! The stub metadata reader keeps these independent of binutils: registry
//! precedence, graph closure and resolver behavior are all decision logic
//! that never needs a real ELF file.

mod helpers;

use helpers::{write_stub_binary, TestEnv};
use stagehand::resolver::{self, CopyPolicy, SearchPath};
use stagehand::{bake, StageError};
use std::fs;
use std::os::unix::fs::symlink;
use std::os::unix::fs::PermissionsExt;

fn search_over(env: &TestEnv) -> SearchPath {
    let mut search = SearchPath::new();
    search.push(env.install_root.join("lib"), CopyPolicy::CopyIntoTree);
    search.push(env.depends_root.join("lib"), CopyPolicy::CopyIntoTree);
    search
}

// =============================================================================
// Closure
// =============================================================================

#[test]
fn test_closure_copies_transitive_dependency_from_depends_root() {
    let env = TestEnv::new();
    let exe = env.install_root.join("bin/foo");
    write_stub_binary(&exe, None, &["libbar.so.1"]);
    write_stub_binary(
        &env.depends_root.join("lib/libbar.so.1"),
        Some("libbar.so.1"),
        &[],
    );

    let mut registry = env.registry("app");
    registry.add_executable(&exe).unwrap();
    assert!(registry.graph().is_outstanding("libbar.so.1"));

    let unresolved = resolver::resolve(&mut registry, &search_over(&env)).unwrap();
    assert!(unresolved.is_empty());

    assert!(registry.tree().libexec().join("foo").is_file());
    assert!(registry.tree().bin().join("foo").is_file());
    assert!(registry.tree().lib().join("libbar.so.1").is_file());
    registry.ensure_closed().unwrap();
}

#[test]
fn test_closure_is_idempotent() {
    let env = TestEnv::new();
    let exe = env.install_root.join("bin/foo");
    write_stub_binary(&exe, None, &["libbar.so.1"]);
    write_stub_binary(
        &env.depends_root.join("lib/libbar.so.1"),
        Some("libbar.so.1"),
        &[],
    );

    let mut registry = env.registry("app");
    registry.add_executable(&exe).unwrap();

    let search = search_over(&env);
    resolver::resolve(&mut registry, &search).unwrap();
    let count_after_first = registry.artifact_count();

    // Second run with an unchanged search path: no new copies, no new
    // unresolved names.
    let unresolved = resolver::resolve(&mut registry, &search).unwrap();
    assert!(unresolved.is_empty());
    assert_eq!(registry.artifact_count(), count_after_first);
    assert_eq!(registry.graph().outstanding_count(), 0);
}

#[test]
fn test_search_found_libraries_ship_as_is() {
    // Libraries pulled from search directories stage with scanning
    // disabled: their own needs were captured when they were first linked
    // against, and they ship as-is.
    let env = TestEnv::new();
    let exe = env.install_root.join("bin/foo");
    write_stub_binary(&exe, None, &["libbar.so.1"]);
    write_stub_binary(
        &env.depends_root.join("lib/libbar.so.1"),
        Some("libbar.so.1"),
        &["libnested.so.5"],
    );

    let mut registry = env.registry("app");
    registry.add_executable(&exe).unwrap();
    let unresolved = resolver::resolve(&mut registry, &search_over(&env)).unwrap();

    assert!(unresolved.is_empty());
    assert!(!registry.graph().is_outstanding("libnested.so.5"));
    assert!(!registry.tree().lib().join("libnested.so.5").exists());
}

#[test]
fn test_registered_library_satisfies_need_without_search() {
    let env = TestEnv::new();
    let lib = env.install_root.join("lib/libbar.so.1");
    write_stub_binary(&lib, Some("libbar.so.1"), &[]);
    let exe = env.install_root.join("bin/foo");
    write_stub_binary(&exe, None, &["libbar.so.1"]);

    let mut registry = env.registry("app");
    registry.add_library(&lib, true, true, false).unwrap();
    registry.add_executable(&exe).unwrap();

    // Already present in the registry under its own name: never outstanding.
    assert_eq!(registry.graph().outstanding_count(), 0);
}

#[test]
fn test_unresolved_dependency_is_fatal_and_named() {
    let env = TestEnv::new();
    let exe = env.install_root.join("bin/foo");
    write_stub_binary(&exe, None, &["libmissing.so.9"]);

    let mut registry = env.registry("app");
    registry.add_executable(&exe).unwrap();
    let unresolved = resolver::resolve(&mut registry, &search_over(&env)).unwrap();

    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].name, "libmissing.so.9");
    assert!(unresolved[0].requested_by.ends_with("libexec/foo"));

    let err = registry.ensure_closed().unwrap_err();
    match err.downcast_ref::<StageError>() {
        Some(StageError::UnresolvedDependencies(deps)) => {
            assert_eq!(deps[0].name, "libmissing.so.9");
        }
        other => panic!("expected UnresolvedDependencies, got {:?}", other),
    }
    let msg = err.to_string();
    assert!(msg.contains("libmissing.so.9"));
    assert!(msg.contains("libexec/foo"));
}

#[test]
fn test_allowlisted_names_never_copied_never_unresolved() {
    let env = TestEnv::new();
    let exe = env.install_root.join("bin/foo");
    write_stub_binary(&exe, None, &["libc.so.6"]);
    // Present in a search dir, but the target OS provides it.
    write_stub_binary(&env.depends_root.join("lib/libc.so.6"), Some("libc.so.6"), &[]);

    let mut registry = env.registry("app");
    registry.add_executable(&exe).unwrap();
    let unresolved = resolver::resolve(&mut registry, &search_over(&env)).unwrap();

    assert!(unresolved.is_empty());
    assert!(!registry.tree().lib().join("libc.so.6").exists());
}

#[test]
fn test_always_copy_prefix_overrides_allowlist() {
    let env = TestEnv::new();
    let exe = env.install_root.join("bin/foo");
    write_stub_binary(&exe, None, &["libstdc++.so.6"]);
    write_stub_binary(
        &env.depends_root.join("lib/libstdc++.so.6"),
        Some("libstdc++.so.6"),
        &[],
    );

    let tree = stagehand::DistributionTree::create(&env.dist_root, "app").unwrap();
    let mut config = env.config();
    // Even explicitly allowlisted, a compiler runtime ships with the tree.
    config.system_allowlist.insert("libstdc++.so.6".to_string());
    let mut registry =
        stagehand::Registry::with_reader(tree, config, Box::new(helpers::StubReader));

    registry.add_executable(&exe).unwrap();
    let unresolved = resolver::resolve(&mut registry, &search_over(&env)).unwrap();

    assert!(unresolved.is_empty());
    assert!(registry.tree().lib().join("libstdc++.so.6").is_file());
}

// =============================================================================
// Precedence
// =============================================================================

#[test]
fn test_trusted_source_survives_later_untrusted_write() {
    let env = TestEnv::new();
    let trusted = env.install_root.join("lib/libz.so.1");
    write_stub_binary(&trusted, Some("libz.so.1"), &[]);
    let rogue_dir = env._temp_dir.path().join("rogue");
    let rogue = rogue_dir.join("libz.so.1");
    fs::create_dir_all(&rogue_dir).unwrap();
    fs::write(&rogue, b"incompatible build").unwrap();

    let mut registry = env.registry("app");
    registry.add_library(&trusted, false, true, false).unwrap();
    registry.add_library(&rogue, false, true, false).unwrap();

    let staged = fs::read(registry.tree().lib().join("libz.so.1")).unwrap();
    assert_eq!(staged, fs::read(&trusted).unwrap());
}

#[test]
fn test_trusted_source_replaces_earlier_untrusted_write() {
    let env = TestEnv::new();
    let trusted = env.install_root.join("lib/libz.so.1");
    write_stub_binary(&trusted, Some("libz.so.1"), &[]);
    let rogue_dir = env._temp_dir.path().join("rogue");
    let rogue = rogue_dir.join("libz.so.1");
    fs::create_dir_all(&rogue_dir).unwrap();
    fs::write(&rogue, b"incompatible build").unwrap();

    let mut registry = env.registry("app");
    registry.add_library(&rogue, false, true, false).unwrap();
    registry.add_library(&trusted, false, true, false).unwrap();

    // Registration order does not matter: the trusted content wins.
    let staged = fs::read(registry.tree().lib().join("libz.so.1")).unwrap();
    assert_eq!(staged, fs::read(&trusted).unwrap());
}

#[test]
fn test_equal_tier_conflict_warns_and_last_writer_wins() {
    let env = TestEnv::new();
    let a_dir = env._temp_dir.path().join("side-a");
    let b_dir = env._temp_dir.path().join("side-b");
    fs::create_dir_all(&a_dir).unwrap();
    fs::create_dir_all(&b_dir).unwrap();
    fs::write(a_dir.join("notes.txt"), b"from a").unwrap();
    fs::write(b_dir.join("notes.txt"), b"from b").unwrap();

    let mut registry = env.registry("app");
    registry
        .add_file(&a_dir.join("notes.txt"), "share/notes.txt")
        .unwrap();
    registry
        .add_file(&b_dir.join("notes.txt"), "share/notes.txt")
        .unwrap();

    assert_eq!(registry.conflict_count(), 1);
    let staged = fs::read(registry.tree().join("share/notes.txt")).unwrap();
    assert_eq!(staged, b"from b");
}

#[test]
fn test_same_content_re_registration_is_quiet() {
    let env = TestEnv::new();
    let lib = env.install_root.join("lib/libz.so.1");
    write_stub_binary(&lib, Some("libz.so.1"), &[]);

    let mut registry = env.registry("app");
    registry.add_library(&lib, false, true, false).unwrap();
    registry.add_library(&lib, false, true, false).unwrap();

    assert_eq!(registry.conflict_count(), 0);
    assert_eq!(registry.artifact_count(), 1);
}

// =============================================================================
// Containment
// =============================================================================

#[test]
fn test_escaping_destination_is_rejected_and_copies_nothing() {
    let env = TestEnv::new();
    let src = env.install_root.join("bin/innocent.txt");
    fs::write(&src, b"data").unwrap();

    let mut registry = env.registry("app");
    let err = registry.add_file(&src, "../escape.txt").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StageError>(),
        Some(StageError::TreeEscape { .. })
    ));
    assert!(!env.dist_root.join("escape.txt").exists());
    assert_eq!(registry.artifact_count(), 0);
}

// =============================================================================
// Executables and the wrapper policy
// =============================================================================

#[test]
fn test_executable_gets_launcher_in_bin() {
    let env = TestEnv::new();
    let exe = env.install_root.join("bin/server");
    write_stub_binary(&exe, None, &[]);

    let mut registry = env.registry("app");
    registry.add_executable(&exe).unwrap();

    let real = registry.tree().libexec().join("server");
    let launcher = registry.tree().bin().join("server");
    assert!(real.is_file());
    assert!(launcher.is_file());

    let script = fs::read_to_string(&launcher).unwrap();
    assert!(script.starts_with("#!/bin/sh"));
    assert!(script.contains("../libexec/server"));
    assert_ne!(
        fs::metadata(&launcher).unwrap().permissions().mode() & 0o111,
        0
    );
}

#[test]
fn test_script_executable_skips_launcher() {
    let env = TestEnv::new();
    let script = env.install_root.join("bin/tool.py");
    fs::write(&script, b"#!/usr/bin/env python3\nprint('ok')\n").unwrap();

    let mut registry = env.registry("app");
    registry.add_executable(&script).unwrap();

    assert!(registry.tree().bin().join("tool.py").is_file());
    assert!(!registry.tree().libexec().join("tool.py").exists());
}

#[test]
fn test_executable_symlink_resolves_to_concrete_binary() {
    let env = TestEnv::new();
    let real = env.install_root.join("bin/server-2.1");
    write_stub_binary(&real, None, &[]);
    let link = env.install_root.join("bin/server");
    symlink("server-2.1", &link).unwrap();

    let mut registry = env.registry("app");
    registry.add_executable(&link).unwrap();

    let staged = registry.tree().libexec().join("server");
    assert!(staged.is_file());
    assert!(!staged.is_symlink());
}

// =============================================================================
// Library symlink chains and plugins
// =============================================================================

#[test]
fn test_library_chain_staged_with_relative_links() {
    let env = TestEnv::new();
    let lib_dir = env.install_root.join("lib");
    write_stub_binary(&lib_dir.join("libfoo.so.1.2.3"), Some("libfoo.so.1"), &[]);
    symlink("libfoo.so.1.2.3", lib_dir.join("libfoo.so")).unwrap();
    // Not a hop in the chain, but shares the versioned prefix.
    symlink("libfoo.so.1.2.3", lib_dir.join("libfoo.so.1")).unwrap();

    let mut registry = env.registry("app");
    registry
        .add_library(&lib_dir.join("libfoo.so"), true, true, false)
        .unwrap();

    let staged_lib = registry.tree().lib();
    assert!(staged_lib.join("libfoo.so.1.2.3").is_file());
    assert!(staged_lib.join("libfoo.so").is_symlink());
    assert!(staged_lib.join("libfoo.so.1").is_symlink());
    assert_eq!(
        fs::read_link(staged_lib.join("libfoo.so")).unwrap(),
        std::path::PathBuf::from("libfoo.so.1.2.3")
    );
}

#[test]
fn test_plugin_lands_in_family_directory() {
    let env = TestEnv::new();
    let plugin = env.install_root.join("plugins/platforms/libqxcb.so");
    write_stub_binary(&plugin, None, &[]);

    let mut registry = env.registry("app");
    registry.add_library(&plugin, false, true, true).unwrap();

    assert!(registry
        .tree()
        .plugins("platforms")
        .join("libqxcb.so")
        .is_file());
}

// =============================================================================
// Data, finalization, baking
// =============================================================================

#[test]
fn test_add_directory_preserves_paths() {
    let env = TestEnv::new();
    let share = env.install_root.join("share/doc");
    fs::create_dir_all(&share).unwrap();
    fs::write(share.join("README"), b"docs").unwrap();

    let mut registry = env.registry("app");
    registry
        .add_directory(&env.install_root.join("share"), "share")
        .unwrap();

    assert!(registry.tree().join("share/doc/README").is_file());
}

#[test]
fn test_finalize_purges_hidden_writes_manifest_fixes_modes() {
    let env = TestEnv::new();
    let exe = env.install_root.join("bin/server");
    write_stub_binary(&exe, None, &[]);
    let doc = env.install_root.join("share/README");
    fs::create_dir_all(doc.parent().unwrap()).unwrap();
    fs::write(&doc, b"docs").unwrap();

    let mut registry = env.registry("app");
    registry.add_executable(&exe).unwrap();
    registry.add_file(&doc, "share/README").unwrap();
    fs::write(registry.tree().root().join(".DS_Store"), b"junk").unwrap();

    registry.finalize().unwrap();

    let root = registry.tree().root();
    assert!(!root.join(".DS_Store").exists());

    let manifest =
        stagehand::manifest::StageManifest::load(&root.join("stage-manifest.json")).unwrap();
    assert_eq!(manifest.artifact_count, registry.artifact_count());
    assert!(manifest
        .artifacts
        .iter()
        .any(|entry| entry.dest == "libexec/server" && entry.kind == "executable"));
    assert!(manifest
        .artifacts
        .iter()
        .any(|entry| entry.dest == "share/README" && entry.kind == "data"));

    let mode = |p: &std::path::Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(&root.join("share/README")), 0o644);
    assert_eq!(mode(&root.join("libexec/server")), 0o755);
    assert_eq!(mode(&root.join("bin")), 0o755);
}

#[test]
fn test_bake_rewrites_text_but_not_stub_binaries() {
    let env = TestEnv::new();
    let la = env.install_root.join("lib/libfoo.la");
    fs::write(
        &la,
        "libdir='/home/builder/project/BinaryBuilder-xyz/install/lib'\n",
    )
    .unwrap();

    let mut registry = env.registry("app");
    registry.add_file(&la, "lib/libfoo.la").unwrap();

    let report = bake::bake_tree(&registry).unwrap();
    assert_eq!(report.texts_rewritten, 1);
    assert_eq!(report.binaries_baked, 0);

    let content = fs::read_to_string(registry.tree().lib().join("libfoo.la")).unwrap();
    assert!(content.starts_with("libdir='/usr/lib'"));
}
