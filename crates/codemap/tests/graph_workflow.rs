//! End-to-end scan → store → query workflow over a polyglot workspace.

use std::path::Path;

use codemap::db::Db;
use codemap::scanner::Scanner;
use codemap::store::GraphStore;
use tokio_util::sync::CancellationToken;

fn create_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn populated_store(workspace: &Path) -> (GraphStore, usize) {
    let scanner = Scanner::new().unwrap();
    let nodes = scanner.scan(workspace).unwrap();

    let store = GraphStore::new(Db::in_memory().unwrap());
    let cancel = CancellationToken::new();
    store.bulk_upsert_nodes(&cancel, &nodes).unwrap();
    (store, nodes.len())
}

#[test]
fn test_reindex_and_query() {
    let workspace = tempfile::tempdir().unwrap();
    let ws = workspace.path();

    create_file(
        ws,
        "main.go",
        "package main\nfunc MainFunc() {\n\tHelper()\n}",
    );
    create_file(ws, "helper.go", "package main\nfunc Helper() {}");
    create_file(
        ws,
        "script.py",
        "\ndef my_python_func():\n    pass\nclass MyClass:\n    pass\n",
    );
    create_file(ws, "types.ts", "\nexport interface User {\n\tname: string;\n}\n");
    create_file(
        ws,
        "app.js",
        "\nclass Logger {\n  log(msg) {\n    console.log(msg);\n  }\n}\n",
    );
    create_file(
        ws,
        "config.lua",
        "\nfunction GlobalFunc(x)\n  return x\nend\n\nlocal function LocalFunc()\nend\n",
    );

    let (store, _) = populated_store(ws);
    let cancel = CancellationToken::new();

    // Go symbol
    let locs = store.get_symbol_location(&cancel, "MainFunc").unwrap();
    assert_eq!(locs.len(), 1, "expected 1 location for MainFunc");
    assert_eq!(locs[0].kind, "function_declaration");

    // Python symbol
    let locs = store.get_symbol_location(&cancel, "MyClass").unwrap();
    assert_eq!(locs.len(), 1, "expected 1 location for MyClass");
    assert_eq!(locs[0].kind, "class_definition");

    // TypeScript symbol
    let locs = store.get_symbol_location(&cancel, "User").unwrap();
    assert_eq!(locs.len(), 1, "expected 1 location for User");
    assert_eq!(locs[0].kind, "interface_declaration");

    // JavaScript symbols
    let locs = store.get_symbol_location(&cancel, "Logger").unwrap();
    assert_eq!(locs[0].kind, "class_declaration");
    let locs = store.get_symbol_location(&cancel, "log").unwrap();
    assert_eq!(locs[0].kind, "method_definition");

    // Lua symbols
    assert_eq!(store.get_symbol_location(&cancel, "GlobalFunc").unwrap().len(), 1);
    assert_eq!(store.get_symbol_location(&cancel, "LocalFunc").unwrap().len(), 1);
}

#[test]
fn test_symbols_in_file_ranges() {
    let workspace = tempfile::tempdir().unwrap();
    let path = create_file(
        workspace.path(),
        "script.py",
        "def my_python_func():\n  pass\n\nclass MyClass:\n  pass\n",
    );

    let (store, _) = populated_store(workspace.path());
    let cancel = CancellationToken::new();

    let canonical = std::fs::canonicalize(&path).unwrap();
    let symbols = store
        .get_symbols_in_file(&cancel, &canonical.to_string_lossy())
        .unwrap();
    assert_eq!(symbols.len(), 2);
    assert_eq!(symbols[0].name, "my_python_func");
    assert_eq!(symbols[0].kind, "function_definition");
    assert_eq!(symbols[0].line_start, 1);
    assert_eq!(symbols[1].name, "MyClass");
    assert_eq!(symbols[1].kind, "class_definition");
    assert_eq!(symbols[1].line_start, 4);
}

#[test]
fn test_rescan_is_idempotent() {
    let workspace = tempfile::tempdir().unwrap();
    let ws = workspace.path();
    create_file(ws, "main.go", "package main\nfunc MainFunc() {}\n");
    create_file(ws, "helper.go", "package main\nfunc Helper() {}\n");

    let scanner = Scanner::new().unwrap();
    let store = GraphStore::new(Db::in_memory().unwrap());
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let nodes = scanner.scan(ws).unwrap();
        let mut files: Vec<String> = nodes.iter().map(|n| n.file_path.clone()).collect();
        files.dedup();
        store.bulk_upsert_nodes(&cancel, &nodes).unwrap();
        store.prune_stale_files(&cancel, &files).unwrap();
    }

    assert_eq!(store.count_nodes(&cancel).unwrap(), 2);
}

#[test]
fn test_scan_then_prune_removes_deleted_file() {
    let workspace = tempfile::tempdir().unwrap();
    let ws = workspace.path();
    create_file(ws, "keep.go", "package main\nfunc Keep() {}\n");
    let doomed = create_file(ws, "doomed.go", "package main\nfunc Doomed() {}\n");

    let scanner = Scanner::new().unwrap();
    let store = GraphStore::new(Db::in_memory().unwrap());
    let cancel = CancellationToken::new();

    let nodes = scanner.scan(ws).unwrap();
    store.bulk_upsert_nodes(&cancel, &nodes).unwrap();
    assert_eq!(store.count_nodes(&cancel).unwrap(), 2);

    std::fs::remove_file(&doomed).unwrap();
    let nodes = scanner.scan(ws).unwrap();
    let files: Vec<String> = nodes.iter().map(|n| n.file_path.clone()).collect();
    store.bulk_upsert_nodes(&cancel, &nodes).unwrap();
    store.prune_stale_files(&cancel, &files).unwrap();

    assert_eq!(store.count_nodes(&cancel).unwrap(), 1);
    assert_eq!(
        store.get_symbol_location(&cancel, "Doomed").unwrap().len(),
        0
    );
}
