//! Symbol extraction from source trees using tree-sitter grammar queries.
//!
//! The scanner walks a directory tree (respecting ignore rules), parses each
//! supported file with the grammar registered for its extension, and emits
//! one [`Node`] per `@name` capture of the language's query.

pub mod queries;

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use ignore::gitignore::Gitignore;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Parser, Query, QueryCursor};

use crate::config::{Config, DEFAULT_EXCLUDE_DIRS};
use crate::uri::{node_id, path_to_uri};
use crate::{IndexError, Node, Result};

/// Extensions the scanner understands.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["go", "py", "js", "jsx", "ts", "tsx", "lua"];

/// Check if a path is a supported source file.
pub fn is_supported_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

struct Grammar {
    language: Language,
    query: Query,
}

/// Grammar-query registry plus tree-walking extraction.
pub struct Scanner {
    grammars: HashMap<&'static str, Grammar>,
    exclude_dirs: Vec<String>,
    respect_gitignore: bool,
}

impl Scanner {
    /// Build a scanner with the default exclusion rules.
    pub fn new() -> Result<Self> {
        Self::with_options(
            DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
            true,
        )
    }

    /// Build a scanner honouring a loaded [`Config`].
    pub fn with_config(config: &Config) -> Result<Self> {
        Self::with_options(config.excluded_dirs(), config.respect_gitignore)
    }

    fn with_options(exclude_dirs: Vec<String>, respect_gitignore: bool) -> Result<Self> {
        let mut grammars = HashMap::new();

        let registrations: [(&'static str, Language, &str); 7] = [
            ("go", tree_sitter_go::LANGUAGE.into(), queries::GO_QUERY),
            ("py", tree_sitter_python::LANGUAGE.into(), queries::PYTHON_QUERY),
            (
                "js",
                tree_sitter_javascript::LANGUAGE.into(),
                queries::JAVASCRIPT_QUERY,
            ),
            (
                "jsx",
                tree_sitter_javascript::LANGUAGE.into(),
                queries::JAVASCRIPT_QUERY,
            ),
            (
                "ts",
                tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
                queries::TYPESCRIPT_QUERY,
            ),
            (
                "tsx",
                tree_sitter_typescript::LANGUAGE_TSX.into(),
                queries::TYPESCRIPT_QUERY,
            ),
            ("lua", tree_sitter_lua::LANGUAGE.into(), queries::LUA_QUERY),
        ];

        for (ext, language, query_src) in registrations {
            let query = Query::new(&language, query_src).map_err(|e| IndexError::Query {
                language: ext.to_string(),
                message: e.to_string(),
            })?;
            grammars.insert(ext, Grammar { language, query });
        }

        Ok(Self {
            grammars,
            exclude_dirs,
            respect_gitignore,
        })
    }

    /// Walk `root` and extract nodes from every supported file.
    ///
    /// Unreadable files and files the parser rejects are skipped; they may
    /// have vanished between listing and open.
    pub fn scan(&self, root: &Path) -> Result<Vec<Node>> {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let gitignore = if self.respect_gitignore {
            let (matcher, err) = Gitignore::new(root.join(".gitignore"));
            if let Some(err) = err {
                tracing::warn!("gitignore parse error: {}", err);
            }
            Some(matcher)
        } else {
            None
        };

        let mut nodes = Vec::new();
        self.walk(&root, gitignore.as_ref(), &mut nodes)?;
        Ok(nodes)
    }

    fn walk(&self, dir: &Path, gitignore: Option<&Gitignore>, nodes: &mut Vec<Node>) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read directory {}: {}", dir.display(), e);
                return Ok(());
            }
        };

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if path.is_dir() {
                if name.starts_with('.') || self.exclude_dirs.iter().any(|d| d == name.as_ref()) {
                    continue;
                }
                if let Some(ign) = gitignore {
                    if ign.matched_path_or_any_parents(&path, true).is_ignore() {
                        continue;
                    }
                }
                self.walk(&path, gitignore, nodes)?;
                continue;
            }

            if !is_supported_file(&path) {
                continue;
            }
            if let Some(ign) = gitignore {
                if ign.matched_path_or_any_parents(&path, false).is_ignore() {
                    continue;
                }
            }

            match self.scan_file(&path) {
                Ok(file_nodes) => nodes.extend(file_nodes),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(())
    }

    /// Parse a single file and extract its nodes.
    ///
    /// Errors on unsupported extensions and propagates I/O and parse
    /// failures; the full-tree scan downgrades these to skips.
    pub fn scan_file(&self, path: &Path) -> Result<Vec<Node>> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let grammar = self
            .grammars
            .get(ext)
            .ok_or_else(|| IndexError::UnsupportedFile {
                path: path.to_path_buf(),
            })?;

        let content = std::fs::read_to_string(path)?;
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.extract(grammar, &path, &content)
    }

    fn extract(&self, grammar: &Grammar, path: &Path, content: &str) -> Result<Vec<Node>> {
        let mut parser = Parser::new();
        parser
            .set_language(&grammar.language)
            .map_err(|e| IndexError::Query {
                language: path.display().to_string(),
                message: e.to_string(),
            })?;

        let tree = parser
            .parse(content, None)
            .ok_or_else(|| IndexError::Parse {
                path: path.to_path_buf(),
            })?;

        let source = content.as_bytes();
        let path_str = path.to_string_lossy().to_string();
        let uri = path_to_uri(path);
        let scanned_at = Utc::now();

        let mut nodes = Vec::new();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&grammar.query, tree.root_node(), source);
        let capture_names = grammar.query.capture_names();

        while let Some(m) = matches.next() {
            for capture in m.captures {
                if capture_names[capture.index as usize] != "name" {
                    continue;
                }
                let name_node = capture.node;
                let Ok(name) = name_node.utf8_text(source) else {
                    continue;
                };

                let kind = name_node
                    .parent()
                    .map(|p| p.kind().to_string())
                    .unwrap_or_else(|| "symbol".to_string());

                nodes.push(Node {
                    id: node_id(&path_str, name),
                    name: name.to_string(),
                    kind,
                    file_path: path_str.clone(),
                    line_start: name_node.start_position().row as u32 + 1,
                    line_end: name_node.end_position().row as u32 + 1,
                    col_start: name_node.start_position().column as u32 + 1,
                    col_end: name_node.end_position().column as u32 + 1,
                    symbol_uri: Some(uri.clone()),
                    created_at: scanned_at,
                });
            }
        }

        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_go_function_and_method() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "main.go",
            "package main\n\nfunc Helper() {}\n\nfunc (s *Server) Run() {}\n",
        );

        let scanner = Scanner::new().unwrap();
        let nodes = scanner.scan_file(&path).unwrap();

        let helper = nodes.iter().find(|n| n.name == "Helper").unwrap();
        assert_eq!(helper.kind, "function_declaration");
        assert_eq!(helper.line_start, 3);
        assert_eq!(helper.col_start, 6);

        let run = nodes.iter().find(|n| n.name == "Run").unwrap();
        assert_eq!(run.kind, "method_declaration");
    }

    #[test]
    fn test_python_function_and_class() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "script.py",
            "def my_python_func():\n  pass\n\nclass MyClass:\n  pass\n",
        );

        let scanner = Scanner::new().unwrap();
        let nodes = scanner.scan_file(&path).unwrap();
        assert_eq!(nodes.len(), 2);

        let func = nodes.iter().find(|n| n.name == "my_python_func").unwrap();
        assert_eq!(func.kind, "function_definition");
        let class = nodes.iter().find(|n| n.name == "MyClass").unwrap();
        assert_eq!(class.kind, "class_definition");
    }

    #[test]
    fn test_typescript_interface() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "types.ts",
            "export interface User { name: string }\n",
        );

        let scanner = Scanner::new().unwrap();
        let nodes = scanner.scan_file(&path).unwrap();

        let user = nodes.iter().find(|n| n.name == "User").unwrap();
        assert_eq!(user.kind, "interface_declaration");
    }

    #[test]
    fn test_javascript_class_and_method() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "app.js",
            "class Logger {\n  log(msg) {\n    console.log(msg);\n  }\n}\n",
        );

        let scanner = Scanner::new().unwrap();
        let nodes = scanner.scan_file(&path).unwrap();

        assert!(nodes.iter().any(|n| n.name == "Logger" && n.kind == "class_declaration"));
        assert!(nodes.iter().any(|n| n.name == "log" && n.kind == "method_definition"));
    }

    #[test]
    fn test_lua_functions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "config.lua",
            "function GlobalFunc(x)\n  return x\nend\n\nlocal function LocalFunc()\nend\n",
        );

        let scanner = Scanner::new().unwrap();
        let nodes = scanner.scan_file(&path).unwrap();
        assert!(nodes.iter().any(|n| n.name == "GlobalFunc"));
        assert!(nodes.iter().any(|n| n.name == "LocalFunc"));
    }

    #[test]
    fn test_scan_file_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "notes.txt", "hello");

        let scanner = Scanner::new().unwrap();
        let err = scanner.scan_file(&path).unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedFile { .. }));
    }

    #[test]
    fn test_scan_file_missing_file_propagates_io() {
        let scanner = Scanner::new().unwrap();
        let err = scanner.scan_file(Path::new("/no/such/file.go")).unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));
    }

    #[test]
    fn test_scan_skips_hidden_and_excluded_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.go", "package main\nfunc Kept() {}\n");
        write(
            dir.path(),
            ".hidden/skip.go",
            "package main\nfunc Hidden() {}\n",
        );
        write(
            dir.path(),
            "node_modules/dep.js",
            "function shouldSkip() {}\n",
        );
        write(
            dir.path(),
            "vendor/v.go",
            "package vendored\nfunc Vendored() {}\n",
        );

        let scanner = Scanner::new().unwrap();
        let nodes = scanner.scan(dir.path()).unwrap();
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Kept"]);
    }

    #[test]
    fn test_scan_respects_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "generated/\nskipped.go\n");
        write(dir.path(), "keep.go", "package main\nfunc Kept() {}\n");
        write(dir.path(), "skipped.go", "package main\nfunc Skipped() {}\n");
        write(
            dir.path(),
            "generated/gen.go",
            "package gen\nfunc Generated() {}\n",
        );

        let scanner = Scanner::new().unwrap();
        let nodes = scanner.scan(dir.path()).unwrap();
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Kept"]);
    }

    #[test]
    fn test_scan_ids_match_scan_file_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "main.go", "package main\nfunc Helper() {}\n");

        let scanner = Scanner::new().unwrap();
        let from_scan = scanner.scan(dir.path()).unwrap();
        let from_file = scanner.scan_file(&path).unwrap();
        assert_eq!(from_scan[0].id, from_file[0].id);
    }

    #[test]
    fn test_unsupported_files_ignored_in_tree_scan() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README.md", "# readme");
        write(dir.path(), "main.go", "package main\nfunc F() {}\n");

        let scanner = Scanner::new().unwrap();
        let nodes = scanner.scan(dir.path()).unwrap();
        assert_eq!(nodes.len(), 1);
    }
}
