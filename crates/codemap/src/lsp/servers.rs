//! Language server registry: extension → language mapping, server commands,
//! and install instructions.

use std::path::Path;

use crate::config::LspConfig;

/// Map a file path to its language server key, by extension.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?;
    match ext {
        "go" => Some("go"),
        "py" => Some("python"),
        "js" | "jsx" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "lua" => Some("lua"),
        _ => None,
    }
}

/// LSP `languageId` for a language key. The keys already match the protocol
/// identifiers.
pub fn language_id(lang: &str) -> &str {
    lang
}

/// Command and arguments for starting a language's server, honouring
/// configured path overrides.
pub fn server_command(lang: &str, config: &LspConfig) -> Option<(String, Vec<String>)> {
    let override_path = |opt: &Option<String>| {
        opt.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    match lang {
        "go" => Some((
            override_path(&config.go_path).unwrap_or_else(|| "gopls".to_string()),
            vec!["serve".to_string()],
        )),
        "python" => Some((
            override_path(&config.python_path).unwrap_or_else(|| "pyright-langserver".to_string()),
            vec!["--stdio".to_string()],
        )),
        "javascript" | "typescript" => Some((
            override_path(&config.typescript_path)
                .unwrap_or_else(|| "typescript-language-server".to_string()),
            vec!["--stdio".to_string()],
        )),
        "lua" => Some((
            override_path(&config.lua_path).unwrap_or_else(|| "lua-language-server".to_string()),
            vec!["--stdio".to_string()],
        )),
        _ => None,
    }
}

/// Installation hint for a language's server.
pub fn install_instructions(lang: &str) -> Option<&'static str> {
    match lang {
        "go" => Some("go install golang.org/x/tools/gopls@latest"),
        "python" => Some("pip install pyright"),
        "javascript" | "typescript" => {
            Some("npm install -g typescript-language-server typescript")
        }
        "lua" => {
            Some("brew install lua-language-server  # or download from github.com/LuaLS/lua-language-server")
        }
        _ => None,
    }
}

/// Check whether a command resolves to an executable, either directly or on
/// PATH.
pub fn is_command_available(cmd: &str) -> bool {
    let path = Path::new(cmd);
    if path.components().count() > 1 {
        return path.is_file();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(cmd).is_file())
}
