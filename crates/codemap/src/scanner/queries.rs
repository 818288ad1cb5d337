//! Per-language grammar queries.
//!
//! Each query marks a `@name` capture on the identifier token of every
//! definition of interest. The scanner derives the node kind from the parent
//! of the captured identifier, so these queries are the extension point for
//! new languages: add a grammar, add a query, done.

/// Go: functions, methods, type specs.
pub const GO_QUERY: &str = r#"
(function_declaration name: (identifier) @name)
(method_declaration name: (field_identifier) @name)
(type_declaration (type_spec name: (type_identifier) @name))
"#;

/// Python: functions (and methods, which share the node kind) and classes.
pub const PYTHON_QUERY: &str = r#"
(function_definition name: (identifier) @name)
(class_definition name: (identifier) @name)
"#;

/// JavaScript: functions, classes, methods, arrow-function bindings.
pub const JAVASCRIPT_QUERY: &str = r#"
(function_declaration name: (identifier) @name)
(class_declaration name: (identifier) @name)
(method_definition name: (property_identifier) @name)
(lexical_declaration (variable_declarator name: (identifier) @name value: (arrow_function)))
"#;

/// TypeScript: the JavaScript set plus interfaces, type aliases and enums.
pub const TYPESCRIPT_QUERY: &str = r#"
(function_declaration name: (identifier) @name)
(class_declaration name: (type_identifier) @name)
(method_definition name: (property_identifier) @name)
(lexical_declaration (variable_declarator name: (identifier) @name value: (arrow_function)))
(interface_declaration name: (type_identifier) @name)
(type_alias_declaration name: (type_identifier) @name)
(enum_declaration name: (identifier) @name)
"#;

/// Lua: function declarations, including table-qualified and method forms.
pub const LUA_QUERY: &str = r#"
(function_declaration name: [(identifier) (dot_index_expression) (method_index_expression)] @name)
"#;
