//! Schema registry and the parser that builds it from SDL-like schema text.
//!
//! The grammar is deliberately loose: `type Name { field: Type }` blocks are
//! extracted by pattern matching, and directives may be written either between the
//! type name and its body or right after the closing brace. A malformed directive
//! never fails the parse, it simply leaves the attribute it would have set unset.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::NameHasher;
use crate::error::{EngineError, Result};

pub const SCALAR_TYPES: [&str; 5] = ["ID", "String", "Int", "Float", "Boolean"];
pub const DEFAULT_NAMESPACES: [&str; 3] = ["marketing", "finance", "external"];

lazy_static! {
    static ref COMMENT: Regex = Regex::new(r"#[^\n]*").unwrap();
    // name, directives before the body, optional body, directives trailing the body
    static ref TYPE_BLOCK: Regex = Regex::new(
        r"\btype\s+(\w+)\b(?:\s+implements\s+\w+(?:\s*[&,]\s*\w+)*)?((?:\s*@\w+(?:\s*\([^)]*\))?)*)\s*(?:\{([^}]*)\})?((?:\s*@\w+(?:\s*\([^)]*\))?)*)"
    ).unwrap();
    static ref DIRECTIVE: Regex = Regex::new(r"@(\w+)\s*(?:\(([^)]*)\))?").unwrap();
    static ref ARGUMENTS: Regex = Regex::new(r"\([^)]*\)").unwrap();
    static ref FIELD_DIRECTIVE: Regex = Regex::new(r"@\w+").unwrap();
    static ref FIELD: Regex = Regex::new(r"(\w+)\s*:\s*(\[?\s*\w+\s*!?\s*\]?\s*!?)").unwrap();
    static ref FILE_ARG: Regex = Regex::new(r#"file\s*:\s*"([^"]+)""#).unwrap();
    static ref URL_ARG: Regex = Regex::new(r#"url\s*:\s*"([^"]+)""#).unwrap();
    static ref ENTITY_ARG: Regex = Regex::new(r#"entity\s*:\s*"([^"]+)""#).unwrap();
    static ref FIELDS_ARG: Regex = Regex::new(r"fields\s*:\s*\[([^\]]*)\]").unwrap();
}

pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

// ------------- SchemaField -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    name: String,
    field_type: String,
    clean_type: String,
    required: bool,
    list: bool,
    scalar: bool,
}
impl SchemaField {
    /// Derives the modifiers from a raw type such as `[MarketingOrder!]!`.
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        let field_type: String = field_type.into();
        let clean_type = field_type.replace(['[', ']', '!'], "");
        Self {
            name: name.into(),
            required: field_type.ends_with('!'),
            list: field_type.starts_with('[') && field_type.contains(']'),
            scalar: SCALAR_TYPES.contains(&clean_type.as_str()),
            clean_type,
            field_type,
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn field_type(&self) -> &str {
        &self.field_type
    }
    pub fn clean_type(&self) -> &str {
        &self.clean_type
    }
    pub fn required(&self) -> bool {
        self.required
    }
    pub fn is_list(&self) -> bool {
        self.list
    }
    pub fn is_scalar(&self) -> bool {
        self.scalar
    }
}

// ------------- SourceBinding -------------
/// Where the records of a type come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceBinding {
    File(String),
    Api(String),
    Db(String),
    #[default]
    Unknown,
}
impl SourceBinding {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceBinding::File(_) => "file",
            SourceBinding::Api(_) => "api",
            SourceBinding::Db(_) => "db",
            SourceBinding::Unknown => "unknown",
        }
    }
    pub fn locator(&self) -> Option<&str> {
        match self {
            SourceBinding::File(s) | SourceBinding::Api(s) | SourceBinding::Db(s) => Some(s),
            SourceBinding::Unknown => None,
        }
    }
}
impl fmt::Display for SourceBinding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.locator() {
            Some(locator) => write!(f, "{}:{}", self.kind(), locator),
            None => write!(f, "{}", self.kind()),
        }
    }
}

// ------------- Directive -------------
/// A directive as written on a type, kept verbatim for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    name: String,
    arguments: String,
}
impl Directive {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn arguments(&self) -> &str {
        &self.arguments
    }
}

// ------------- SchemaType -------------
#[derive(Debug, Clone)]
pub struct SchemaType {
    name: String,
    namespace: Option<String>,
    // leading part of the name that spells the namespace, as written
    prefix: Option<String>,
    source: SourceBinding,
    fields: Vec<SchemaField>,
    params: Option<Vec<String>>,
    log: bool,
    directives: Vec<Directive>,
}
impl SchemaType {
    pub fn new(name: impl Into<String>, fields: Vec<SchemaField>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            prefix: None,
            source: SourceBinding::Unknown,
            fields,
            params: None,
            log: false,
            directives: Vec::new(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
    pub fn source(&self) -> &SourceBinding {
        &self.source
    }
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }
    /// The fields listed by `@params`, present only on namespace types.
    pub fn params(&self) -> Option<&[String]> {
        self.params.as_deref()
    }
    pub fn log(&self) -> bool {
        self.log
    }
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }
    /// The type name without its namespace prefix, e.g. `Customer` for `MarketingCustomer`.
    pub fn bare_name(&self) -> &str {
        if let Some(prefix) = &self.prefix {
            if self.name.len() > prefix.len() && self.name.starts_with(prefix.as_str()) {
                return &self.name[prefix.len()..];
            }
        }
        &self.name
    }
    fn assign_namespace(&mut self, namespace: String, prefix: String) {
        self.namespace = Some(namespace);
        self.prefix = Some(prefix);
    }
}

// ------------- Registry -------------
/// Keeps schema types by name. The first definition of a name wins, later
/// duplicates are ignored.
#[derive(Debug, Default)]
pub struct Registry {
    types: Vec<SchemaType>,
    lookup: HashMap<String, usize, NameHasher>,
    known_namespaces: Vec<String>,
}
impl Registry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn keep(&mut self, schema_type: SchemaType) -> bool {
        if self.lookup.contains_key(schema_type.name()) {
            debug!(type_name = schema_type.name(), "duplicate type definition ignored");
            return false;
        }
        self.lookup.insert(schema_type.name.clone(), self.types.len());
        self.types.push(schema_type);
        true
    }
    pub fn get(&self, name: &str) -> Option<&SchemaType> {
        self.lookup.get(name).map(|i| &self.types[*i])
    }
    pub fn get_ignore_case(&self, name: &str) -> Option<&SchemaType> {
        self.get(name)
            .or_else(|| self.types.iter().find(|t| t.name.eq_ignore_ascii_case(name)))
    }
    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }
    pub fn types(&self) -> impl Iterator<Item = &SchemaType> {
        self.types.iter()
    }
    pub fn len(&self) -> usize {
        self.types.len()
    }
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
    /// The configured namespace names (lowercase) used for prefix inference.
    pub fn known_namespaces(&self) -> &[String] {
        &self.known_namespaces
    }
    fn get_mut(&mut self, name: &str) -> Option<&mut SchemaType> {
        self.lookup.get(name).map(|i| &mut self.types[*i])
    }
}

// ------------- SchemaParser -------------
pub struct SchemaParser {
    known_namespaces: Vec<String>,
}
impl Default for SchemaParser {
    fn default() -> Self {
        Self::new(&DEFAULT_NAMESPACES)
    }
}
impl SchemaParser {
    pub fn new<S: AsRef<str>>(known_namespaces: &[S]) -> Self {
        Self {
            known_namespaces: known_namespaces
                .iter()
                .map(|n| n.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<Registry> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::SchemaParse(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "loading schema");
        Ok(self.parse(&text))
    }

    pub fn parse(&self, text: &str) -> Registry {
        let cleaned = COMMENT.replace_all(text, "");
        let mut registry = Registry::new();
        registry.known_namespaces = self.known_namespaces.clone();
        for captures in TYPE_BLOCK.captures_iter(&cleaned) {
            let name = &captures[1];
            let body = captures.get(3).map_or("", |m| m.as_str());
            let mut schema_type = SchemaType::new(name, parse_fields(body));
            // directives before the body come first, then those after it
            for run in [&captures[2], &captures[4]] {
                for directive in DIRECTIVE.captures_iter(run) {
                    let arguments = directive.get(2).map_or("", |m| m.as_str());
                    apply_directive(&mut schema_type, &directive[1], arguments.trim());
                }
            }
            registry.keep(schema_type);
        }
        propagate_params_namespaces(&mut registry);
        infer_prefix_namespaces(&mut registry);
        infer_referenced_namespaces(&mut registry);
        info!(types = registry.len(), "parsed schema");
        registry
    }
}

fn parse_fields(body: &str) -> Vec<SchemaField> {
    // field arguments and field level directives carry no shape information
    let body = ARGUMENTS.replace_all(body, "");
    let body = FIELD_DIRECTIVE.replace_all(&body, "");
    FIELD
        .captures_iter(&body)
        .map(|c| {
            let raw: String = c[2].chars().filter(|ch| !ch.is_whitespace()).collect();
            SchemaField::new(&c[1], raw)
        })
        .collect()
}

fn apply_directive(schema_type: &mut SchemaType, name: &str, arguments: &str) {
    let first_capture = |pattern: &Regex| {
        pattern
            .captures(arguments)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };
    let binding = match name {
        "source" => first_capture(&FILE_ARG).map(SourceBinding::File),
        "api" => first_capture(&URL_ARG).map(SourceBinding::Api),
        "db" => first_capture(&ENTITY_ARG).map(SourceBinding::Db),
        _ => None,
    };
    match (name, binding) {
        (_, Some(binding)) => {
            if schema_type.source == SourceBinding::Unknown {
                debug!(type_name = schema_type.name(), %binding, "source binding");
                schema_type.source = binding;
            }
        }
        ("source" | "api" | "db", None) => {
            debug!(type_name = schema_type.name(), directive = name, "malformed directive ignored");
        }
        ("params", None) => match first_capture(&FIELDS_ARG) {
            Some(list) => {
                let fields = list
                    .split(',')
                    .map(|f| f.trim().trim_matches('"').to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
                schema_type.params = Some(fields);
            }
            None => debug!(type_name = schema_type.name(), "malformed @params ignored"),
        },
        ("log", None) => schema_type.log = true,
        _ => (),
    }
    schema_type.directives.push(Directive::new(name, arguments));
}

// A type carrying @params is a namespace: it takes its own lowercase name as
// namespace, and every type whose name it prefixes joins it.
fn propagate_params_namespaces(registry: &mut Registry) {
    let namespace_types: Vec<String> = registry
        .types()
        .filter(|t| t.params.is_some())
        .map(|t| t.name.clone())
        .collect();
    for prefix in namespace_types {
        let namespace = prefix.to_lowercase();
        for schema_type in registry.types.iter_mut() {
            if schema_type.name.starts_with(&prefix) {
                debug!(type_name = %schema_type.name, %namespace, "namespace from @params");
                schema_type.assign_namespace(namespace.clone(), prefix.clone());
            }
        }
    }
}

fn infer_prefix_namespaces(registry: &mut Registry) {
    let prefixes: Vec<(String, String)> = registry
        .known_namespaces
        .iter()
        .map(|n| (capitalize(n), n.clone()))
        .collect();
    for schema_type in registry.types.iter_mut().filter(|t| t.namespace.is_none()) {
        if let Some((prefix, namespace)) = prefixes.iter().find(|(p, _)| schema_type.name.starts_with(p)) {
            debug!(type_name = %schema_type.name, %namespace, "namespace from name prefix");
            schema_type.assign_namespace(namespace.clone(), prefix.clone());
        }
    }
}

// Types still without a namespace adopt the one most common among the types their
// fields reference. Ties go to the namespace referenced first. Runs in registry
// order, so a type can vote using a namespace inferred earlier in this pass.
fn infer_referenced_namespaces(registry: &mut Registry) {
    for i in 0..registry.types.len() {
        if registry.types[i].namespace.is_some() {
            continue;
        }
        // namespace, the prefix its first voter spells it with, votes
        let mut votes: Vec<(String, String, usize)> = Vec::new();
        for field in &registry.types[i].fields {
            let Some(referenced) = registry.get(field.clean_type()) else {
                continue;
            };
            if let (Some(namespace), Some(prefix)) = (&referenced.namespace, &referenced.prefix) {
                match votes.iter_mut().find(|(n, _, _)| n == namespace) {
                    Some((_, _, count)) => *count += 1,
                    None => votes.push((namespace.clone(), prefix.clone(), 1)),
                }
            }
        }
        let mut winner: Option<(String, String, usize)> = None;
        for (namespace, prefix, count) in votes {
            if winner.as_ref().is_none_or(|(_, _, best)| count > *best) {
                winner = Some((namespace, prefix, count));
            }
        }
        if let Some((namespace, prefix, _)) = winner {
            let name = registry.types[i].name.clone();
            debug!(type_name = %name, %namespace, "namespace from field references");
            if let Some(schema_type) = registry.get_mut(&name) {
                schema_type.assign_namespace(namespace, prefix);
            }
        }
    }
}
