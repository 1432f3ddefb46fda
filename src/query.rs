//! The canonical query document, parsed from JSON into typed branches.
//!
//! ```json
//! {"query": {
//!     "marketing": {"customers": {"fields": ["id", "name"], "sortBy": "name"}},
//!     "FinanceEmployee": {"where": {"salary": {"$gt": 50000}}},
//!     "metadata": {"fields": ["types"]}
//! }}
//! ```

use crate::datatype::Value;
use crate::error::{EngineError, Result};

pub const METADATA: &str = "metadata";

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidQuery(message.into())
}

// ------------- Operators -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    Nin,
}
impl Operator {
    /// Accepts `gt` as well as `$gt`, in any case.
    pub fn parse(text: &str) -> Option<Operator> {
        let name = text.strip_prefix('$').unwrap_or(text).to_ascii_lowercase();
        let operator = match name.as_str() {
            "eq" => Operator::Eq,
            "ne" | "neq" => Operator::Ne,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "contains" => Operator::Contains,
            "startswith" => Operator::StartsWith,
            "endswith" => Operator::EndsWith,
            "in" => Operator::In,
            "nin" => Operator::Nin,
            _ => return None,
        };
        Some(operator)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub operand: Value,
}

// ------------- Includes -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Include {
    /// Every field of the related records.
    All,
    Fields(Vec<String>),
    Nested {
        fields: Option<Vec<String>>,
        include: IncludeSpec,
    },
}
impl Include {
    pub fn fields(&self) -> Option<&[String]> {
        match self {
            Include::All => None,
            Include::Fields(fields) => Some(fields.as_slice()),
            Include::Nested { fields, .. } => fields.as_deref(),
        }
    }
    pub fn nested(&self) -> Option<&IncludeSpec> {
        match self {
            Include::Nested { include, .. } if !include.is_empty() => Some(include),
            _ => None,
        }
    }
}

/// Relationship fields to attach, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncludeSpec {
    entries: Vec<(String, Include)>,
}
impl IncludeSpec {
    pub fn new(entries: Vec<(String, Include)>) -> Self {
        Self { entries }
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Include)> {
        self.entries.iter().map(|(name, include)| (name.as_str(), include))
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// `{"orders": true}`, `{"orders": ["id"]}`, `{"orders": {"fields": [...], "include": {...}}}`,
    /// or a bare list of relationship names. `false` leaves a relationship out.
    pub fn parse(node: &serde_json::Value) -> Result<IncludeSpec> {
        let mut entries = Vec::new();
        match node {
            serde_json::Value::Object(map) => {
                for (name, spec) in map {
                    let include = match spec {
                        serde_json::Value::Bool(true) => Include::All,
                        serde_json::Value::Bool(false) => continue,
                        serde_json::Value::Array(_) => Include::Fields(parse_field_list(spec)?),
                        serde_json::Value::Object(nested) => Include::Nested {
                            fields: match nested.get("fields") {
                                Some(fields) => parse_fields(fields)?,
                                None => None,
                            },
                            include: match nested.get("include") {
                                Some(include) => IncludeSpec::parse(include)?,
                                None => IncludeSpec::default(),
                            },
                        },
                        other => return Err(invalid(format!("include '{}' must be true, a list or an object, got {}", name, other))),
                    };
                    entries.push((name.clone(), include));
                }
            }
            serde_json::Value::Array(_) => {
                for name in parse_field_list(node)? {
                    entries.push((name, Include::All));
                }
            }
            other => return Err(invalid(format!("include must be an object or a list, got {}", other))),
        }
        Ok(IncludeSpec { entries })
    }
}

// ------------- Leaves -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}
impl SortOrder {
    pub fn parse(text: &str) -> Result<SortOrder> {
        match text.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            _ => Err(invalid(format!("unknown sort order '{}'", text))),
        }
    }
}

/// One collection request: what to filter, include, sort, page and project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafQuery {
    /// `None` projects every field.
    pub fields: Option<Vec<String>>,
    pub conditions: Vec<Condition>,
    pub include: IncludeSpec,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Explicit choice between a single object and an array when filtering.
    pub single_result: Option<bool>,
}
impl LeafQuery {
    /// A bare list is shorthand for `{"fields": [...]}`.
    pub fn parse(node: &serde_json::Value) -> Result<LeafQuery> {
        if node.is_array() {
            return Ok(LeafQuery {
                fields: parse_fields(node)?,
                ..LeafQuery::default()
            });
        }
        let map = node
            .as_object()
            .ok_or_else(|| invalid(format!("expected an object, got {}", node)))?;
        let mut leaf = LeafQuery::default();
        if let Some(fields) = map.get("fields") {
            leaf.fields = parse_fields(fields)?;
        }
        if let Some(filter) = map.get("where") {
            leaf.conditions = parse_where(filter)?;
        }
        if let Some(include) = map.get("include") {
            leaf.include = IncludeSpec::parse(include)?;
        }
        if let Some(sort_by) = map.get("sortBy") {
            match sort_by {
                serde_json::Value::String(field) if !field.is_empty() => leaf.sort_by = Some(field.clone()),
                serde_json::Value::Null => (),
                other => return Err(invalid(format!("sortBy must be a field name, got {}", other))),
            }
        }
        if let Some(order) = map.get("sortOrder") {
            match order {
                serde_json::Value::String(order) => leaf.sort_order = SortOrder::parse(order)?,
                serde_json::Value::Null => (),
                other => return Err(invalid(format!("sortOrder must be a string, got {}", other))),
            }
        }
        leaf.limit = parse_count(map.get("limit"), "limit")?;
        leaf.offset = parse_count(map.get("offset"), "offset")?;
        match map.get("singleResult") {
            None | Some(serde_json::Value::Null) => (),
            Some(serde_json::Value::Bool(single)) => leaf.single_result = Some(*single),
            Some(other) => return Err(invalid(format!("singleResult must be a boolean, got {}", other))),
        }
        Ok(leaf)
    }
    pub fn has_filter(&self) -> bool {
        !self.conditions.is_empty()
    }
}

fn parse_count(node: Option<&serde_json::Value>, name: &str) -> Result<Option<usize>> {
    match node {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => match n.as_u64() {
            Some(count) => Ok(Some(usize::try_from(count).unwrap_or(usize::MAX))),
            None => Err(invalid(format!("{} must be a non-negative integer, got {}", name, n))),
        },
        Some(other) => Err(invalid(format!("{} must be a non-negative integer, got {}", name, other))),
    }
}

fn parse_field_list(node: &serde_json::Value) -> Result<Vec<String>> {
    let items = node
        .as_array()
        .ok_or_else(|| invalid(format!("expected a list of field names, got {}", node)))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("field names must be strings, got {}", item)))
        })
        .collect()
}

// `["*"]`, `"*"` and an empty list all mean every field.
fn parse_fields(node: &serde_json::Value) -> Result<Option<Vec<String>>> {
    let fields = match node {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::String(s) if s == "*" => return Ok(None),
        serde_json::Value::String(s) => vec![s.clone()],
        _ => parse_field_list(node)?,
    };
    if fields.is_empty() || fields.iter().any(|f| f == "*") {
        Ok(None)
    } else {
        Ok(Some(fields))
    }
}

fn parse_where(node: &serde_json::Value) -> Result<Vec<Condition>> {
    let map = match node {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => return Ok(Vec::new()),
        other => return Err(invalid(format!("where must be an object, got {}", other))),
    };
    let mut conditions = Vec::new();
    for (field, spec) in map {
        match spec {
            serde_json::Value::Object(operators) => {
                for (name, operand) in operators {
                    let operator = Operator::parse(name)
                        .ok_or_else(|| invalid(format!("unknown operator '{}' on '{}'", name, field)))?;
                    if matches!(operator, Operator::In | Operator::Nin) && !operand.is_array() {
                        return Err(invalid(format!("operator '{}' on '{}' needs a list", name, field)));
                    }
                    conditions.push(Condition {
                        field: field.clone(),
                        operator,
                        operand: Value::from(operand),
                    });
                }
            }
            value => conditions.push(Condition {
                field: field.clone(),
                operator: Operator::Eq,
                operand: Value::from(value),
            }),
        }
    }
    Ok(conditions)
}

// ------------- Documents -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Branch {
    /// Introspection; an empty list of sections means all of them.
    Metadata(Vec<String>),
    /// A type or collection queried directly by name.
    Type(LeafQuery),
    /// A namespace with its entity sub-queries.
    Namespace(Vec<(String, LeafQuery)>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryDocument {
    branches: Vec<(String, Branch)>,
}
impl QueryDocument {
    /// Reads `{"query": {...}}`. A node carrying `fields` or `where`, or a bare field
    /// list, is a direct type query. Any other object is a namespace of entity queries.
    pub fn parse(document: &serde_json::Value) -> Result<QueryDocument> {
        let query = document
            .get("query")
            .ok_or_else(|| invalid("missing 'query'"))?
            .as_object()
            .ok_or_else(|| invalid("'query' must be an object"))?;
        let mut branches = Vec::new();
        for (key, node) in query {
            let branch = if key == METADATA {
                Branch::Metadata(match node.get("fields") {
                    Some(fields) => parse_fields(fields)?.unwrap_or_default(),
                    None => match node {
                        serde_json::Value::Array(_) => parse_fields(node)?.unwrap_or_default(),
                        _ => Vec::new(),
                    },
                })
            } else if node.is_array() {
                Branch::Type(LeafQuery::parse(node)?)
            } else {
                let map = node
                    .as_object()
                    .ok_or_else(|| invalid(format!("'{}' must be an object", key)))?;
                if map.contains_key("fields") || map.contains_key("where") {
                    Branch::Type(LeafQuery::parse(node)?)
                } else {
                    let mut entities = Vec::new();
                    for (entity, leaf) in map {
                        entities.push((entity.clone(), LeafQuery::parse(leaf)?));
                    }
                    Branch::Namespace(entities)
                }
            };
            branches.push((key.clone(), branch));
        }
        Ok(QueryDocument { branches })
    }
    pub fn branches(&self) -> &[(String, Branch)] {
        &self.branches
    }
    pub fn has_metadata(&self) -> bool {
        self.branches.iter().any(|(_, b)| matches!(b, Branch::Metadata(_)))
    }
}
