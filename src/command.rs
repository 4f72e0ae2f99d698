//! Command text handling: `SELECT <fields> FROM <table> [WHERE <filter>]`.

use std::fmt;

use regex::Regex;

use crate::error::{Result, RowSetError};

const SELECT_FIELDS_PATTERN: &str = r"(?is)^\s*select(.+?)\bfrom\b";
const TABLE_PATTERN: &str =
    r#"(?i)\bfrom\s+((?:(?:"[^"]+"|`[^`]+`|\w+)\.){0,2}(?:"[^"]+"|`[^`]+`|\w+))"#;
const WHERE_PATTERN: &str = r"(?is)\bwhere\s+(.+)$";

/// A `[catalog.][schema.]table` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableLocation {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl TableLocation {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Parses a possibly quoted, dot separated identifier.
    pub fn parse(identifier: &str) -> Result<Self> {
        let parts = split_identifier(identifier.trim())?;
        match parts.as_slice() {
            [table] => Ok(Self::new(table.clone())),
            [schema, table] => Ok(Self::new(table.clone()).with_schema(schema.clone())),
            [catalog, schema, table] => Ok(Self {
                catalog: Some(catalog.clone()),
                schema: Some(schema.clone()),
                table: table.clone(),
            }),
            _ => Err(RowSetError::Setup(format!(
                "invalid table identifier: {}",
                identifier
            ))),
        }
    }
}

impl fmt::Display for TableLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{}.", quote_identifier(catalog))?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{}.", quote_identifier(schema))?;
        }
        write!(f, "{}", quote_identifier(&self.table))
    }
}

fn split_identifier(identifier: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in identifier.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '`' => quote = Some(ch),
            None if ch == '.' => parts.push(std::mem::take(&mut current)),
            None => current.push(ch),
        }
    }
    if quote.is_some() {
        return Err(RowSetError::Setup(format!(
            "unterminated quote in identifier: {}",
            identifier
        )));
    }
    parts.push(current);
    if parts.iter().any(|p| p.is_empty()) {
        return Err(RowSetError::Setup(format!(
            "empty part in identifier: {}",
            identifier
        )));
    }
    Ok(parts)
}

fn quote_identifier(name: &str) -> String {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// The parts of a table command the row set rebuilds its queries from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCommand {
    pub fields: String,
    pub location: TableLocation,
    pub filter: Option<String>,
}

impl TableCommand {
    pub fn for_table(location: TableLocation) -> Self {
        Self {
            fields: "*".to_string(),
            location,
            filter: None,
        }
    }

    pub fn parse(command: &str) -> Result<Self> {
        let command = command.trim().trim_end_matches(';').trim_end();
        let select_re = compile(SELECT_FIELDS_PATTERN)?;
        let table_re = compile(TABLE_PATTERN)?;
        let where_re = compile(WHERE_PATTERN)?;

        let fields = select_re
            .captures(command)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| "*".to_string());
        let table = table_re
            .captures(command)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                RowSetError::Setup(format!(
                    "command does not contain a table name, should be like \"select * from tablename\": {}",
                    command
                ))
            })?;
        let filter = where_re
            .captures(command)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|w| !w.is_empty());

        Ok(Self {
            fields,
            location: TableLocation::parse(&table)?,
            filter,
        })
    }

    /// ` FROM <table> [WHERE <filter> | WHERE (<filter>) AND <extra>]`
    pub fn from_clause(&self, extra_filter: Option<&str>) -> String {
        let mut clause = format!(" FROM {}", self.location);
        match (&self.filter, extra_filter) {
            (Some(filter), Some(extra)) => {
                clause.push_str(&format!(" WHERE ({}) AND {}", filter, extra))
            }
            (Some(filter), None) => clause.push_str(&format!(" WHERE {}", filter)),
            (None, Some(extra)) => clause.push_str(&format!(" WHERE {}", extra)),
            (None, None) => {}
        }
        clause
    }
}

impl fmt::Display for TableCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {}{}", self.fields, self.from_clause(None))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| RowSetError::Setup(format!("bad command pattern: {}", e)))
}
