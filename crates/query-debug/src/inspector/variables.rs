//! Variables and scope naming.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::value::SqlValue;

pub(crate) const GLOBAL_SCOPE: &str = "global";
pub(crate) const SESSION_SCOPE: &str = "session";
pub(crate) const LOCAL_SCOPE: &str = "local";

/// Where a variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariableScope {
    /// Bound to one procedure frame or the top-level script.
    Local,
    /// Lives as long as the debugging session.
    Session,
    /// Server/global settings visible to the session.
    Global,
}

impl VariableScope {
    /// Classify a scope name (`local`, `local:<procedure>`, `session`, `global`).
    #[must_use]
    pub fn from_scope_name(name: &str) -> Self {
        match name {
            GLOBAL_SCOPE => VariableScope::Global,
            SESSION_SCOPE => VariableScope::Session,
            _ => VariableScope::Local,
        }
    }
}

/// Scope name of the local frame for a procedure (or the script).
#[must_use]
pub fn local_scope_name(procedure_id: Option<&str>) -> SmolStr {
    match procedure_id {
        Some(procedure) => SmolStr::new(format!("{LOCAL_SCOPE}:{procedure}")),
        None => SmolStr::new(LOCAL_SCOPE),
    }
}

/// A named value visible to the debugger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: SmolStr,
    pub value: SqlValue,
    /// Declared or inferred type tag.
    pub type_name: SmolStr,
    pub scope: VariableScope,
    pub mutable: bool,
    /// Fields of structured values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Variable>,
}

impl Variable {
    /// A mutable variable whose type is inferred from its value.
    #[must_use]
    pub fn new(name: impl Into<SmolStr>, value: impl Into<SqlValue>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            type_name: SmolStr::new(value.type_name()),
            value,
            scope: VariableScope::Local,
            mutable: true,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.mutable = false;
        self
    }

    #[must_use]
    pub fn with_type(mut self, type_name: impl Into<SmolStr>) -> Self {
        self.type_name = type_name.into();
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<Variable>) -> Self {
        self.children = children;
        self
    }

    /// Resolve a dotted path (`row.name`) through nested children.
    #[must_use]
    pub fn resolve_path<'a>(&'a self, path: &[&str]) -> Option<&'a Variable> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        self.children
            .iter()
            .find(|child| child.name.eq_ignore_ascii_case(first))
            .and_then(|child| child.resolve_path(rest))
    }
}
