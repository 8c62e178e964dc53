//! Security surface: labeled role/entry access predicates.

use serde::{Deserialize, Serialize};

use crate::foundation::Span;
use crate::Ident;

/// Entry selector of a security predicate: every entry, a named list, or
/// everything but a named list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryScope {
    Any,
    Entries(Vec<Ident>),
    ExceptEntries(Vec<Ident>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityNode {
    OnlyByRole { scope: EntryScope, roles: Vec<Ident> },
    OnlyInEntry { action: Ident, scope: EntryScope },
    OnlyByRoleInEntry { action: Ident, roles: Vec<Ident>, scope: EntryScope },
    NotByRole { scope: EntryScope, roles: Vec<Ident> },
    NotInEntry { action: Ident, scope: EntryScope },
    TransferredBy { scope: EntryScope },
    TransferredTo { scope: EntryScope },
    NoStorageFail { scope: EntryScope },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPredicate {
    pub label: Ident,
    pub node: SecurityNode,
    pub loc: Span,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Security {
    pub items: Vec<SecurityPredicate>,
}
