//! Functions: entries, getters, views and local functions.

use serde::{Deserialize, Serialize};

use crate::foundation::Span;
use crate::spec::Specification;
use crate::term::Mterm;
use crate::types::Type;
use crate::Ident;

/// Where a view may be called from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewVisibility {
    OnChain,
    OffChain,
    OnAndOffChain,
}

/// Function flavour; everything but `Entry` carries its return type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FunctionKind {
    Entry,
    Getter(Type),
    View(Type, ViewVisibility),
    Function(Type),
}

impl FunctionKind {
    pub fn return_type(&self) -> Option<&Type> {
        match self {
            FunctionKind::Entry => None,
            FunctionKind::Getter(t) | FunctionKind::Function(t) => Some(t),
            FunctionKind::View(t, _) => Some(t),
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, FunctionKind::Entry)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: Ident,
    pub typ: Type,
    pub default: Option<Mterm>,
    pub loc: Span,
}

/// Shared body of every function flavour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionStruct {
    pub name: Ident,
    pub args: Vec<Argument>,
    /// Extra arguments synthesised by lowering (e.g. the getter callback)
    pub eargs: Vec<Argument>,
    pub body: Mterm,
    /// Storage variables this function reads or writes; filled by
    /// `fill_stovars`
    pub stovars: Vec<Ident>,
    pub spec: Option<Specification>,
    pub loc: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub kind: FunctionKind,
    pub fs: FunctionStruct,
}

impl Function {
    pub fn name(&self) -> &Ident {
        &self.fs.name
    }
}
