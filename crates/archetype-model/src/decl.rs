//! Declarations: variables, enums, assets, records and events.

use serde::{Deserialize, Serialize};

use crate::foundation::Span;
use crate::spec::LabeledTerm;
use crate::term::Mterm;
use crate::types::{MapKind, Type};
use crate::Ident;

/// Mutability of a declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    Constant,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: Ident,
    pub typ: Type,
    pub default: Option<Mterm>,
    pub kind: VariableKind,
    pub invariants: Vec<LabeledTerm>,
    pub loc: Span,
}

/// One constructor of an enum, with zero or more typed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumItem {
    pub name: Ident,
    pub args: Vec<Type>,
    pub invariants: Vec<LabeledTerm>,
    pub loc: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: Ident,
    pub values: Vec<EnumItem>,
    /// Constructor used to initialise values of this enum
    pub initial: Ident,
    pub loc: Span,
}

impl EnumDecl {
    /// Position of a constructor in declaration order.
    ///
    /// Panics on unknown constructors: the type checker resolved them.
    pub fn position(&self, ctor: &str) -> usize {
        self.values
            .iter()
            .position(|v| v.name == ctor)
            .unwrap_or_else(|| panic!("unknown enum constructor {}::{ctor}", self.name))
    }

    /// True when no constructor carries arguments.
    pub fn is_simple(&self) -> bool {
        self.values.iter().all(|v| v.args.is_empty())
    }
}

/// One column of an asset.
///
/// `original_type` is the surface type; `typ` is rewritten by the lowering
/// passes (rationals, dates, multi-key flattening) while the original is
/// kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetField {
    pub name: Ident,
    pub original_type: Type,
    pub typ: Type,
    pub default: Option<Mterm>,
    pub shadow: bool,
    pub loc: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDecl {
    pub name: Ident,
    /// Primary key field names; flattened to one by `process_multi_keys`
    pub keys: Vec<Ident>,
    /// Default sort criteria
    pub sort: Vec<Ident>,
    pub fields: Vec<AssetField>,
    /// Initial collection contents, literal assets only
    pub init: Vec<Mterm>,
    pub invariants: Vec<LabeledTerm>,
    /// State enum, when declared `with states`
    pub state: Option<Ident>,
    pub map_kind: MapKind,
    pub loc: Span,
}

impl AssetDecl {
    pub fn field(&self, name: &str) -> Option<&AssetField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Index of a field in declaration order.
    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.keys.iter().any(|k| k == name)
    }

    /// Non-shadow value fields, i.e. everything but the keys.
    pub fn value_fields(&self) -> impl Iterator<Item = &AssetField> {
        self.fields
            .iter()
            .filter(move |f| !self.is_key(&f.name) && !f.shadow)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordField {
    pub name: Ident,
    pub typ: Type,
    pub loc: Span,
}

/// A record or event declaration (events share the record shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDecl {
    pub name: Ident,
    pub fields: Vec<RecordField>,
    pub loc: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Var(VarDecl),
    Enum(EnumDecl),
    Asset(AssetDecl),
    Record(RecordDecl),
    Event(RecordDecl),
}

impl Decl {
    pub fn name(&self) -> &Ident {
        match self {
            Decl::Var(d) => &d.name,
            Decl::Enum(d) => &d.name,
            Decl::Asset(d) => &d.name,
            Decl::Record(d) => &d.name,
            Decl::Event(d) => &d.name,
        }
    }
}

/// Storage slot provenance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageModelType {
    Var,
    Const,
    Asset(Ident),
}

/// One slot of contract storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageItem {
    pub id: Ident,
    pub model_type: StorageModelType,
    pub typ: Type,
    pub default: Mterm,
    /// Specification-only slot, invisible to runtime semantics
    pub ghost: bool,
    pub loc: Span,
}

/// A contract parameter, materialised into storage by `process_parameter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: Ident,
    pub typ: Type,
    pub default: Option<Mterm>,
    /// Deployment-time value, when the driver provided one
    pub value: Option<Mterm>,
    pub constant: bool,
    pub loc: Span,
}

/// Contract metadata source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metadata {
    /// An off-chain URI
    Uri(String),
    /// JSON embedded in storage under the `here` pointer
    Json(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::Span;

    fn field(name: &str, typ: Type) -> AssetField {
        AssetField {
            name: name.into(),
            original_type: typ.clone(),
            typ,
            default: None,
            shadow: false,
            loc: Span::zero(0),
        }
    }

    #[test]
    fn test_value_fields_skip_keys_and_shadows() {
        let mut shadow = field("ghost", Type::nat());
        shadow.shadow = true;
        let asset = AssetDecl {
            name: "mile".into(),
            keys: vec!["id".into()],
            sort: vec![],
            fields: vec![field("id", Type::string()), field("amount", Type::int()), shadow],
            init: vec![],
            invariants: vec![],
            state: None,
            map_kind: MapKind::BigMap,
            loc: Span::zero(0),
        };

        let names: Vec<_> = asset.value_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["amount"]);
    }

    #[test]
    fn test_enum_position() {
        let decl = EnumDecl {
            name: "order_state".into(),
            values: ["Placed", "Vin_assigned", "Delivered"]
                .iter()
                .map(|n| EnumItem {
                    name: (*n).into(),
                    args: vec![],
                    invariants: vec![],
                    loc: Span::zero(0),
                })
                .collect(),
            initial: "Placed".into(),
            loc: Span::zero(0),
        };
        assert_eq!(decl.position("Vin_assigned"), 1);
        assert!(decl.is_simple());
    }

    #[test]
    #[should_panic(expected = "unknown enum constructor")]
    fn test_enum_position_panics_on_unknown() {
        let decl = EnumDecl {
            name: "e".into(),
            values: vec![],
            initial: "A".into(),
            loc: Span::zero(0),
        };
        decl.position("Nope");
    }
}
