//! The top-level model record and its symbol queries.
//!
//! Every pass consumes and produces a [`Model`]. Declarations reference
//! each other by name only, so the queries here are the model's symbol
//! table; they panic on unknown names because the type checker already
//! resolved every reference.

use serde::{Deserialize, Serialize};

use crate::decl::{AssetDecl, Decl, EnumDecl, Metadata, Parameter, RecordDecl, StorageItem, VarDecl};
use crate::foundation::Span;
use crate::function::Function;
use crate::security::Security;
use crate::spec::Specification;
use crate::term::Mterm;
use crate::types::{ContainerIntent, MapKind, Type, TypeNode};
use crate::Ident;

/// Which side of the pipeline needs a generated helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiLoc {
    OnlyExec,
    OnlyFormula,
    ExecFormula,
}

/// Collection flavour a helper is specialised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApiCk {
    Coll,
    View,
    Field,
}

/// Generated helper operations the back-end must emit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApiAsset {
    Get(Ident),
    Set(Ident),
    Add(Ident),
    Remove(Ident),
    Clear(Ident, ApiCk),
    Update(Ident),
    FieldAdd(Ident, Ident),
    FieldRemove(Ident, Ident),
    RemoveAll(Ident, Ident),
    RemoveIf(Ident, ApiCk),
    Contains(Ident, ApiCk),
    Nth(Ident, ApiCk),
    Select(Ident, ApiCk),
    Sort(Ident, ApiCk),
    Count(Ident, ApiCk),
    Sum(Ident, ApiCk),
    Head(Ident, ApiCk),
    Tail(Ident, ApiCk),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiItem {
    pub node: ApiAsset,
    pub loc: ApiLoc,
}

/// A verification obligation surfaced to back-ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiVerif {
    pub name: Ident,
    pub term: Mterm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: Ident,
    pub parameters: Vec<Parameter>,
    pub metadata: Option<Metadata>,
    pub decls: Vec<Decl>,
    pub storage: Vec<StorageItem>,
    pub functions: Vec<Function>,
    pub api_items: Vec<ApiItem>,
    pub api_verif: Vec<ApiVerif>,
    pub specification: Specification,
    pub security: Security,
    /// Free-form annotations threaded to back-ends
    pub extra: Vec<(Ident, String)>,
    pub loc: Span,
}

impl Model {
    pub fn new(name: impl Into<Ident>, loc: Span) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            metadata: None,
            decls: Vec::new(),
            storage: Vec::new(),
            functions: Vec::new(),
            api_items: Vec::new(),
            api_verif: Vec::new(),
            specification: Specification::default(),
            security: Security::default(),
            extra: Vec::new(),
            loc,
        }
    }

    // === Symbol queries ===

    pub fn find_asset(&self, name: &str) -> Option<&AssetDecl> {
        self.decls.iter().find_map(|d| match d {
            Decl::Asset(a) if a.name == name => Some(a),
            _ => None,
        })
    }

    /// Look up an asset declaration.
    ///
    /// Panics on unknown names: the type checker resolved every reference.
    pub fn get_asset(&self, name: &str) -> &AssetDecl {
        self.find_asset(name)
            .unwrap_or_else(|| panic!("asset not found: {name}"))
    }

    pub fn get_enum(&self, name: &str) -> &EnumDecl {
        self.decls
            .iter()
            .find_map(|d| match d {
                Decl::Enum(e) if e.name == name => Some(e),
                _ => None,
            })
            .unwrap_or_else(|| panic!("enum not found: {name}"))
    }

    pub fn find_enum(&self, name: &str) -> Option<&EnumDecl> {
        self.decls.iter().find_map(|d| match d {
            Decl::Enum(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    pub fn get_record(&self, name: &str) -> &RecordDecl {
        self.decls
            .iter()
            .find_map(|d| match d {
                Decl::Record(r) | Decl::Event(r) if r.name == name => Some(r),
                _ => None,
            })
            .unwrap_or_else(|| panic!("record not found: {name}"))
    }

    pub fn find_var(&self, name: &str) -> Option<&VarDecl> {
        self.decls.iter().find_map(|d| match d {
            Decl::Var(v) if v.name == name => Some(v),
            _ => None,
        })
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.fs.name == name)
    }

    /// The asset's single primary key, after multi-key flattening.
    ///
    /// For a multi-key asset this is the synthetic flattened key; callers
    /// before `process_multi_keys` must consult `keys` instead.
    pub fn get_asset_key(&self, name: &str) -> (Ident, Type) {
        let asset = self.get_asset(name);
        match asset.keys.as_slice() {
            [key] => {
                let field = asset
                    .field(key)
                    .unwrap_or_else(|| panic!("key field {key} not found in asset {name}"));
                (key.clone(), field.typ.clone())
            }
            keys => {
                let types = keys
                    .iter()
                    .map(|k| {
                        asset
                            .field(k)
                            .unwrap_or_else(|| panic!("key field {k} not found in asset {name}"))
                            .typ
                            .clone()
                    })
                    .collect();
                (format!("_{name}_key"), Type::tuple(types))
            }
        }
    }

    /// Target asset and intent of a container field.
    pub fn get_field_container(&self, asset: &str, field: &str) -> (Ident, ContainerIntent) {
        let decl = self.get_asset(asset);
        let f = decl
            .field(field)
            .unwrap_or_else(|| panic!("field {field} not found in asset {asset}"));
        match &f.typ.node {
            TypeNode::Container(inner, intent) => {
                let target = inner
                    .asset_name()
                    .unwrap_or_else(|| panic!("container field {asset}.{field} has no asset type"));
                (target.clone(), *intent)
            }
            _ => panic!("field {asset}.{field} is not a container"),
        }
    }

    pub fn is_partition(&self, asset: &str, field: &str) -> bool {
        let decl = self.get_asset(asset);
        matches!(
            decl.field(field).map(|f| &f.typ.node),
            Some(TypeNode::Container(_, ContainerIntent::Partition))
        )
    }

    pub fn is_aggregate(&self, asset: &str, field: &str) -> bool {
        let decl = self.get_asset(asset);
        matches!(
            decl.field(field).map(|f| &f.typ.node),
            Some(TypeNode::Container(_, ContainerIntent::Aggregate))
        )
    }

    /// True when the asset record is only its key: storage drops to a set.
    pub fn is_asset_single_field(&self, name: &str) -> bool {
        let asset = self.get_asset(name);
        asset.fields.iter().filter(|f| !f.shadow).count() == asset.keys.len()
    }

    pub fn get_map_kind(&self, name: &str) -> MapKind {
        self.get_asset(name).map_kind
    }

    pub fn is_asset_map(&self, name: &str) -> bool {
        matches!(self.get_map_kind(name), MapKind::Map)
    }

    /// Every partition relation of the model: `(owner asset, field, child)`.
    pub fn get_partitions(&self) -> Vec<(Ident, Ident, Ident)> {
        let mut out = Vec::new();
        for decl in &self.decls {
            if let Decl::Asset(a) = decl {
                for f in &a.fields {
                    if let TypeNode::Container(inner, ContainerIntent::Partition) = &f.typ.node {
                        if let Some(child) = inner.asset_name() {
                            out.push((a.name.clone(), f.name.clone(), child.clone()));
                        }
                    }
                }
            }
        }
        out
    }

    /// True when some asset uses `child` as a partition target.
    pub fn is_partition_target(&self, child: &str) -> Option<(Ident, Ident)> {
        self.get_partitions()
            .into_iter()
            .find(|(_, _, c)| c == child)
            .map(|(a, f, _)| (a, f))
    }

    /// Names of every property (postcondition, invariant, security
    /// predicate) in the model, for specification-guided pruning.
    pub fn retrieve_all_properties(&self) -> Vec<Ident> {
        let mut out = Vec::new();
        for f in &self.functions {
            if let Some(spec) = &f.fs.spec {
                out.extend(spec.postconditions.iter().map(|p| p.name.clone()));
            }
        }
        out.extend(
            self.specification
                .postconditions
                .iter()
                .map(|p| p.name.clone()),
        );
        out.extend(self.specification.invariants.iter().map(|i| i.label.clone()));
        out.extend(self.security.items.iter().map(|s| s.label.clone()));
        out
    }

    pub fn retrieve_property(&self, id: &str) -> bool {
        self.retrieve_all_properties().iter().any(|p| p == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{AssetField, VariableKind};

    fn asset_with_fields(name: &str, keys: Vec<&str>, fields: Vec<(&str, Type)>) -> AssetDecl {
        AssetDecl {
            name: name.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            sort: vec![],
            fields: fields
                .into_iter()
                .map(|(n, t)| AssetField {
                    name: n.into(),
                    original_type: t.clone(),
                    typ: t,
                    default: None,
                    shadow: false,
                    loc: Span::zero(0),
                })
                .collect(),
            init: vec![],
            invariants: vec![],
            state: None,
            map_kind: MapKind::BigMap,
            loc: Span::zero(0),
        }
    }

    fn model_with(assets: Vec<AssetDecl>) -> Model {
        let mut m = Model::new("test", Span::zero(0));
        m.decls = assets.into_iter().map(Decl::Asset).collect();
        m
    }

    #[test]
    fn test_single_key_lookup() {
        let m = model_with(vec![asset_with_fields(
            "ledger",
            vec!["holder"],
            vec![("holder", Type::address()), ("tokens", Type::nat())],
        )]);
        let (key, ty) = m.get_asset_key("ledger");
        assert_eq!(key, "holder");
        assert_eq!(ty, Type::address());
    }

    #[test]
    fn test_multi_key_flattens_to_tuple() {
        let m = model_with(vec![asset_with_fields(
            "allowance",
            vec!["owner", "spender"],
            vec![
                ("owner", Type::address()),
                ("spender", Type::address()),
                ("amount", Type::nat()),
            ],
        )]);
        let (key, ty) = m.get_asset_key("allowance");
        assert_eq!(key, "_allowance_key");
        assert_eq!(ty, Type::tuple(vec![Type::address(), Type::address()]));
    }

    #[test]
    fn test_partition_discovery() {
        let mut mile = asset_with_fields(
            "mile",
            vec!["id"],
            vec![("id", Type::string()), ("amount", Type::int())],
        );
        mile.map_kind = MapKind::BigMap;
        let owner = asset_with_fields(
            "owner",
            vec!["addr"],
            vec![
                ("addr", Type::address()),
                (
                    "miles",
                    Type::container(Type::asset("mile"), ContainerIntent::Partition),
                ),
            ],
        );
        let m = model_with(vec![mile, owner]);

        assert!(m.is_partition("owner", "miles"));
        assert!(!m.is_aggregate("owner", "miles"));
        assert_eq!(
            m.get_partitions(),
            vec![("owner".into(), "miles".into(), "mile".into())]
        );
        assert_eq!(
            m.is_partition_target("mile"),
            Some(("owner".into(), "miles".into()))
        );
    }

    #[test]
    fn test_single_field_asset() {
        let m = model_with(vec![asset_with_fields(
            "voter",
            vec!["addr"],
            vec![("addr", Type::address())],
        )]);
        assert!(m.is_asset_single_field("voter"));
    }

    #[test]
    #[should_panic(expected = "asset not found")]
    fn test_unknown_asset_panics() {
        let m = model_with(vec![]);
        m.get_asset("ghost");
    }

    #[test]
    fn test_find_var() {
        let mut m = Model::new("test", Span::zero(0));
        m.decls.push(Decl::Var(VarDecl {
            name: "admin".into(),
            typ: Type::address(),
            default: None,
            kind: VariableKind::Constant,
            invariants: vec![],
            loc: Span::zero(0),
        }));
        assert!(m.find_var("admin").is_some());
        assert!(m.find_var("other").is_none());
    }
}
