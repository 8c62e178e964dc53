//! Semantic type system of the model.
//!
//! Every term carries a [`Type`]: a semantic tag plus an optional annotation
//! used for structural labeling of sum-type arms on the target VM. Types are
//! plain trees; asset, enum and record types refer to their declaration by
//! name only.
//!
//! # Design
//!
//! - **No inference here** — the type checker resolved everything; the
//!   middle-end only rewrites types alongside terms (e.g. `rational` to
//!   `(int, nat)`, `date` to `timestamp`).
//! - **Containers are transient** — [`TypeNode::Container`] tags an
//!   asset-backed collection with the intent it was written with
//!   (partition, aggregate, view, …); asset lowering eliminates it.

use serde::{Deserialize, Serialize};

use crate::Ident;

/// How a value of an asset-backed container type is intended to be used.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ContainerIntent {
    /// The asset collection itself
    Collection,
    /// A container field owning its children
    Partition,
    /// A container field referencing existing children
    Aggregate,
    /// Generic asset container position
    AssetContainer,
    /// The key column of an asset
    AssetKey,
    /// The value column of an asset
    AssetValue,
    /// An ordered key list derived by `select`/`sort`/`head`/`tail`
    View,
}

/// Physical map flavour chosen for an asset collection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum MapKind {
    /// Strict in-memory map
    Map,
    /// Lazy big map
    BigMap,
    /// Big map with an insertion-order index and size counter
    IterableBigMap,
}

/// Semantic type tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypeNode {
    Unit,
    Bool,
    Int,
    Nat,
    Rational,
    String,
    Bytes,
    Address,
    TxRollupL2Address,
    Date,
    Duration,
    Timestamp,
    Currency,
    Key,
    KeyHash,
    Signature,
    ChainId,
    Bls12381Fr,
    Bls12381G1,
    Bls12381G2,
    Never,
    Chest,
    ChestKey,

    Option(Box<Type>),
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>, Box<Type>),
    BigMap(Box<Type>, Box<Type>),
    IterableBigMap(Box<Type>, Box<Type>),
    Or(Box<Type>, Box<Type>),
    Contract(Box<Type>),
    Ticket(Box<Type>),
    SaplingState(u32),
    SaplingTransaction(u32),
    Lambda(Box<Type>, Box<Type>),
    Tuple(Vec<Type>),

    /// Asset-backed container: the element type is always `Asset(_)`.
    Container(Box<Type>, ContainerIntent),

    Asset(Ident),
    Enum(Ident),
    Record(Ident),
    Event(Ident),
    State,
    Storage,
    Operation,
}

/// A semantic type with an optional structural annotation.
///
/// Annotations name sum-type arms and record fields on the target VM; they
/// are preserved verbatim through every rewrite.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Type {
    pub node: TypeNode,
    pub annotation: Option<Ident>,
}

impl Type {
    pub fn new(node: TypeNode) -> Self {
        Self {
            node,
            annotation: None,
        }
    }

    pub fn annotated(node: TypeNode, annotation: impl Into<Ident>) -> Self {
        Self {
            node,
            annotation: Some(annotation.into()),
        }
    }

    /// Replace the annotation, keeping the tag.
    pub fn with_annotation(mut self, annotation: impl Into<Ident>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    /// Drop the annotation, keeping the tag.
    pub fn without_annotation(mut self) -> Self {
        self.annotation = None;
        self
    }

    pub fn unit() -> Self {
        Self::new(TypeNode::Unit)
    }

    pub fn bool() -> Self {
        Self::new(TypeNode::Bool)
    }

    pub fn int() -> Self {
        Self::new(TypeNode::Int)
    }

    pub fn nat() -> Self {
        Self::new(TypeNode::Nat)
    }

    pub fn rational() -> Self {
        Self::new(TypeNode::Rational)
    }

    pub fn string() -> Self {
        Self::new(TypeNode::String)
    }

    pub fn bytes() -> Self {
        Self::new(TypeNode::Bytes)
    }

    pub fn address() -> Self {
        Self::new(TypeNode::Address)
    }

    pub fn date() -> Self {
        Self::new(TypeNode::Date)
    }

    pub fn duration() -> Self {
        Self::new(TypeNode::Duration)
    }

    pub fn timestamp() -> Self {
        Self::new(TypeNode::Timestamp)
    }

    pub fn currency() -> Self {
        Self::new(TypeNode::Currency)
    }

    pub fn operation() -> Self {
        Self::new(TypeNode::Operation)
    }

    pub fn state() -> Self {
        Self::new(TypeNode::State)
    }

    pub fn option(t: Type) -> Self {
        Self::new(TypeNode::Option(Box::new(t)))
    }

    pub fn list(t: Type) -> Self {
        Self::new(TypeNode::List(Box::new(t)))
    }

    pub fn set(t: Type) -> Self {
        Self::new(TypeNode::Set(Box::new(t)))
    }

    pub fn map(k: Type, v: Type) -> Self {
        Self::new(TypeNode::Map(Box::new(k), Box::new(v)))
    }

    pub fn big_map(k: Type, v: Type) -> Self {
        Self::new(TypeNode::BigMap(Box::new(k), Box::new(v)))
    }

    pub fn iterable_big_map(k: Type, v: Type) -> Self {
        Self::new(TypeNode::IterableBigMap(Box::new(k), Box::new(v)))
    }

    /// Map constructor dispatching on the physical flavour.
    pub fn map_of_kind(mk: MapKind, k: Type, v: Type) -> Self {
        match mk {
            MapKind::Map => Self::map(k, v),
            MapKind::BigMap => Self::big_map(k, v),
            MapKind::IterableBigMap => Self::iterable_big_map(k, v),
        }
    }

    pub fn or(l: Type, r: Type) -> Self {
        Self::new(TypeNode::Or(Box::new(l), Box::new(r)))
    }

    pub fn contract(t: Type) -> Self {
        Self::new(TypeNode::Contract(Box::new(t)))
    }

    pub fn lambda(arg: Type, ret: Type) -> Self {
        Self::new(TypeNode::Lambda(Box::new(arg), Box::new(ret)))
    }

    pub fn tuple(ts: Vec<Type>) -> Self {
        Self::new(TypeNode::Tuple(ts))
    }

    pub fn asset(name: impl Into<Ident>) -> Self {
        Self::new(TypeNode::Asset(name.into()))
    }

    pub fn enum_(name: impl Into<Ident>) -> Self {
        Self::new(TypeNode::Enum(name.into()))
    }

    pub fn record(name: impl Into<Ident>) -> Self {
        Self::new(TypeNode::Record(name.into()))
    }

    pub fn container(asset: Type, intent: ContainerIntent) -> Self {
        Self::new(TypeNode::Container(Box::new(asset), intent))
    }

    /// Name of the asset this type refers to, if any (through containers).
    pub fn asset_name(&self) -> Option<&Ident> {
        match &self.node {
            TypeNode::Asset(name) => Some(name),
            TypeNode::Container(inner, _) => inner.asset_name(),
            _ => None,
        }
    }

    pub fn is_asset(&self) -> bool {
        matches!(self.node, TypeNode::Asset(_))
    }

    pub fn is_container(&self) -> bool {
        matches!(self.node, TypeNode::Container(..))
    }

    /// Intent tag of a container type.
    pub fn container_intent(&self) -> Option<ContainerIntent> {
        match &self.node {
            TypeNode::Container(_, intent) => Some(*intent),
            _ => None,
        }
    }

    pub fn is_option(&self) -> bool {
        matches!(self.node, TypeNode::Option(_))
    }

    /// Element type of an option.
    pub fn as_option(&self) -> Option<&Type> {
        match &self.node {
            TypeNode::Option(t) => Some(t),
            _ => None,
        }
    }

    /// Key/value types of any map flavour.
    pub fn as_map(&self) -> Option<(MapKind, &Type, &Type)> {
        match &self.node {
            TypeNode::Map(k, v) => Some((MapKind::Map, k, v)),
            TypeNode::BigMap(k, v) => Some((MapKind::BigMap, k, v)),
            TypeNode::IterableBigMap(k, v) => Some((MapKind::IterableBigMap, k, v)),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Type> {
        match &self.node {
            TypeNode::List(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Type> {
        match &self.node {
            TypeNode::Set(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Type]> {
        match &self.node {
            TypeNode::Tuple(ts) => Some(ts),
            _ => None,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use TypeNode::*;
        match &self.node {
            Unit => write!(f, "unit"),
            Bool => write!(f, "bool"),
            Int => write!(f, "int"),
            Nat => write!(f, "nat"),
            Rational => write!(f, "rational"),
            String => write!(f, "string"),
            Bytes => write!(f, "bytes"),
            Address => write!(f, "address"),
            TxRollupL2Address => write!(f, "tx_rollup_l2_address"),
            Date => write!(f, "date"),
            Duration => write!(f, "duration"),
            Timestamp => write!(f, "timestamp"),
            Currency => write!(f, "tez"),
            Key => write!(f, "key"),
            KeyHash => write!(f, "key_hash"),
            Signature => write!(f, "signature"),
            ChainId => write!(f, "chain_id"),
            Bls12381Fr => write!(f, "bls12_381_fr"),
            Bls12381G1 => write!(f, "bls12_381_g1"),
            Bls12381G2 => write!(f, "bls12_381_g2"),
            Never => write!(f, "never"),
            Chest => write!(f, "chest"),
            ChestKey => write!(f, "chest_key"),
            Option(t) => write!(f, "option<{t}>"),
            List(t) => write!(f, "list<{t}>"),
            Set(t) => write!(f, "set<{t}>"),
            Map(k, v) => write!(f, "map<{k}, {v}>"),
            BigMap(k, v) => write!(f, "big_map<{k}, {v}>"),
            IterableBigMap(k, v) => write!(f, "iterable_big_map<{k}, {v}>"),
            Or(l, r) => write!(f, "or<{l}, {r}>"),
            Contract(t) => write!(f, "contract<{t}>"),
            Ticket(t) => write!(f, "ticket<{t}>"),
            SaplingState(n) => write!(f, "sapling_state({n})"),
            SaplingTransaction(n) => write!(f, "sapling_transaction({n})"),
            Lambda(a, r) => write!(f, "lambda<{a}, {r}>"),
            Tuple(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " * ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Container(t, intent) => write!(f, "{intent:?}<{t}>"),
            Asset(n) => write!(f, "asset<{n}>"),
            Enum(n) => write!(f, "enum<{n}>"),
            Record(n) => write!(f, "record<{n}>"),
            Event(n) => write!(f, "event<{n}>"),
            State => write!(f, "state"),
            Storage => write!(f, "storage"),
            Operation => write!(f, "operation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_name_through_container() {
        let t = Type::container(Type::asset("mile"), ContainerIntent::Partition);
        assert_eq!(t.asset_name().map(|s| s.as_str()), Some("mile"));
        assert_eq!(t.container_intent(), Some(ContainerIntent::Partition));
    }

    #[test]
    fn test_map_of_kind_dispatch() {
        let t = Type::map_of_kind(MapKind::BigMap, Type::address(), Type::nat());
        match t.as_map() {
            Some((MapKind::BigMap, k, v)) => {
                assert_eq!(k, &Type::address());
                assert_eq!(v, &Type::nat());
            }
            other => panic!("expected big_map, got {other:?}"),
        }
    }

    #[test]
    fn test_display_nested() {
        let t = Type::big_map(
            Type::tuple(vec![Type::address(), Type::address()]),
            Type::nat(),
        );
        assert_eq!(t.to_string(), "big_map<(address * address), nat>");
    }

    #[test]
    fn test_annotation_round_trip() {
        let t = Type::int().with_annotation("%amount");
        assert_eq!(t.annotation.as_deref(), Some("%amount"));
        assert!(t.without_annotation().annotation.is_none());
    }
}
