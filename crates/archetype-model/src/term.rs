//! Typed terms of the model.
//!
//! [`Mterm`] is the tree every pass rewrites: a node tag ([`MtermNode`]),
//! the term's type and a source span. The node sum covers the whole
//! surface the type checker can emit — high-level asset methods, enum
//! matches, rational arithmetic — as well as the primitive forms the
//! lowering passes rewrite them into.
//!
//! # Equality and ordering
//!
//! Structural equality, ordering and hashing ignore spans: two terms that
//! print the same compare equal even when they originate from different
//! source locations. `MtermNode` derives its implementations and recurses
//! through the manual impls on `Mterm`.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::foundation::Span;
use crate::types::{MapKind, Type};
use crate::Ident;

/// Assignment operators, for both variables and asset-field updates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AssignOp {
    /// `:=`
    Assign,
    /// `+=`
    Plus,
    /// `-=`
    Minus,
    /// `*=`
    Mult,
    /// `/=`
    Div,
    /// `&=`
    And,
    /// `|=`
    Or,
}

/// Currency literal unit as written in source; values normalise to utz.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum CurrencyUnit {
    Tz,
    Mtz,
    Utz,
}

/// What a variable reference resolves to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum VarKind {
    /// Let-bound or loop-bound local
    Local,
    /// Function argument
    Param,
    /// Storage variable
    StoreVar,
    /// Storage asset collection
    StoreCol,
    /// Contract state pseudo-variable
    State,
    /// Contract parameter
    Parameter,
    /// Specification definition
    Definition,
}

/// Collection operand of an asset operation.
///
/// `Coll` is the stored collection itself, `View` an ordered key list
/// derived from it, `Field` the container field of one parent record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    Coll,
    View(Box<Mterm>),
    Field(Ident, Ident, Box<Mterm>),
}

/// Iteration source of a `for` loop.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IterKind {
    /// Whole asset collection
    Coll(Ident),
    /// Asset view
    View(Ident, Box<Mterm>),
    /// Container field `(asset, field, parent key)`
    Field(Ident, Ident, Box<Mterm>),
    /// Primitive set
    Set(Box<Mterm>),
    /// Primitive list
    List(Box<Mterm>),
    /// Primitive map of any flavour
    Map(MapKind, Box<Mterm>),
}

/// Loop binder: one identifier for sets/lists, a pair for maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ForIdent {
    Single(Ident),
    Pair(Ident, Ident),
}

/// Left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssignKind {
    /// Local, argument or storage variable
    Var(Ident, VarKind),
    /// `A[k].f`
    AssetField {
        asset: Ident,
        field: Ident,
        key: Box<Mterm>,
    },
    /// `r.f` where `r` is a record lvalue
    Record {
        lvalue: Box<Mterm>,
        record: Ident,
        field: Ident,
    },
    /// Tuple slot `x[i]` of a tuple of `arity` slots
    Tuple {
        lvalue: Box<Mterm>,
        index: u32,
        arity: u32,
    },
    /// Contract state
    State,
    /// Asset state `A[k].state`
    AssetState { asset: Ident, key: Box<Mterm> },
    /// Pending operations list
    Operations,
}

/// Failure payloads of `fail` instructions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailType {
    Invalid(Box<Mterm>),
    InvalidCondition(Option<Ident>, Option<Box<Mterm>>),
    NotFound,
    AssetNotFound(Ident),
    KeyExists(Ident),
    KeyExistsOrNotFound(Ident),
    DivByZero,
    NatNegAssign,
    NoTransfer,
    InvalidState,
}

/// Operation-producing transfer flavours.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    /// `transfer v to dest`
    Simple { value: Box<Mterm>, dest: Box<Mterm> },
    /// `transfer v to dest call entry<T>(arg)`
    Call {
        value: Box<Mterm>,
        dest: Box<Mterm>,
        entry_id: Ident,
        arg_type: Type,
        arg: Box<Mterm>,
    },
    /// `transfer v to entry e(arg)` where `e` is a contract<T> value
    Entry {
        value: Box<Mterm>,
        entry: Box<Mterm>,
        arg: Box<Mterm>,
    },
    /// `transfer v to entry self.e(args)`
    Self_ {
        value: Box<Mterm>,
        entry_id: Ident,
        args: Vec<Mterm>,
    },
    /// An already-built operation value
    Operation(Box<Mterm>),
}

/// Sort direction of one `sort` criterion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Rational comparison primitives.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RatCmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// Rational arithmetic primitives.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RatArithOp {
    Plus,
    Minus,
    Mult,
    Div,
}

/// Match pattern: a wildcard or an enum constructor with bound arguments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pattern {
    pub node: PatternNode,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PatternNode {
    Wild,
    Const(Ident, Vec<Ident>),
}

/// One field update of an `update`-family instruction.
pub type FieldUpdate = (Ident, AssignOp, Mterm);

/// Term node sum.
///
/// Grouped the way the surface groups them; lowering passes eliminate the
/// high-level groups top to bottom.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MtermNode {
    // === Bindings ===
    Letin {
        ids: Vec<Ident>,
        value: Box<Mterm>,
        body: Box<Mterm>,
    },
    Declvar {
        ids: Vec<Ident>,
        typ: Option<Type>,
        value: Box<Mterm>,
        constant: bool,
    },
    Declvaropt {
        ids: Vec<Ident>,
        typ: Option<Type>,
        value: Box<Mterm>,
        fail: Option<Box<Mterm>>,
        constant: bool,
    },
    App {
        id: Ident,
        args: Vec<Mterm>,
    },
    Lambda {
        arg_id: Ident,
        arg_type: Type,
        ret_type: Type,
        body: Box<Mterm>,
    },

    // === Assignments ===
    Assign {
        op: AssignOp,
        typ: Type,
        kind: AssignKind,
        value: Box<Mterm>,
    },
    Assignopt {
        kind: AssignKind,
        typ: Type,
        value: Box<Mterm>,
        fail: Box<Mterm>,
    },

    // === Control flow ===
    If {
        cond: Box<Mterm>,
        then: Box<Mterm>,
        els: Option<Box<Mterm>>,
    },
    Matchwith {
        expr: Box<Mterm>,
        branches: Vec<(Pattern, Mterm)>,
    },
    Matchoption {
        x: Box<Mterm>,
        some_id: Ident,
        some: Box<Mterm>,
        none: Box<Mterm>,
    },
    Matchor {
        x: Box<Mterm>,
        left_id: Ident,
        left: Box<Mterm>,
        right_id: Ident,
        right: Box<Mterm>,
    },
    Matchlist {
        x: Box<Mterm>,
        head_id: Ident,
        tail_id: Ident,
        cons: Box<Mterm>,
        nil: Box<Mterm>,
    },
    For {
        ids: ForIdent,
        coll: IterKind,
        body: Box<Mterm>,
        label: Option<Ident>,
    },
    Iter {
        id: Ident,
        from: Box<Mterm>,
        to: Box<Mterm>,
        body: Box<Mterm>,
        label: Option<Ident>,
        nat: bool,
    },
    While {
        cond: Box<Mterm>,
        body: Box<Mterm>,
        label: Option<Ident>,
    },
    Seq(Vec<Mterm>),
    Return(Box<Mterm>),
    Label(Ident),
    Mark(Ident, Box<Mterm>),

    // === Effects ===
    Fail(FailType),
    Failsome(Box<Mterm>),
    Transfer(TransferKind),
    Emit {
        event: Ident,
        value: Box<Mterm>,
    },
    Makeoperation {
        value: Box<Mterm>,
        entry: Box<Mterm>,
        arg: Box<Mterm>,
    },

    // === Entry-point interop ===
    Entrypoint {
        arg_type: Type,
        id: Ident,
        addr: Box<Mterm>,
        err: Option<Box<Mterm>>,
    },
    Callview {
        ret_type: Type,
        addr: Box<Mterm>,
        view: Ident,
        arg: Box<Mterm>,
    },

    // === Literals ===
    Unit,
    Bool(bool),
    Int(BigInt),
    Nat(BigInt),
    Rational(BigInt, BigInt),
    String(String),
    Currency(BigInt, CurrencyUnit),
    Address(String),
    Date(i64),
    Duration(i64),
    Timestamp(i64),
    Bytes(String),
    None_,
    Some_(Box<Mterm>),
    Tuple(Vec<Mterm>),
    Asset(Vec<Mterm>),
    Assets(Vec<Mterm>),
    Litset(Vec<Mterm>),
    Litlist(Vec<Mterm>),
    Litmap(MapKind, Vec<(Mterm, Mterm)>),
    Litrecord(Vec<(Ident, Mterm)>),
    Litevent(Vec<(Ident, Mterm)>),
    Enumval {
        id: Ident,
        args: Vec<Mterm>,
        enum_: Ident,
    },

    // === Access ===
    Var {
        id: Ident,
        kind: VarKind,
    },
    Assetstate {
        asset: Ident,
        key: Box<Mterm>,
    },
    Dot {
        expr: Box<Mterm>,
        field: Ident,
    },
    Dotassetfield {
        asset: Ident,
        key: Box<Mterm>,
        field: Ident,
    },
    Questionoption {
        x: Box<Mterm>,
        field: Ident,
    },
    Tupleaccess {
        x: Box<Mterm>,
        index: u32,
    },
    Recupdate {
        x: Box<Mterm>,
        fields: Vec<(Ident, Mterm)>,
    },
    Makeasset {
        asset: Ident,
        key: Box<Mterm>,
        value: Box<Mterm>,
    },
    Tocontainer(Ident),

    // === Comparison ===
    Equal(Type, Box<Mterm>, Box<Mterm>),
    Nequal(Type, Box<Mterm>, Box<Mterm>),
    Gt(Box<Mterm>, Box<Mterm>),
    Ge(Box<Mterm>, Box<Mterm>),
    Lt(Box<Mterm>, Box<Mterm>),
    Le(Box<Mterm>, Box<Mterm>),
    ThreeWayCmp(Box<Mterm>, Box<Mterm>),

    // === Booleans ===
    And(Box<Mterm>, Box<Mterm>),
    Or(Box<Mterm>, Box<Mterm>),
    Xor(Box<Mterm>, Box<Mterm>),
    Not(Box<Mterm>),

    // === Arithmetic ===
    Plus(Box<Mterm>, Box<Mterm>),
    Minus(Box<Mterm>, Box<Mterm>),
    Mult(Box<Mterm>, Box<Mterm>),
    DivEuc(Box<Mterm>, Box<Mterm>),
    Modulo(Box<Mterm>, Box<Mterm>),
    DivMod(Box<Mterm>, Box<Mterm>),
    Uminus(Box<Mterm>),
    ShiftLeft(Box<Mterm>, Box<Mterm>),
    ShiftRight(Box<Mterm>, Box<Mterm>),
    Ternarybool {
        cond: Box<Mterm>,
        then: Box<Mterm>,
        els: Box<Mterm>,
    },
    Ternaryoption {
        opt: Box<Mterm>,
        some: Box<Mterm>,
        none: Box<Mterm>,
    },

    // === Asset API: effects ===
    Addasset {
        asset: Ident,
        inst: Box<Mterm>,
    },
    Putsingleasset {
        asset: Ident,
        inst: Box<Mterm>,
    },
    Putremove {
        asset: Ident,
        key: Box<Mterm>,
        value: Box<Mterm>,
    },
    Addfield {
        asset: Ident,
        field: Ident,
        key: Box<Mterm>,
        value: Box<Mterm>,
    },
    Removeasset {
        asset: Ident,
        key: Box<Mterm>,
    },
    Removefield {
        asset: Ident,
        field: Ident,
        key: Box<Mterm>,
        value: Box<Mterm>,
    },
    Removeall {
        asset: Ident,
        container: CollectionKind,
    },
    Removeif {
        asset: Ident,
        container: CollectionKind,
        args: Vec<(Ident, Type)>,
        body: Box<Mterm>,
    },
    Clear {
        asset: Ident,
        container: CollectionKind,
    },
    Update {
        asset: Ident,
        key: Box<Mterm>,
        updates: Vec<FieldUpdate>,
    },
    Updateall {
        asset: Ident,
        container: CollectionKind,
        updates: Vec<FieldUpdate>,
    },
    Addupdate {
        asset: Ident,
        container: CollectionKind,
        key: Box<Mterm>,
        updates: Vec<FieldUpdate>,
    },
    /// `let a = get(A, k) in …; set(A, k, a)` target form of `update`
    Set {
        asset: Ident,
        key: Box<Mterm>,
        value: Box<Mterm>,
    },

    // === Asset API: expressions ===
    Get {
        asset: Ident,
        container: CollectionKind,
        key: Box<Mterm>,
    },
    Getsome {
        asset: Ident,
        container: CollectionKind,
        key: Box<Mterm>,
    },
    Select {
        asset: Ident,
        container: CollectionKind,
        args: Vec<(Ident, Type)>,
        body: Box<Mterm>,
    },
    Sort {
        asset: Ident,
        container: CollectionKind,
        criteria: Vec<(Ident, SortDirection)>,
    },
    Contains {
        asset: Ident,
        container: CollectionKind,
        key: Box<Mterm>,
    },
    Nth {
        asset: Ident,
        container: CollectionKind,
        index: Box<Mterm>,
    },
    Count {
        asset: Ident,
        container: CollectionKind,
    },
    Sum {
        asset: Ident,
        container: CollectionKind,
        body: Box<Mterm>,
    },
    Head {
        asset: Ident,
        container: CollectionKind,
        count: Box<Mterm>,
    },
    Tail {
        asset: Ident,
        container: CollectionKind,
        count: Box<Mterm>,
    },

    // === Primitive sets ===
    Setadd(Type, Box<Mterm>, Box<Mterm>),
    Setremove(Type, Box<Mterm>, Box<Mterm>),
    Setcontains(Type, Box<Mterm>, Box<Mterm>),
    Setlength(Type, Box<Mterm>),
    Setfold {
        elem_type: Type,
        elem_id: Ident,
        acc_id: Ident,
        coll: Box<Mterm>,
        init: Box<Mterm>,
        body: Box<Mterm>,
    },
    Setinstradd(Type, AssignKind, Box<Mterm>),
    Setinstrremove(Type, AssignKind, Box<Mterm>),

    // === Primitive lists ===
    Listprepend(Type, Box<Mterm>, Box<Mterm>),
    Listlength(Type, Box<Mterm>),
    Listcontains(Type, Box<Mterm>, Box<Mterm>),
    Listnth(Type, Box<Mterm>, Box<Mterm>),
    Listreverse(Type, Box<Mterm>),
    Listconcat(Type, Box<Mterm>, Box<Mterm>),
    Listfold {
        elem_type: Type,
        elem_id: Ident,
        acc_id: Ident,
        coll: Box<Mterm>,
        init: Box<Mterm>,
        body: Box<Mterm>,
    },
    Listinstrprepend(Type, AssignKind, Box<Mterm>),
    Listinstrconcat(Type, AssignKind, Box<Mterm>),

    // === Primitive maps (all flavours) ===
    Mapput {
        mk: MapKind,
        key_type: Type,
        value_type: Type,
        map: Box<Mterm>,
        key: Box<Mterm>,
        value: Box<Mterm>,
    },
    Mapremove {
        mk: MapKind,
        key_type: Type,
        value_type: Type,
        map: Box<Mterm>,
        key: Box<Mterm>,
    },
    Mapupdate {
        mk: MapKind,
        key_type: Type,
        value_type: Type,
        map: Box<Mterm>,
        key: Box<Mterm>,
        value: Box<Mterm>,
    },
    Mapget {
        mk: MapKind,
        key_type: Type,
        value_type: Type,
        map: Box<Mterm>,
        key: Box<Mterm>,
        asset: Option<Ident>,
    },
    Mapgetopt {
        mk: MapKind,
        key_type: Type,
        value_type: Type,
        map: Box<Mterm>,
        key: Box<Mterm>,
    },
    Mapcontains {
        mk: MapKind,
        key_type: Type,
        value_type: Type,
        map: Box<Mterm>,
        key: Box<Mterm>,
    },
    Maplength {
        mk: MapKind,
        key_type: Type,
        value_type: Type,
        map: Box<Mterm>,
    },
    Mapfold {
        mk: MapKind,
        key_type: Type,
        key_id: Ident,
        value_id: Ident,
        acc_id: Ident,
        map: Box<Mterm>,
        init: Box<Mterm>,
        body: Box<Mterm>,
    },
    Mapinstrput {
        mk: MapKind,
        key_type: Type,
        value_type: Type,
        lvalue: AssignKind,
        key: Box<Mterm>,
        value: Box<Mterm>,
    },
    Mapinstrremove {
        mk: MapKind,
        key_type: Type,
        value_type: Type,
        lvalue: AssignKind,
        key: Box<Mterm>,
    },
    Mapinstrupdate {
        mk: MapKind,
        key_type: Type,
        value_type: Type,
        lvalue: AssignKind,
        key: Box<Mterm>,
        value: Box<Mterm>,
    },

    // === Builtins ===
    Min(Box<Mterm>, Box<Mterm>),
    Max(Box<Mterm>, Box<Mterm>),
    Abs(Box<Mterm>),
    Concat(Box<Mterm>, Box<Mterm>),
    Concatlist(Box<Mterm>),
    Slice(Box<Mterm>, Box<Mterm>, Box<Mterm>),
    Length(Box<Mterm>),
    Issome(Box<Mterm>),
    Isnone(Box<Mterm>),
    Optget(Box<Mterm>),
    IntToNat(Box<Mterm>),
    Floor(Box<Mterm>),
    Ceil(Box<Mterm>),
    NatToString(Box<Mterm>),
    Pack(Box<Mterm>),
    Unpack(Type, Box<Mterm>),
    Setdelegate(Box<Mterm>),
    Execlambda(Box<Mterm>, Box<Mterm>),
    Applylambda(Box<Mterm>, Box<Mterm>),

    // === Crypto ===
    Blake2b(Box<Mterm>),
    Sha256(Box<Mterm>),
    Sha512(Box<Mterm>),
    Sha3(Box<Mterm>),
    Keccak(Box<Mterm>),
    KeyToKeyHash(Box<Mterm>),
    CheckSignature {
        key: Box<Mterm>,
        signature: Box<Mterm>,
        data: Box<Mterm>,
    },

    // === Voting ===
    TotalVotingPower,
    VotingPower(Box<Mterm>),

    // === Tickets ===
    CreateTicket {
        value: Box<Mterm>,
        amount: Box<Mterm>,
    },
    ReadTicket(Box<Mterm>),
    SplitTicket {
        ticket: Box<Mterm>,
        amounts: Box<Mterm>,
    },
    JoinTickets(Box<Mterm>),

    // === Sapling ===
    SaplingEmptyState(u32),
    SaplingVerifyUpdate {
        state: Box<Mterm>,
        tx: Box<Mterm>,
    },

    // === BLS ===
    /// `pairing_check` over a `list<(bls12_381_g1, bls12_381_g2)>`
    PairingCheck(Box<Mterm>),

    // === Timelock ===
    OpenChest {
        chest_key: Box<Mterm>,
        chest: Box<Mterm>,
        time: Box<Mterm>,
    },

    // === Context constants ===
    Now,
    Transferred,
    Caller,
    Balance,
    Source,
    SelfAddress,
    SelfChainId,
    Metadata,
    Level,
    MinBlockTime,
    Operations,

    // === Rationals ===
    Rateq(Box<Mterm>, Box<Mterm>),
    Ratcmp(RatCmpOp, Box<Mterm>, Box<Mterm>),
    Ratarith(RatArithOp, Box<Mterm>, Box<Mterm>),
    Ratuminus(Box<Mterm>),
    Rattez(Box<Mterm>, Box<Mterm>),
    Ratdur(Box<Mterm>, Box<Mterm>),
    NatToInt(Box<Mterm>),
    NatToRat(Box<Mterm>),
    IntToRat(Box<Mterm>),
    IntToDate(Box<Mterm>),
    MutezToNat(Box<Mterm>),

    // === Utilities ===
    Cast(Type, Type, Box<Mterm>),
    /// Left injection into `or<L, R>`; carries the right side's type
    Left(Type, Box<Mterm>),
    /// Right injection into `or<L, R>`; carries the left side's type
    Right(Type, Box<Mterm>),

    // === Formulas ===
    Forall {
        id: Ident,
        typ: Type,
        coll: Option<Box<Mterm>>,
        body: Box<Mterm>,
    },
    Exists {
        id: Ident,
        typ: Type,
        coll: Option<Box<Mterm>>,
        body: Box<Mterm>,
    },
    Imply(Box<Mterm>, Box<Mterm>),
    Equiv(Box<Mterm>, Box<Mterm>),
    Setiterated(CollectionKind),
    Settoiterate(CollectionKind),
    Empty(Type),
    Singleton(Type, Box<Mterm>),
    SubsetOf(Type, Box<Mterm>, Box<Mterm>),
    IsEmpty(Type, Box<Mterm>),
    Union(Type, Box<Mterm>, Box<Mterm>),
    Inter(Type, Box<Mterm>, Box<Mterm>),
    Diff(Type, Box<Mterm>, Box<Mterm>),
}

/// A typed term with its source location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mterm {
    pub node: MtermNode,
    pub ty: Type,
    pub span: Span,
}

impl Mterm {
    pub fn new(node: MtermNode, ty: Type, span: Span) -> Self {
        Self { node, ty, span }
    }

    /// Rebuild this term with another node, keeping type and span.
    pub fn with_node(&self, node: MtermNode) -> Self {
        Self {
            node,
            ty: self.ty.clone(),
            span: self.span,
        }
    }

    /// Rebuild this term with another type, keeping node and span.
    pub fn retyped(mut self, ty: Type) -> Self {
        self.ty = ty;
        self
    }

    /// The empty instruction.
    pub fn skip(span: Span) -> Self {
        Self::new(MtermNode::Seq(Vec::new()), Type::unit(), span)
    }

    pub fn unit(span: Span) -> Self {
        Self::new(MtermNode::Unit, Type::unit(), span)
    }

    pub fn bool_(v: bool, span: Span) -> Self {
        Self::new(MtermNode::Bool(v), Type::bool(), span)
    }

    pub fn int(v: impl Into<BigInt>, span: Span) -> Self {
        Self::new(MtermNode::Int(v.into()), Type::int(), span)
    }

    pub fn nat(v: impl Into<BigInt>, span: Span) -> Self {
        Self::new(MtermNode::Nat(v.into()), Type::nat(), span)
    }

    pub fn string(v: impl Into<String>, span: Span) -> Self {
        Self::new(MtermNode::String(v.into()), Type::string(), span)
    }

    pub fn none(ty: Type, span: Span) -> Self {
        Self::new(MtermNode::None_, Type::option(ty), span)
    }

    pub fn some(x: Mterm) -> Self {
        let ty = Type::option(x.ty.clone());
        let span = x.span;
        Self::new(MtermNode::Some_(Box::new(x)), ty, span)
    }

    /// A local variable reference.
    pub fn var(id: impl Into<Ident>, ty: Type, span: Span) -> Self {
        Self::new(
            MtermNode::Var {
                id: id.into(),
                kind: VarKind::Local,
            },
            ty,
            span,
        )
    }

    /// A storage variable reference.
    pub fn storage_var(id: impl Into<Ident>, ty: Type, span: Span) -> Self {
        Self::new(
            MtermNode::Var {
                id: id.into(),
                kind: VarKind::StoreVar,
            },
            ty,
            span,
        )
    }

    /// Collapse a list of instructions into one, without nesting sequences.
    pub fn seq(mut instrs: Vec<Mterm>, span: Span) -> Self {
        match instrs.len() {
            1 => instrs.pop().unwrap(),
            _ => Self::new(MtermNode::Seq(instrs), Type::unit(), span),
        }
    }

    /// `if cond then then_ else els`
    pub fn if_(cond: Mterm, then: Mterm, els: Option<Mterm>, span: Span) -> Self {
        let ty = then.ty.clone();
        Self::new(
            MtermNode::If {
                cond: Box::new(cond),
                then: Box::new(then),
                els: els.map(Box::new),
            },
            ty,
            span,
        )
    }

    /// `let id = value in body`
    pub fn letin(id: impl Into<Ident>, value: Mterm, body: Mterm) -> Self {
        let ty = body.ty.clone();
        let span = value.span;
        Self::new(
            MtermNode::Letin {
                ids: vec![id.into()],
                value: Box::new(value),
                body: Box::new(body),
            },
            ty,
            span,
        )
    }

    pub fn fail(ft: FailType, span: Span) -> Self {
        Self::new(MtermNode::Fail(ft), Type::unit(), span)
    }

    /// True for node kinds that denote an instruction rather than a value.
    pub fn is_instruction(&self) -> bool {
        use MtermNode::*;
        matches!(
            self.node,
            Seq(_)
                | Assign { .. }
                | Assignopt { .. }
                | Declvar { .. }
                | Declvaropt { .. }
                | For { .. }
                | Iter { .. }
                | While { .. }
                | Return(_)
                | Label(_)
                | Mark(..)
                | Fail(_)
                | Failsome(_)
                | Transfer(_)
                | Emit { .. }
                | Addasset { .. }
                | Putsingleasset { .. }
                | Putremove { .. }
                | Addfield { .. }
                | Removeasset { .. }
                | Removefield { .. }
                | Removeall { .. }
                | Removeif { .. }
                | Clear { .. }
                | Update { .. }
                | Updateall { .. }
                | Addupdate { .. }
                | Set { .. }
                | Setinstradd(..)
                | Setinstrremove(..)
                | Listinstrprepend(..)
                | Listinstrconcat(..)
                | Mapinstrput { .. }
                | Mapinstrremove { .. }
                | Mapinstrupdate { .. }
        )
    }

    /// True for literal nodes (including literal aggregates of literals).
    pub fn is_literal(&self) -> bool {
        use MtermNode::*;
        match &self.node {
            Unit | Bool(_) | Int(_) | Nat(_) | Rational(..) | String(_) | Currency(..)
            | Address(_) | Date(_) | Duration(_) | Timestamp(_) | Bytes(_) | None_ => true,
            Some_(x) => x.is_literal(),
            Tuple(xs) | Asset(xs) | Assets(xs) | Litset(xs) | Litlist(xs) => {
                xs.iter().all(Mterm::is_literal)
            }
            Litmap(_, kvs) => kvs.iter().all(|(k, v)| k.is_literal() && v.is_literal()),
            Litrecord(fs) | Litevent(fs) => fs.iter().all(|(_, v)| v.is_literal()),
            Enumval { args, .. } => args.iter().all(Mterm::is_literal),
            _ => false,
        }
    }
}

impl PartialEq for Mterm {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.ty == other.ty
    }
}

impl Eq for Mterm {}

impl PartialOrd for Mterm {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Mterm {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.node
            .cmp(&other.node)
            .then_with(|| self.ty.cmp(&other.ty))
    }
}

impl std::hash::Hash for Mterm {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.node.hash(state);
        self.ty.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(n: u32) -> Span {
        Span::new(0, n, n + 1, 1)
    }

    #[test]
    fn test_equality_ignores_spans() {
        let a = Mterm::nat(42, sp(0));
        let b = Mterm::nat(42, sp(100));
        assert_eq!(a, b);

        let mut hasher_a = std::collections::hash_map::DefaultHasher::new();
        let mut hasher_b = std::collections::hash_map::DefaultHasher::new();
        use std::hash::{Hash, Hasher};
        a.hash(&mut hasher_a);
        b.hash(&mut hasher_b);
        assert_eq!(hasher_a.finish(), hasher_b.finish());
    }

    #[test]
    fn test_ordering_is_structural() {
        let one = Mterm::nat(1, sp(5));
        let two = Mterm::nat(2, sp(0));
        assert!(one < two);
    }

    #[test]
    fn test_seq_of_one_collapses() {
        let x = Mterm::bool_(true, sp(0));
        let s = Mterm::seq(vec![x.clone()], sp(0));
        assert_eq!(s, x);

        let s = Mterm::seq(vec![], sp(0));
        match s.node {
            MtermNode::Seq(ref instrs) => assert!(instrs.is_empty()),
            ref other => panic!("expected Seq, got {other:?}"),
        }
    }

    #[test]
    fn test_literal_detection() {
        let lit = Mterm::new(
            MtermNode::Tuple(vec![Mterm::int(1, sp(0)), Mterm::string("x", sp(1))]),
            Type::tuple(vec![Type::int(), Type::string()]),
            sp(0),
        );
        assert!(lit.is_literal());

        let not_lit = Mterm::new(MtermNode::Caller, Type::address(), sp(0));
        assert!(!not_lit.is_literal());
    }

    #[test]
    fn test_some_wraps_type() {
        let s = Mterm::some(Mterm::nat(7, sp(0)));
        assert_eq!(s.ty, Type::option(Type::nat()));
    }
}
