//! Specification surface: predicates, definitions, invariants,
//! postconditions, shadow variables and effects.
//!
//! The specification is carried alongside runtime code so the shadow
//! passes can materialise ghost storage and splice shadow effects; the
//! pure-code output path strips it with `prune_formula`.

use serde::{Deserialize, Serialize};

use crate::decl::VarDecl;
use crate::foundation::Span;
use crate::term::Mterm;
use crate::types::Type;
use crate::Ident;

/// A named formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledTerm {
    pub label: Ident,
    pub term: Mterm,
    pub loc: Span,
}

/// A verification predicate with typed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub name: Ident,
    pub args: Vec<(Ident, Type)>,
    pub body: Mterm,
    pub loc: Span,
}

/// A verification definition: `definition d { x : A | body }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub name: Ident,
    pub typ: Type,
    pub var: Ident,
    pub body: Mterm,
    pub loc: Span,
}

/// A shadow variable, materialised as ghost storage for verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecVariable {
    pub decl: VarDecl,
    pub constant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostconditionMode {
    Post,
    Assert,
}

/// One invariant block of a postcondition, keyed by the loop label it
/// attaches to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostconditionInvariant {
    pub label: Ident,
    pub formulas: Vec<Mterm>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Postcondition {
    pub name: Ident,
    pub mode: PostconditionMode,
    pub formula: Mterm,
    pub invariants: Vec<PostconditionInvariant>,
    pub uses: Vec<Ident>,
}

/// One declared failure case: `fails { f with (arg : T): formula }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecFail {
    pub label: Ident,
    pub fid: Option<Ident>,
    pub arg: Ident,
    pub atype: Type,
    pub formula: Mterm,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Specification {
    pub predicates: Vec<Predicate>,
    pub definitions: Vec<Definition>,
    pub lemmas: Vec<LabeledTerm>,
    pub theorems: Vec<LabeledTerm>,
    pub variables: Vec<SpecVariable>,
    pub invariants: Vec<LabeledTerm>,
    /// Shadow effects, spliced into the owning entry by
    /// `concat_shadow_effect_to_exec`
    pub effects: Vec<Mterm>,
    pub postconditions: Vec<Postcondition>,
    pub fails: Vec<SpecFail>,
}

impl Specification {
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
            && self.definitions.is_empty()
            && self.lemmas.is_empty()
            && self.theorems.is_empty()
            && self.variables.is_empty()
            && self.invariants.is_empty()
            && self.effects.is_empty()
            && self.postconditions.is_empty()
            && self.fails.is_empty()
    }
}
