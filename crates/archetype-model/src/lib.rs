//! Typed intermediate representation for the Archetype compiler.
//!
//! This crate defines the model every middle-end pass consumes and produces:
//! a tree of typed terms hanging off declarations, storage items and
//! functions. The model is produced by the type checker and rewritten by
//! `archetype-transform` until only primitive collections, primitive
//! arithmetic and explicit control flow remain.
//!
//! # Pipeline Position
//!
//! ```text
//! Source → Lex → Parse → Type Check → **Model** → transform → back-ends
//! ```
//!
//! # Layout
//!
//! - [`foundation`] — compact source spans
//! - [`types`] — the semantic type system ([`types::Type`])
//! - [`term`] — typed terms ([`term::Mterm`])
//! - [`decl`] — variables, enums, assets, records, events
//! - [`function`] — entries, getters, views, local functions
//! - [`spec`] / [`security`] — specification and security surface
//! - [`model`] — the top-level [`model::Model`] record and symbol queries
//! - [`walk`] — generic traversal combinators over terms and models
//! - [`utils`] — literal evaluation and model projections

pub mod decl;
pub mod foundation;
pub mod function;
pub mod model;
pub mod security;
pub mod spec;
pub mod term;
pub mod types;
pub mod utils;
pub mod walk;

pub use foundation::Span;
pub use model::Model;
pub use term::{Mterm, MtermNode};
pub use types::{Type, TypeNode};

/// Identifier for every named entity of the model.
///
/// The type checker guarantees identifiers are non-empty and unique within
/// their namespace; the middle-end only ever compares and clones them.
pub type Ident = String;
