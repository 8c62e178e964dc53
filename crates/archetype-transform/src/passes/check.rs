//! Validation passes.
//!
//! No rewriting happens here (except the caller substitution); each pass
//! records every violation it can find, and the driver stops with the
//! cluster's code if any error was recorded.

use std::collections::HashSet;

use archetype_model::decl::Decl;
use archetype_model::model::Model;
use archetype_model::term::{CollectionKind, Mterm, MtermNode};
use archetype_model::types::TypeNode;
use archetype_model::utils::extract_key_value_from_masset;
use archetype_model::walk::{fold_term_rec, map_term, visit_mterm_model};
use archetype_model::{Ident, Type};

use crate::error::{DiagnosticBag, ErrorKind};

/// `add`/`remove`/`clear` may not target a partition-owned asset
/// directly; children go through the owning field.
pub fn check_partition_access(model: &Model, bag: &mut DiagnosticBag) {
    visit_mterm_model(model, &mut |_ctx, top| {
        fold_term_rec(top, (), &mut |(), mt| match &mt.node {
            MtermNode::Addasset { asset, .. } | MtermNode::Removeasset { asset, .. } => {
                if let Some((_, field)) = model.is_partition_target(asset) {
                    bag.error(
                        mt.span,
                        ErrorKind::AssetPartitionnedby(asset.clone(), field),
                    );
                }
            }
            MtermNode::Clear {
                asset,
                container: CollectionKind::Coll,
            } => {
                if model.is_partition_target(asset).is_some() {
                    bag.error(mt.span, ErrorKind::NoClearForPartitionAsset(asset.clone()));
                }
            }
            _ => {}
        });
    });
}

/// A container field may only reference an asset that itself has no
/// container fields.
pub fn check_containers_asset(model: &Model, bag: &mut DiagnosticBag) {
    for decl in &model.decls {
        let Decl::Asset(asset) = decl else { continue };
        for field in &asset.fields {
            let TypeNode::Container(inner, _) = &field.typ.node else {
                continue;
            };
            let Some(child) = inner.asset_name() else {
                continue;
            };
            let child_decl = model.get_asset(child);
            if child_decl
                .fields
                .iter()
                .any(|f| matches!(f.typ.node, TypeNode::Container(..)))
            {
                bag.error(
                    field.loc,
                    ErrorKind::ContainersInAssetContainers(
                        asset.name.clone(),
                        field.name.clone(),
                        child.clone(),
                    ),
                );
            }
        }
    }
}

fn is_empty_container_literal(mt: &Mterm) -> bool {
    match &mt.node {
        MtermNode::Litset(xs) | MtermNode::Litlist(xs) | MtermNode::Assets(xs) => xs.is_empty(),
        MtermNode::Litmap(_, kvs) => kvs.is_empty(),
        _ => false,
    }
}

/// A container field's default, when present, must be an empty literal.
pub fn check_empty_container_on_asset_default_value(model: &Model, bag: &mut DiagnosticBag) {
    for decl in &model.decls {
        let Decl::Asset(asset) = decl else { continue };
        for field in &asset.fields {
            let container = matches!(
                field.typ.node,
                TypeNode::Container(..)
                    | TypeNode::Set(_)
                    | TypeNode::List(_)
                    | TypeNode::Map(..)
                    | TypeNode::BigMap(..)
                    | TypeNode::IterableBigMap(..)
            );
            if !container {
                continue;
            }
            if let Some(default) = &field.default {
                if !is_empty_container_literal(default) {
                    bag.error(
                        default.span,
                        ErrorKind::NoEmptyContainerForDefaultValue(
                            asset.name.clone(),
                            field.name.clone(),
                        ),
                    );
                }
            }
        }
    }
}

/// Key fields carry no default; `sort` may not name a key of a
/// multi-key asset.
pub fn check_asset_key(model: &Model, bag: &mut DiagnosticBag) {
    for decl in &model.decls {
        let Decl::Asset(asset) = decl else { continue };
        for key in &asset.keys {
            if let Some(field) = asset.field(key) {
                if field.default.is_some() {
                    bag.error(field.loc, ErrorKind::DefaultValueOnKeyAsset(asset.name.clone()));
                }
            }
        }
        if asset.keys.len() > 1 {
            for sort_field in &asset.sort {
                if asset.is_key(sort_field) {
                    bag.error(
                        asset.loc,
                        ErrorKind::NoSortOnKeyWithMultiKey(sort_field.clone()),
                    );
                }
            }
        }
    }
}

fn uses_runtime_constant(mt: &Mterm) -> Option<archetype_model::Span> {
    fold_term_rec(mt, None, &mut |found, t| {
        found.or(match &t.node {
            MtermNode::Now
            | MtermNode::Balance
            | MtermNode::Level
            | MtermNode::Source
            | MtermNode::Transferred
            | MtermNode::SelfAddress
            | MtermNode::SelfChainId
            | MtermNode::MinBlockTime
            | MtermNode::TotalVotingPower
            | MtermNode::Pack(_)
            | MtermNode::Unpack(..) => Some(t.span),
            _ => None,
        })
    })
}

/// Defaults and initial values may not read the runtime context.
///
/// `caller` is handled separately by [`check_and_replace_init_caller`].
pub fn check_invalid_init_value(model: &Model, bag: &mut DiagnosticBag) {
    let mut check = |mt: &Mterm, bag: &mut DiagnosticBag| {
        if let Some(span) = uses_runtime_constant(mt) {
            bag.error(span, ErrorKind::InvalidInitValue);
        }
    };

    for decl in &model.decls {
        match decl {
            Decl::Var(v) => {
                if let Some(d) = &v.default {
                    check(d, bag);
                }
            }
            Decl::Asset(a) => {
                for field in &a.fields {
                    if let Some(d) = &field.default {
                        check(d, bag);
                    }
                }
                for init in &a.init {
                    check(init, bag);
                }
            }
            _ => {}
        }
    }
    for param in &model.parameters {
        if let Some(d) = &param.default {
            check(d, bag);
        }
    }
    for item in &model.storage {
        check(&item.default, bag);
    }
}

/// An asset owned by a partition cannot be initialized directly.
pub fn check_init_partition_in_asset(model: &Model, bag: &mut DiagnosticBag) {
    for decl in &model.decls {
        let Decl::Asset(asset) = decl else { continue };
        if !asset.init.is_empty() && model.is_partition_target(&asset.name).is_some() {
            bag.error(asset.loc, ErrorKind::NoInitForPartitionAsset(asset.name.clone()));
        }
    }
}

/// Initial values are literals, and no primary key appears twice.
pub fn check_duplicated_keys_in_asset(model: &Model, bag: &mut DiagnosticBag) {
    for decl in &model.decls {
        let Decl::Asset(asset) = decl else { continue };
        let mut seen: HashSet<Mterm> = HashSet::new();
        for init in &asset.init {
            if !matches!(init.node, MtermNode::Asset(_)) || !init.is_literal() {
                bag.error(init.span, ErrorKind::OnlyLiteralInAssetInit);
                continue;
            }
            let key = extract_key_value_from_masset(model, &asset.name, init);
            if !seen.insert(key) {
                bag.error(init.span, ErrorKind::DuplicatedKeyAsset(asset.name.clone()));
            }
        }
    }
}

/// Replace `caller` in defaults by the supplied address, or reject.
pub fn check_and_replace_init_caller(
    model: Model,
    caller: Option<&str>,
    bag: &mut DiagnosticBag,
) -> Model {
    // Function bodies may read `caller` freely; only defaults and initial
    // values are in scope here, so the walk is done position by position
    // rather than through the generic model walker.
    fn subst(mt: &Mterm, caller: Option<&str>, bag: &mut DiagnosticBag) -> Mterm {
        match (&mt.node, caller) {
            (MtermNode::Caller, Some(addr)) => {
                mt.with_node(MtermNode::Address(addr.to_string()))
            }
            (MtermNode::Caller, None) => {
                bag.error(mt.span, ErrorKind::CallerNotSetInInit);
                mt.clone()
            }
            _ => map_term(mt, &mut |c| subst(c, caller, bag)),
        }
    }

    let mut model = model;
    for decl in &mut model.decls {
        match decl {
            Decl::Var(v) => {
                if let Some(d) = &v.default {
                    v.default = Some(subst(d, caller, bag));
                }
            }
            Decl::Asset(a) => {
                for field in &mut a.fields {
                    if let Some(d) = &field.default {
                        field.default = Some(subst(d, caller, bag));
                    }
                }
                for init in &mut a.init {
                    *init = subst(init, caller, bag);
                }
            }
            _ => {}
        }
    }
    for param in &mut model.parameters {
        if let Some(d) = &param.default {
            param.default = Some(subst(d, caller, bag));
        }
    }
    for item in &mut model.storage {
        item.default = subst(&item.default, caller, bag);
    }
    model
}

fn exposes_asset(ty: &Type) -> bool {
    match &ty.node {
        TypeNode::Asset(_) | TypeNode::Container(..) => true,
        TypeNode::Option(t)
        | TypeNode::List(t)
        | TypeNode::Set(t)
        | TypeNode::Contract(t)
        | TypeNode::Ticket(t) => exposes_asset(t),
        TypeNode::Map(k, v) | TypeNode::BigMap(k, v) | TypeNode::IterableBigMap(k, v)
        | TypeNode::Or(k, v) | TypeNode::Lambda(k, v) => exposes_asset(k) || exposes_asset(v),
        TypeNode::Tuple(ts) => ts.iter().any(exposes_asset),
        _ => false,
    }
}

/// Function signatures may not expose a raw asset type: the runtime
/// value of an asset is a key/record pair, not a named relation.
pub fn check_if_asset_in_function(model: &Model, bag: &mut DiagnosticBag) {
    for function in &model.functions {
        let offending = function.fs.args.iter().any(|a| exposes_asset(&a.typ))
            || function
                .kind
                .return_type()
                .map(exposes_asset)
                .unwrap_or(false);
        if offending {
            bag.error(
                function.fs.loc,
                ErrorKind::InvalidVarType(function.fs.name.clone()),
            );
        }
    }
}

fn count_var_uses(body: &Mterm, id: &Ident) -> usize {
    fold_term_rec(body, 0usize, &mut |acc, mt| match &mt.node {
        MtermNode::Var { id: vid, .. } if vid == id => acc + 1,
        _ => acc,
    })
}

/// Warn on unused function arguments and unused `let`-bindings.
pub fn check_unused_variables(model: &Model, bag: &mut DiagnosticBag) {
    for function in &model.functions {
        for arg in &function.fs.args {
            if count_var_uses(&function.fs.body, &arg.name) == 0 {
                bag.warning(arg.loc, ErrorKind::UnusedArgument(arg.name.clone()));
            }
        }
        fold_term_rec(&function.fs.body, (), &mut |(), mt| {
            if let MtermNode::Letin { ids, body, .. } = &mt.node {
                for id in ids {
                    // Synthesised binders are exempt; they exist to fix
                    // evaluation order, not to be read.
                    if !id.starts_with('_') && count_var_uses(body, id) == 0 {
                        bag.warning(mt.span, ErrorKind::UnusedVariable(id.clone()));
                    }
                }
            }
        });
    }
}

/// Prune everything but the focused property.
pub fn prune_properties(model: Model, property: &str) -> Model {
    let mut model = model;
    for function in &mut model.functions {
        if let Some(spec) = &mut function.fs.spec {
            spec.postconditions.retain(|p| p.name == property);
        }
    }
    model
        .specification
        .postconditions
        .retain(|p| p.name == property);
    model
        .specification
        .invariants
        .retain(|i| i.label == property);
    model.security.items.retain(|s| s.label == property);
    model
}

/// Identity rewrite used by tests to confirm the walker covers every
/// position the validation passes inspect.
#[cfg(test)]
fn identity(model: Model) -> Model {
    archetype_model::walk::map_mterm_model(model, &mut |_ctx, mt| mt.clone())
}
