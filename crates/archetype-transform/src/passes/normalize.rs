//! Normalisation passes.
//!
//! Structural cleanups the lowering stages rely on: flattened sequences,
//! mark-scoped labels, `let`-based scoping, unique loop labels and the
//! shadow-specification machinery.

use archetype_model::decl::{StorageItem, StorageModelType};
use archetype_model::model::Model;
use archetype_model::spec::Specification;
use archetype_model::term::{CollectionKind, IterKind, Mterm, MtermNode, VarKind};
use archetype_model::walk::{map_mterm_model, map_term, Context};
use archetype_model::{Ident, Type};

/// Strip every formula: invariants, specifications, security. Used by
/// the pure-code output paths.
pub fn prune_formula(model: Model) -> Model {
    let mut model = model;
    for decl in &mut model.decls {
        use archetype_model::decl::Decl;
        match decl {
            Decl::Var(v) => v.invariants.clear(),
            Decl::Enum(e) => {
                for item in &mut e.values {
                    item.invariants.clear();
                }
            }
            Decl::Asset(a) => a.invariants.clear(),
            Decl::Record(_) | Decl::Event(_) => {}
        }
    }
    for function in &mut model.functions {
        function.fs.spec = None;
    }
    model.specification = Specification::default();
    model.security.items.clear();
    model.api_verif.clear();
    model
}

/// Collapse nested sequences bottom-up: `seq[seq[a]; b]` is `seq[a; b]`,
/// a singleton sequence is its element, the empty sequence stays as the
/// unit instruction.
pub fn flat_sequence(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        match mt.node {
            MtermNode::Seq(instrs) => {
                let mut flat = Vec::with_capacity(instrs.len());
                for instr in instrs {
                    match instr.node {
                        MtermNode::Seq(inner) => flat.extend(inner),
                        _ => flat.push(instr),
                    }
                }
                // Drop interior skips; they carry nothing.
                flat.retain(|i| !matches!(&i.node, MtermNode::Seq(s) if s.is_empty()));
                Mterm::seq(flat, mt.span)
            }
            node => Mterm::new(node, mt.ty, mt.span),
        }
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

/// Drop every standalone label instruction.
pub fn remove_label(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        match &mt.node {
            MtermNode::Label(_) => Mterm::skip(mt.span),
            MtermNode::Mark(_, body) => (**body).clone(),
            _ => mt,
        }
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

/// Turn `label L; rest` into `mark(L, rest)`: a label scopes the suffix
/// of its sequence instead of standing alone.
pub fn replace_label_by_mark(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        match mt.node {
            MtermNode::Seq(instrs) => {
                let span = mt.span;
                let rebuilt = fold_labels(instrs, span);
                Mterm::new(MtermNode::Seq(rebuilt), mt.ty, span)
            }
            MtermNode::Label(id) => {
                // A label with no suffix scopes the empty instruction.
                Mterm::new(
                    MtermNode::Mark(id, Box::new(Mterm::skip(mt.span))),
                    mt.ty,
                    mt.span,
                )
            }
            node => Mterm::new(node, mt.ty, mt.span),
        }
    }

    fn fold_labels(instrs: Vec<Mterm>, span: archetype_model::Span) -> Vec<Mterm> {
        let mut out = Vec::with_capacity(instrs.len());
        let mut iter = instrs.into_iter();
        while let Some(instr) = iter.next() {
            match instr.node {
                MtermNode::Label(id) => {
                    let rest: Vec<Mterm> = iter.collect();
                    let suffix = Mterm::seq(fold_labels(rest, span), span);
                    out.push(Mterm::new(
                        MtermNode::Mark(id, Box::new(suffix)),
                        Type::unit(),
                        instr.span,
                    ));
                    return out;
                }
                node => out.push(Mterm::new(node, instr.ty, instr.span)),
            }
        }
        out
    }

    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

/// `declvar id = e; rest` becomes `let id = e in rest`, so every later
/// pass sees proper scoping.
pub fn replace_declvar_by_letin(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        match mt.node {
            MtermNode::Seq(instrs) => {
                let span = mt.span;
                Mterm::new(MtermNode::Seq(fold_decls(instrs, span)), mt.ty, span)
            }
            MtermNode::Declvar { ids, value, .. } => {
                // Standalone declaration: the binding scopes nothing.
                Mterm::new(
                    MtermNode::Letin {
                        ids,
                        value,
                        body: Box::new(Mterm::skip(mt.span)),
                    },
                    Type::unit(),
                    mt.span,
                )
            }
            node => Mterm::new(node, mt.ty, mt.span),
        }
    }

    fn fold_decls(instrs: Vec<Mterm>, span: archetype_model::Span) -> Vec<Mterm> {
        let mut out = Vec::with_capacity(instrs.len());
        let mut iter = instrs.into_iter();
        while let Some(instr) = iter.next() {
            match instr.node {
                MtermNode::Declvar { ids, value, .. } => {
                    let rest: Vec<Mterm> = iter.collect();
                    let body = Mterm::seq(fold_decls(rest, span), span);
                    out.push(Mterm::new(
                        MtermNode::Letin {
                            ids,
                            value,
                            body: Box::new(body),
                        },
                        Type::unit(),
                        instr.span,
                    ));
                    return out;
                }
                node => out.push(Mterm::new(node, instr.ty, instr.span)),
            }
        }
        out
    }

    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

fn rename_var(mt: &Mterm, from: &str, to: &str) -> Mterm {
    match &mt.node {
        MtermNode::Var { id, kind } if id == from => mt.with_node(MtermNode::Var {
            id: to.to_string(),
            kind: *kind,
        }),
        MtermNode::Assign {
            op,
            typ,
            kind: archetype_model::term::AssignKind::Var(id, vk),
            value,
        } if id == from => mt.with_node(MtermNode::Assign {
            op: *op,
            typ: typ.clone(),
            kind: archetype_model::term::AssignKind::Var(to.to_string(), *vk),
            value: Box::new(rename_var(value, from, to)),
        }),
        _ => map_term(mt, &mut |c| rename_var(c, from, to)),
    }
}

/// Shadow variables are renamed `v → v_<entry>` so splicing shadow
/// effects into entry bodies is collision-free.
pub fn rename_shadow_variable(model: Model) -> Model {
    let mut model = model;
    for function in &mut model.functions {
        let fname = function.fs.name.clone();
        let Some(spec) = &mut function.fs.spec else {
            continue;
        };
        let renames: Vec<(Ident, Ident)> = spec
            .variables
            .iter()
            .map(|v| (v.decl.name.clone(), format!("{}_{}", v.decl.name, fname)))
            .collect();
        for v in &mut spec.variables {
            if let Some((_, to)) = renames.iter().find(|(from, _)| *from == v.decl.name) {
                v.decl.name = to.clone();
            }
        }
        for (from, to) in &renames {
            for e in &mut spec.effects {
                *e = rename_var(e, from, to);
            }
            for post in &mut spec.postconditions {
                post.formula = rename_var(&post.formula, from, to);
                for inv in &mut post.invariants {
                    for formula in &mut inv.formulas {
                        *formula = rename_var(formula, from, to);
                    }
                }
            }
        }
    }
    model
}

/// Every `for`/`iter`/`while` gets a unique synthesised label derived
/// from the enclosing function, so formula lowering can resolve
/// `toiterate`/`iterated` against a loop.
pub fn assign_loop_label(model: Model) -> Model {
    map_mterm_model(model, &mut |ctx: &Context, top| {
        let owner = ctx
            .function
            .clone()
            .or_else(|| ctx.spec_id.clone())
            .unwrap_or_else(|| "top".to_string());
        let mut counter = 0u32;
        label_loops(top, &owner, &mut counter)
    })
}

fn label_loops(mt: &Mterm, owner: &str, counter: &mut u32) -> Mterm {
    let Mterm { node, ty, span } = map_term(mt, &mut |c| label_loops(c, owner, counter));
    let fresh = |counter: &mut u32| {
        let label = format!("loop_{owner}_{counter}");
        *counter += 1;
        label
    };
    let node = match node {
        MtermNode::For {
            ids,
            coll,
            body,
            label: None,
        } => MtermNode::For {
            ids,
            coll,
            body,
            label: Some(fresh(counter)),
        },
        MtermNode::Iter {
            id,
            from,
            to,
            body,
            label: None,
            nat,
        } => MtermNode::Iter {
            id,
            from,
            to,
            body,
            label: Some(fresh(counter)),
            nat,
        },
        MtermNode::While {
            cond,
            body,
            label: None,
        } => MtermNode::While {
            cond,
            body,
            label: Some(fresh(counter)),
        },
        node => node,
    };
    Mterm::new(node, ty, span)
}

fn loop_collection(ik: &IterKind) -> Option<CollectionKind> {
    match ik {
        IterKind::Coll(_) => Some(CollectionKind::Coll),
        IterKind::View(_, v) => Some(CollectionKind::View(v.clone())),
        IterKind::Field(an, f, k) => {
            Some(CollectionKind::Field(an.clone(), f.clone(), k.clone()))
        }
        IterKind::Set(_) | IterKind::List(_) | IterKind::Map(..) => None,
    }
}

/// Inside loop invariants, replace the pseudo-variables `toiterate` and
/// `iterated` by the concrete collection of the labeled loop.
pub fn extend_loop_iter(model: Model) -> Model {
    let mut model = model;

    // Label → collection, gathered from every function body.
    let mut labeled: Vec<(Ident, CollectionKind)> = Vec::new();
    for function in &model.functions {
        collect_labeled_loops(&function.fs.body, &mut labeled);
    }

    for function in &mut model.functions {
        let Some(spec) = &mut function.fs.spec else {
            continue;
        };
        for post in &mut spec.postconditions {
            for inv in &mut post.invariants {
                let Some((_, ck)) = labeled.iter().find(|(l, _)| *l == inv.label) else {
                    continue;
                };
                for formula in &mut inv.formulas {
                    *formula = subst_iter_pseudos(formula, ck);
                }
            }
        }
    }
    model
}

fn collect_labeled_loops(mt: &Mterm, out: &mut Vec<(Ident, CollectionKind)>) {
    archetype_model::walk::fold_term_rec(mt, (), &mut |(), t| {
        if let MtermNode::For {
            coll,
            label: Some(label),
            ..
        } = &t.node
        {
            if let Some(ck) = loop_collection(coll) {
                out.push((label.clone(), ck));
            }
        }
    });
}

fn subst_iter_pseudos(mt: &Mterm, ck: &CollectionKind) -> Mterm {
    match &mt.node {
        MtermNode::Var { id, kind: VarKind::Local } if id == "toiterate" => {
            mt.with_node(MtermNode::Settoiterate(ck.clone()))
        }
        MtermNode::Var { id, kind: VarKind::Local } if id == "iterated" => {
            mt.with_node(MtermNode::Setiterated(ck.clone()))
        }
        _ => map_term(mt, &mut |c| subst_iter_pseudos(c, ck)),
    }
}

/// Move shadow variables into storage as ghost items.
pub fn transfer_shadow_variable_to_storage(model: Model) -> Model {
    let mut model = model;
    let mut ghosts = Vec::new();
    for function in &mut model.functions {
        let Some(spec) = &mut function.fs.spec else {
            continue;
        };
        for v in spec.variables.drain(..) {
            let default = v
                .decl
                .default
                .clone()
                .unwrap_or_else(|| panic!("shadow variable {} has no default", v.decl.name));
            ghosts.push(StorageItem {
                id: v.decl.name.clone(),
                model_type: StorageModelType::Var,
                typ: v.decl.typ.clone(),
                default,
                ghost: true,
                loc: v.decl.loc,
            });
        }
    }
    model.storage.extend(ghosts);
    model
}

/// Splice each specification's shadow effects at the end of its owning
/// entry's body.
pub fn concat_shadow_effect_to_exec(model: Model) -> Model {
    let mut model = model;
    for function in &mut model.functions {
        let Some(spec) = &mut function.fs.spec else {
            continue;
        };
        if spec.effects.is_empty() {
            continue;
        }
        let span = function.fs.body.span;
        let mut instrs = vec![function.fs.body.clone()];
        instrs.append(&mut spec.effects);
        function.fs.body = Mterm::seq(instrs, span);
    }
    model
}
