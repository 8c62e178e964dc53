//! Date, duration and currency scalar lowerings.

use archetype_model::model::Model;
use archetype_model::term::{Mterm, MtermNode};
use archetype_model::types::TypeNode;
use archetype_model::walk::{map_mterm_model, map_term, map_term_ft};
use archetype_model::Type;

use super::rational::{map_type, retype_model};

fn lower_date_type(ty: &Type) -> Type {
    map_type(ty, &|node| match node {
        TypeNode::Date => TypeNode::Timestamp,
        TypeNode::Duration => TypeNode::Int,
        other => other.clone(),
    })
}

/// `date` becomes `timestamp`, `duration` becomes `int`; literals carry
/// their Unix-epoch representation. `now` stays symbolic.
pub fn replace_date_duration_by_timestamp(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term_ft(mt, &mut aux, &mut lower_date_type);
        match &mt.node {
            MtermNode::Date(epoch) => mt.with_node(MtermNode::Timestamp(*epoch)),
            MtermNode::Duration(seconds) => {
                mt.with_node(MtermNode::Int((*seconds).into()))
            }
            MtermNode::IntToDate(x) => {
                // Timestamps are epoch ints already.
                Mterm::new(
                    MtermNode::Cast(Type::int(), Type::timestamp(), x.clone()),
                    Type::timestamp(),
                    mt.span,
                )
            }
            _ => mt,
        }
    }
    let mut model = map_mterm_model(model, &mut |_ctx, top| aux(top));
    retype_model(&mut model, &lower_date_type);
    model
}

/// The target VM multiplies currency by `nat` only: wrap `int` factors
/// of a currency multiplication with `abs`.
pub fn abs_tez(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        let MtermNode::Mult(l, r) = &mt.node else {
            return mt;
        };
        let wrap = |x: &Mterm| {
            Mterm::new(
                MtermNode::Abs(Box::new(x.clone())),
                Type::nat(),
                x.span,
            )
        };
        match (&l.ty.node, &r.ty.node) {
            (TypeNode::Int, TypeNode::Currency) => {
                mt.with_node(MtermNode::Mult(Box::new(wrap(l)), r.clone()))
            }
            (TypeNode::Currency, TypeNode::Int) => {
                mt.with_node(MtermNode::Mult(l.clone(), Box::new(wrap(r))))
            }
            _ => mt,
        }
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

/// `string + string` is concatenation.
pub fn process_internal_string(model: Model) -> Model {
    fn aux(mt: &Mterm) -> Mterm {
        let mt = map_term(mt, &mut aux);
        match &mt.node {
            MtermNode::Plus(l, r)
                if matches!(l.ty.node, TypeNode::String)
                    && matches!(r.ty.node, TypeNode::String) =>
            {
                mt.with_node(MtermNode::Concat(l.clone(), r.clone()))
            }
            _ => mt,
        }
    }
    map_mterm_model(model, &mut |_ctx, mt| aux(mt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use archetype_model::function::{Function, FunctionKind, FunctionStruct};
    use archetype_model::Span;

    fn sp() -> Span {
        Span::zero(0)
    }

    fn model_with_body(body: Mterm) -> Model {
        let mut m = Model::new("m", sp());
        m.functions.push(Function {
            kind: FunctionKind::Entry,
            fs: FunctionStruct {
                name: "go".into(),
                args: vec![],
                eargs: vec![],
                body,
                stovars: vec![],
                spec: None,
                loc: sp(),
            },
        });
        m
    }

    fn body_of(model: &Model) -> &Mterm {
        &model.functions[0].fs.body
    }

    #[test]
    fn test_date_literal_becomes_timestamp() {
        let body = Mterm::new(MtermNode::Date(1_700_000_000), Type::date(), sp());
        let model = replace_date_duration_by_timestamp(model_with_body(body));
        assert_eq!(body_of(&model).node, MtermNode::Timestamp(1_700_000_000));
        assert_eq!(body_of(&model).ty, Type::timestamp());
    }

    #[test]
    fn test_duration_becomes_int_seconds() {
        let body = Mterm::new(MtermNode::Duration(3600), Type::duration(), sp());
        let model = replace_date_duration_by_timestamp(model_with_body(body));
        assert_eq!(body_of(&model).node, MtermNode::Int(3600.into()));
        assert_eq!(body_of(&model).ty, Type::int());
    }

    #[test]
    fn test_now_stays_symbolic() {
        let body = Mterm::new(MtermNode::Now, Type::date(), sp());
        let model = replace_date_duration_by_timestamp(model_with_body(body));
        assert_eq!(body_of(&model).node, MtermNode::Now);
        assert_eq!(body_of(&model).ty, Type::timestamp());
    }

    #[test]
    fn test_int_currency_factor_gets_abs() {
        let tez = Mterm::new(
            MtermNode::Currency(1_000_000.into(), archetype_model::term::CurrencyUnit::Utz),
            Type::currency(),
            sp(),
        );
        let body = Mterm::new(
            MtermNode::Mult(Box::new(Mterm::int(3, sp())), Box::new(tez)),
            Type::currency(),
            sp(),
        );
        let model = abs_tez(model_with_body(body));
        match &body_of(&model).node {
            MtermNode::Mult(l, _) => assert!(matches!(l.node, MtermNode::Abs(_))),
            other => panic!("expected Mult, got {other:?}"),
        }
    }

    #[test]
    fn test_string_plus_becomes_concat() {
        let body = Mterm::new(
            MtermNode::Plus(
                Box::new(Mterm::string("a", sp())),
                Box::new(Mterm::string("b", sp())),
            ),
            Type::string(),
            sp(),
        );
        let model = process_internal_string(model_with_body(body));
        assert!(matches!(body_of(&model).node, MtermNode::Concat(..)));
    }
}
