//! End-to-end pipeline scenarios: a typed model goes in, a fully
//! lowered model comes out, and the high-level surface is gone.

use archetype_model::decl::{
    AssetDecl, AssetField, Decl, EnumDecl, EnumItem, StorageItem, StorageModelType,
};
use archetype_model::function::{Argument, Function, FunctionKind, FunctionStruct};
use archetype_model::model::Model;
use archetype_model::term::{
    AssignOp, CollectionKind, Mterm, MtermNode,
};
use archetype_model::types::{ContainerIntent, MapKind, TypeNode};
use archetype_model::walk::fold_term_rec;
use archetype_model::{Span, Type};
use archetype_transform::{transform, Options};

fn sp() -> Span {
    Span::zero(0)
}

fn field(name: &str, typ: Type) -> AssetField {
    AssetField {
        name: name.into(),
        original_type: typ.clone(),
        typ,
        default: None,
        shadow: false,
        loc: sp(),
    }
}

fn asset(name: &str, keys: Vec<&str>, fields: Vec<AssetField>, mk: MapKind) -> AssetDecl {
    AssetDecl {
        name: name.into(),
        keys: keys.into_iter().map(Into::into).collect(),
        sort: vec![],
        fields,
        init: vec![],
        invariants: vec![],
        state: None,
        map_kind: mk,
        loc: sp(),
    }
}

fn asset_storage(an: &str) -> StorageItem {
    StorageItem {
        id: an.into(),
        model_type: StorageModelType::Asset(an.into()),
        typ: Type::container(Type::asset(an), ContainerIntent::Collection),
        default: Mterm::new(
            MtermNode::Assets(vec![]),
            Type::container(Type::asset(an), ContainerIntent::Collection),
            sp(),
        ),
        ghost: false,
        loc: sp(),
    }
}

fn entry(name: &str, args: Vec<Argument>, body: Mterm) -> Function {
    Function {
        kind: FunctionKind::Entry,
        fs: FunctionStruct {
            name: name.into(),
            args,
            eargs: vec![],
            body,
            stovars: vec![],
            spec: None,
            loc: sp(),
        },
    }
}

fn arg(name: &str, typ: Type) -> Argument {
    Argument {
        name: name.into(),
        typ,
        default: None,
        loc: sp(),
    }
}

fn count_nodes(model: &Model, pred: impl Fn(&MtermNode) -> bool + Copy) -> usize {
    let mut count = 0;
    for f in &model.functions {
        count += fold_term_rec(&f.fs.body, 0usize, &mut |acc, t| {
            acc + usize::from(pred(&t.node))
        });
    }
    count
}

fn assert_lowered(model: &Model) {
    for f in &model.functions {
        fold_term_rec(&f.fs.body, (), &mut |(), t| {
            use MtermNode::*;
            assert!(
                !matches!(
                    t.node,
                    Addupdate { .. }
                        | Update { .. }
                        | Updateall { .. }
                        | Putremove { .. }
                        | Removeif { .. }
                        | Select { .. }
                        | Sort { .. }
                        | Sum { .. }
                        | Get { .. }
                        | Addasset { .. }
                        | Removeasset { .. }
                        | Declvar { .. }
                        | Declvaropt { .. }
                        | Ternarybool { .. }
                        | Ternaryoption { .. }
                        | Enumval { .. }
                        | Rational(..)
                ),
                "high-level node survived lowering: {:?}",
                t.node
            );
            assert!(
                !matches!(t.ty.node, TypeNode::Rational | TypeNode::IterableBigMap(..)),
                "high-level type survived lowering: {}",
                t.ty
            );
        });
    }
    for item in &model.storage {
        assert!(!matches!(
            item.typ.node,
            TypeNode::Rational | TypeNode::IterableBigMap(..) | TypeNode::Container(..)
        ));
    }
}

/// Scenario: `remove_if` over a plain asset lowers to a loop over the
/// stored map with the predicate inlined and a primitive removal.
#[test]
fn test_remove_if_lowers_to_filtered_loop() {
    let my_asset = asset(
        "my_asset",
        vec!["id"],
        vec![
            field("id", Type::nat()),
            field("s", Type::string()),
            field("b", Type::bool()),
        ],
        MapKind::Map,
    );

    let the = Mterm::var("the", Type::asset("my_asset"), sp());
    let dot = |f: &str, ty: Type| {
        Mterm::new(
            MtermNode::Dot {
                expr: Box::new(the.clone()),
                field: f.into(),
            },
            ty,
            sp(),
        )
    };
    // the.id >= n or the.s = s and the.b = false
    let pred = Mterm::new(
        MtermNode::Or(
            Box::new(Mterm::new(
                MtermNode::Ge(
                    Box::new(dot("id", Type::nat())),
                    Box::new(Mterm::var("n", Type::nat(), sp())),
                ),
                Type::bool(),
                sp(),
            )),
            Box::new(Mterm::new(
                MtermNode::And(
                    Box::new(Mterm::new(
                        MtermNode::Equal(
                            Type::string(),
                            Box::new(dot("s", Type::string())),
                            Box::new(Mterm::var("s", Type::string(), sp())),
                        ),
                        Type::bool(),
                        sp(),
                    )),
                    Box::new(Mterm::new(
                        MtermNode::Equal(
                            Type::bool(),
                            Box::new(dot("b", Type::bool())),
                            Box::new(Mterm::bool_(false, sp())),
                        ),
                        Type::bool(),
                        sp(),
                    )),
                ),
                Type::bool(),
                sp(),
            )),
        ),
        Type::bool(),
        sp(),
    );
    let body = Mterm::new(
        MtermNode::Removeif {
            asset: "my_asset".into(),
            container: CollectionKind::Coll,
            args: vec![("the".into(), Type::asset("my_asset"))],
            body: Box::new(pred),
        },
        Type::unit(),
        sp(),
    );

    let mut model = Model::new("m", sp());
    model.decls.push(Decl::Asset(my_asset));
    model.storage.push(asset_storage("my_asset"));
    model.functions.push(entry(
        "clean",
        vec![arg("n", Type::nat()), arg("s", Type::string())],
        body,
    ));

    let result = transform(model, &Options::default()).unwrap();
    assert_lowered(&result.model);

    assert!(count_nodes(&result.model, |n| matches!(n, MtermNode::For { .. })) >= 1);
    assert_eq!(
        count_nodes(&result.model, |n| matches!(
            n,
            MtermNode::Mapinstrremove { .. }
        )),
        1
    );
}

/// Scenario: the fa12 ledger/allowance shapes. `add_update` becomes the
/// guarded update/add choice, the ledger stores `big_map<address, nat>`
/// and the flattened allowance key is an address pair.
#[test]
fn test_fa12_storage_shapes_and_add_update() {
    let ledger = asset(
        "ledger",
        vec!["holder"],
        vec![
            field("holder", Type::address()),
            {
                let mut f = field("tokens", Type::nat());
                f.default = Some(Mterm::nat(0, sp()));
                f
            },
        ],
        MapKind::BigMap,
    );
    let allowance = asset(
        "allowance",
        vec!["addr_owner", "addr_spender"],
        vec![
            field("addr_owner", Type::address()),
            field("addr_spender", Type::address()),
            field("amount", Type::nat()),
        ],
        MapKind::BigMap,
    );

    let to = Mterm::var("to_", Type::address(), sp());
    let value = Mterm::var("value", Type::nat(), sp());
    let body = Mterm::new(
        MtermNode::Addupdate {
            asset: "ledger".into(),
            container: CollectionKind::Coll,
            key: Box::new(to),
            updates: vec![("tokens".into(), AssignOp::Plus, value)],
        },
        Type::unit(),
        sp(),
    );

    let mut model = Model::new("fa12", sp());
    model.decls.push(Decl::Asset(ledger));
    model.decls.push(Decl::Asset(allowance));
    model.storage.push(asset_storage("ledger"));
    model.storage.push(asset_storage("allowance"));
    model.functions.push(entry(
        "transfer",
        vec![arg("to_", Type::address()), arg("value", Type::nat())],
        body,
    ));

    let result = transform(model, &Options::default()).unwrap();
    assert_lowered(&result.model);

    let ledger_slot = result
        .model
        .storage
        .iter()
        .find(|s| s.id == "ledger")
        .unwrap();
    match &ledger_slot.typ.node {
        TypeNode::BigMap(k, v) => {
            assert_eq!(**k, Type::address());
            assert_eq!(**v, Type::nat());
        }
        other => panic!("expected big_map ledger, got {other:?}"),
    }

    let allowance_slot = result
        .model
        .storage
        .iter()
        .find(|s| s.id == "allowance")
        .unwrap();
    match &allowance_slot.typ.node {
        TypeNode::BigMap(k, v) => {
            assert_eq!(**k, Type::tuple(vec![Type::address(), Type::address()]));
            assert_eq!(**v, Type::nat());
        }
        other => panic!("expected big_map allowance, got {other:?}"),
    }

    // The add_update left a contains choice with a put on each branch.
    assert!(count_nodes(&result.model, |n| matches!(
        n,
        MtermNode::Mapinstrput { .. }
    )) >= 2);
    assert!(count_nodes(&result.model, |n| matches!(n, MtermNode::Mapcontains { .. })) >= 1);
}

/// Scenario: a state transition on an asset with declared states. The
/// state is stored as an integer-encoded field and the transition is an
/// equality guard plus an update of that field.
#[test]
fn test_vehicle_lifecycle_transition() {
    let states = EnumDecl {
        name: "order_states".into(),
        values: ["Placed", "Scheduled", "Vin_assigned"]
            .iter()
            .map(|n| EnumItem {
                name: (*n).into(),
                args: vec![],
                invariants: vec![],
                loc: sp(),
            })
            .collect(),
        initial: "Placed".into(),
        loc: sp(),
    };
    let mut order = asset(
        "order",
        vec!["oid"],
        vec![field("oid", Type::nat()), field("vin", Type::string())],
        MapKind::Map,
    );
    order.state = Some("order_states".into());

    // if state(ok) <> Placed then fail else order[ok].state := Vin_assigned
    let ok = Mterm::var("ok", Type::nat(), sp());
    let read_state = Mterm::new(
        MtermNode::Assetstate {
            asset: "order".into(),
            key: Box::new(ok.clone()),
        },
        Type::enum_("order_states"),
        sp(),
    );
    let placed = Mterm::new(
        MtermNode::Enumval {
            id: "Placed".into(),
            args: vec![],
            enum_: "order_states".into(),
        },
        Type::enum_("order_states"),
        sp(),
    );
    let vin_assigned = Mterm::new(
        MtermNode::Enumval {
            id: "Vin_assigned".into(),
            args: vec![],
            enum_: "order_states".into(),
        },
        Type::enum_("order_states"),
        sp(),
    );
    let guard = Mterm::new(
        MtermNode::Nequal(
            Type::enum_("order_states"),
            Box::new(read_state),
            Box::new(placed),
        ),
        Type::bool(),
        sp(),
    );
    let assign_state = Mterm::new(
        MtermNode::Assign {
            op: AssignOp::Assign,
            typ: Type::enum_("order_states"),
            kind: archetype_model::term::AssignKind::AssetState {
                asset: "order".into(),
                key: Box::new(ok),
            },
            value: Box::new(vin_assigned),
        },
        Type::unit(),
        sp(),
    );
    let body = Mterm::if_(
        guard,
        Mterm::fail(archetype_model::term::FailType::InvalidState, sp()),
        Some(assign_state),
        sp(),
    );

    let mut model = Model::new("vehicle_lifecycle", sp());
    model.decls.push(Decl::Enum(states));
    model.decls.push(Decl::Asset(order));
    model.storage.push(asset_storage("order"));
    model
        .functions
        .push(entry("assign_vin", vec![arg("ok", Type::nat())], body));

    let result = transform(model, &Options::default()).unwrap();
    assert_lowered(&result.model);

    // The stored record carries the integer-encoded state field.
    let record = result.model.get_record("order");
    let state_field = record
        .fields
        .iter()
        .find(|f| f.name == "state_order")
        .expect("state field stored");
    assert_eq!(state_field.typ, Type::int());

    // The transition compares against the encoded constant 2.
    let has_vin_assigned_write = count_nodes(&result.model, |n| {
        matches!(n, MtermNode::Int(v) if *v == 2.into())
    });
    assert!(has_vin_assigned_write >= 1);
    assert!(count_nodes(&result.model, |n| matches!(
        n,
        MtermNode::Fail(archetype_model::term::FailType::InvalidState)
    )) == 1);
}

/// Scenario: a rational stored in an asset field becomes an `(int, nat)`
/// pair, and rational arithmetic becomes `rat*` primitives.
#[test]
fn test_rational_field_lowers_to_pair() {
    let pool = asset(
        "pool",
        vec!["pid"],
        vec![field("pid", Type::nat()), field("rate", Type::rational())],
        MapKind::Map,
    );

    let lit = Mterm::new(
        MtermNode::Rational(1.into(), 2.into()),
        Type::rational(),
        sp(),
    );
    let body = Mterm::new(
        MtermNode::Addasset {
            asset: "pool".into(),
            inst: Box::new(Mterm::new(
                MtermNode::Asset(vec![Mterm::nat(0, sp()), lit]),
                Type::asset("pool"),
                sp(),
            )),
        },
        Type::unit(),
        sp(),
    );

    let mut model = Model::new("m", sp());
    model.decls.push(Decl::Asset(pool));
    model.storage.push(asset_storage("pool"));
    model.functions.push(entry("init_pool", vec![], body));

    let result = transform(model, &Options::default()).unwrap();
    assert_lowered(&result.model);

    // The stored value type is the pair.
    let slot = result.model.storage.iter().find(|s| s.id == "pool").unwrap();
    match &slot.typ.node {
        TypeNode::Map(_, v) => {
            assert_eq!(**v, Type::tuple(vec![Type::int(), Type::nat()]));
        }
        other => panic!("expected map, got {other:?}"),
    }
    // The literal became (1, 2).
    let pairs = count_nodes(&result.model, |n| match n {
        MtermNode::Tuple(xs) => {
            xs.len() == 2
                && xs[0].node == MtermNode::Int(1.into())
                && xs[1].node == MtermNode::Nat(2.into())
        }
        _ => false,
    });
    assert_eq!(pairs, 1);
}

/// Scenario: an asset declared as an iterable big map stores the
/// `(values, positions, size)` triple.
#[test]
fn test_iterable_big_map_asset_stores_triple() {
    let registry = asset(
        "registry",
        vec!["rid"],
        vec![field("rid", Type::string()), field("score", Type::nat())],
        MapKind::IterableBigMap,
    );

    let body = Mterm::new(
        MtermNode::Addasset {
            asset: "registry".into(),
            inst: Box::new(Mterm::new(
                MtermNode::Asset(vec![Mterm::string("a", sp()), Mterm::nat(1, sp())]),
                Type::asset("registry"),
                sp(),
            )),
        },
        Type::unit(),
        sp(),
    );

    let mut model = Model::new("m", sp());
    model.decls.push(Decl::Asset(registry));
    model.storage.push(asset_storage("registry"));
    model.functions.push(entry("register", vec![], body));

    let result = transform(model, &Options::default()).unwrap();
    assert_lowered(&result.model);

    let slot = result
        .model
        .storage
        .iter()
        .find(|s| s.id == "registry")
        .unwrap();
    match &slot.typ.node {
        TypeNode::Tuple(parts) => {
            assert_eq!(parts.len(), 3);
            assert!(matches!(parts[0].node, TypeNode::BigMap(..)));
            assert!(matches!(parts[1].node, TypeNode::BigMap(..)));
            assert_eq!(parts[2], Type::nat());
        }
        other => panic!("expected triple, got {other:?}"),
    }
}

/// The pipeline is a pure function: identical inputs produce
/// structurally identical outputs.
#[test]
fn test_pipeline_determinism_on_asset_model() {
    let build = || {
        let mut model = Model::new("m", sp());
        model.decls.push(Decl::Asset(asset(
            "thing",
            vec!["id"],
            vec![field("id", Type::nat()), field("v", Type::string())],
            MapKind::Map,
        )));
        model.storage.push(asset_storage("thing"));
        model.functions.push(entry(
            "touch",
            vec![],
            Mterm::new(
                MtermNode::Addasset {
                    asset: "thing".into(),
                    inst: Box::new(Mterm::new(
                        MtermNode::Asset(vec![Mterm::nat(1, sp()), Mterm::string("x", sp())]),
                        Type::asset("thing"),
                        sp(),
                    )),
                },
                Type::unit(),
                sp(),
            ),
        ));
        model
    };
    let a = transform(build(), &Options::default()).unwrap();
    let b = transform(build(), &Options::default()).unwrap();
    assert_eq!(a.model, b.model);
}

/// Unused arguments surface as warnings without failing the run.
#[test]
fn test_warnings_flow_through() {
    let mut model = Model::new("m", sp());
    model.functions.push(entry(
        "noop",
        vec![arg("unused", Type::nat())],
        Mterm::skip(sp()),
    ));
    let result = transform(model, &Options::default()).unwrap();
    assert_eq!(result.warnings.len(), 1);
}
