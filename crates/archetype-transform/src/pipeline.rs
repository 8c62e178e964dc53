//! The straight-line pass driver.
//!
//! Stages run in a fixed order: validation, normalisation, asset method
//! lowering, enum lowering, asset lowering, scalar and container
//! lowerings, whole-program environment passes, then housekeeping.
//! `fix_container`, `extract_item_collection_from_add_asset`,
//! `process_multi_keys` and the get/nth/sort preparations run
//! immediately before `remove_asset`, which consumes their output;
//! `update_nat_int_rat` and `flat_sequence` are applied at several
//! points. Everything else is strictly sequential, and no pass is
//! reapplied out of order.

use archetype_model::model::Model;
use tracing::debug;

use crate::error::{stop, CompileError, DiagnosticBag, ErrorKind, Stop};
use crate::options::Options;
use crate::passes::{
    asset_lower, asset_update, check, containers, control, dates, entrypoints, enums, extract,
    keys, normalize, rational, storage,
};

/// Outcome of a successful run: the lowered model plus every warning
/// recorded along the way.
#[derive(Debug)]
pub struct TransformResult {
    pub model: Model,
    pub warnings: Vec<CompileError>,
}

fn run(name: &str, model: Model, pass: impl FnOnce(Model) -> Model) -> Model {
    debug!(pass = name, "applying");
    pass(model)
}

/// Apply the whole middle-end to a typed model.
///
/// Validation failures stop with the failing cluster's code and carry
/// every diagnostic recorded up to that point; warnings never stop the
/// pipeline and are returned alongside the lowered model.
pub fn transform(model: Model, options: &Options) -> Result<TransformResult, Stop> {
    let mut bag = DiagnosticBag::new();

    // The contract must expose at least one entry.
    if !model.functions.iter().any(|f| f.kind.is_entry()) {
        bag.error(model.loc, ErrorKind::NoEntrypoint);
        bag.check_stop(stop::MODEL)?;
    }

    // === Validation ===
    debug!(pass = "check_partition_access", "applying");
    check::check_partition_access(&model, &mut bag);
    bag.check_stop(stop::CHECK)?;
    debug!(pass = "check_containers_asset", "applying");
    check::check_containers_asset(&model, &mut bag);
    bag.check_stop(stop::CHECK)?;
    debug!(pass = "check_empty_container_on_asset_default_value", "applying");
    check::check_empty_container_on_asset_default_value(&model, &mut bag);
    bag.check_stop(stop::CHECK)?;
    debug!(pass = "check_asset_key", "applying");
    check::check_asset_key(&model, &mut bag);
    bag.check_stop(stop::CHECK)?;
    debug!(pass = "check_invalid_init_value", "applying");
    check::check_invalid_init_value(&model, &mut bag);
    bag.check_stop(stop::CHECK)?;
    debug!(pass = "check_init_partition_in_asset", "applying");
    check::check_init_partition_in_asset(&model, &mut bag);
    bag.check_stop(stop::CHECK)?;
    debug!(pass = "check_duplicated_keys_in_asset", "applying");
    check::check_duplicated_keys_in_asset(&model, &mut bag);
    bag.check_stop(stop::CHECK)?;

    debug!(pass = "check_and_replace_init_caller", "applying");
    let model = check::check_and_replace_init_caller(model, options.caller.as_deref(), &mut bag);
    bag.check_stop(stop::CHECK)?;

    debug!(pass = "check_if_asset_in_function", "applying");
    check::check_if_asset_in_function(&model, &mut bag);
    bag.check_stop(stop::ASSET_IN_FUNCTION)?;

    debug!(pass = "check_unused_variables", "applying");
    check::check_unused_variables(&model, &mut bag);

    let model = match &options.property_focused {
        Some(property) => run("prune_properties", model, |m| {
            check::prune_properties(m, property)
        }),
        None => model,
    };

    // === Normalisation ===
    let model = run("flat_sequence", model, normalize::flat_sequence);
    let model = run(
        "replace_declvar_by_letin",
        model,
        normalize::replace_declvar_by_letin,
    );
    let model = run(
        "rename_shadow_variable",
        model,
        normalize::rename_shadow_variable,
    );
    let model = run("assign_loop_label", model, normalize::assign_loop_label);
    let model = run("extend_loop_iter", model, normalize::extend_loop_iter);
    let model = run(
        "transfer_shadow_variable_to_storage",
        model,
        normalize::transfer_shadow_variable_to_storage,
    );
    let model = run(
        "concat_shadow_effect_to_exec",
        model,
        normalize::concat_shadow_effect_to_exec,
    );
    // Labels anchor formulas: with a property focus the marks stay,
    // otherwise the pure-code path drops specifications and labels both.
    let model = if options.property_focused.is_some() {
        run(
            "replace_label_by_mark",
            model,
            normalize::replace_label_by_mark,
        )
    } else {
        let model = run("prune_formula", model, normalize::prune_formula);
        run("remove_label", model, normalize::remove_label)
    };
    let model = run("flat_sequence", model, normalize::flat_sequence);

    // === Asset method lowering ===
    debug!(pass = "remove_add_update", "applying");
    let model = asset_update::remove_add_update(model, &mut bag);
    bag.check_stop(stop::MODEL)?;
    let model = run(
        "remove_container_op_in_update_exec",
        model,
        asset_update::remove_container_op_in_update_exec,
    );
    let model = run(
        "remove_container_op_in_update",
        model,
        asset_update::remove_container_op_in_update,
    );
    let model = run("remove_empty_update", model, asset_update::remove_empty_update);
    let model = run("merge_update", model, asset_update::merge_update);
    let model = run(
        "replace_assignfield_by_update",
        model,
        asset_update::replace_assignfield_by_update,
    );
    let model = run("remove_update_all", model, asset_update::remove_update_all);
    let model = run("replace_instr_verif", model, asset_update::replace_instr_verif);
    let model = run(
        "replace_update_by_set",
        model,
        asset_update::replace_update_by_set,
    );
    let model = run(
        "replace_dotassetfield_by_dot",
        model,
        asset_update::replace_dotassetfield_by_dot,
    );
    let model = run(
        "remove_duplicate_key",
        model,
        asset_update::remove_duplicate_key,
    );
    let model = run("flat_sequence", model, normalize::flat_sequence);

    // === Enums and states ===
    let model = run("process_asset_state", model, enums::process_asset_state);
    let model = run("remove_enum", model, enums::remove_enum);

    // === Asset lowering ===
    let model = run("fix_container", model, containers::fix_container);
    let model = run(
        "extract_item_collection_from_add_asset",
        model,
        containers::extract_item_collection_from_add_asset,
    );
    let model = run("process_multi_keys", model, keys::process_multi_keys);
    let model = run("add_explicit_sort", model, keys::add_explicit_sort);
    let model = run("change_type_of_nth", model, keys::change_type_of_nth);
    let model = run("add_contain_on_get", model, keys::add_contain_on_get);
    debug!(pass = "remove_asset", "applying");
    let model = asset_lower::remove_asset(model, &mut bag);
    bag.check_stop(stop::MODEL)?;
    let model = run("split_key_values", model, keys::split_key_values);
    let model = run("flat_sequence", model, normalize::flat_sequence);

    // === Scalar and container lowerings ===
    let model = run("remove_rational", model, rational::remove_rational);
    let model = run("update_nat_int_rat", model, rational::update_nat_int_rat);
    let model = run(
        "replace_date_duration_by_timestamp",
        model,
        dates::replace_date_duration_by_timestamp,
    );
    let model = run("update_nat_int_rat", model, rational::update_nat_int_rat);
    let model = run("abs_tez", model, dates::abs_tez);
    let model = run(
        "process_internal_string",
        model,
        dates::process_internal_string,
    );
    let model = run("remove_cmp_bool", model, control::remove_cmp_bool);
    let model = run("lazy_eval_condition", model, control::lazy_eval_condition);
    let model = run(
        "remove_ternary_operator",
        model,
        control::remove_ternary_operator,
    );
    let model = run(
        "remove_iterable_big_map",
        model,
        containers::remove_iterable_big_map,
    );
    let model = run(
        "process_arith_container",
        model,
        containers::process_arith_container,
    );
    let model = run("instr_to_expr_exec", model, containers::instr_to_expr_exec);
    let model = run("replace_for_to_iter", model, control::replace_for_to_iter);
    let model = run("remove_decl_var_opt", model, control::remove_decl_var_opt);
    let model = run(
        "remove_high_level_model",
        model,
        control::remove_high_level_model,
    );
    let model = run("expr_to_instr", model, containers::expr_to_instr);
    let model = run("flat_sequence", model, normalize::flat_sequence);

    // === Environment and whole-program ===
    debug!(pass = "process_parameter", "applying");
    let model = storage::process_parameter(model, &mut bag);
    bag.check_stop(stop::MODEL)?;
    debug!(pass = "process_metadata", "applying");
    let model = storage::process_metadata(model, options, &mut bag);
    bag.check_stop(stop::MODEL)?;
    let model = run("remove_constant", model, storage::remove_constant);
    let model = run(
        "eval_variable_initial_value",
        model,
        storage::eval_variable_initial_value,
    );
    let model = run("eval_storage", model, storage::eval_storage);
    let model = run("normalize_storage", model, storage::normalize_storage);
    let model = run(
        "remove_storage_field_in_function",
        model,
        storage::remove_storage_field_in_function,
    );
    let model = run("getter_to_entry", model, entrypoints::getter_to_entry);
    let model = if options.test_mode {
        run("test_mode", model, entrypoints::test_mode)
    } else {
        model
    };
    let model = run("patch_fa2", model, entrypoints::patch_fa2);
    let model = run("reverse_operations", model, entrypoints::reverse_operations);
    let model = run("fill_stovars", model, entrypoints::fill_stovars);
    let model = run("filter_api_storage", model, entrypoints::filter_api_storage);
    let model = run("process_fail", model, entrypoints::process_fail);
    let model = run(
        "process_single_field_storage",
        model,
        storage::process_single_field_storage,
    );

    // === Housekeeping ===
    let model = run("remove_fun_dotasset", model, extract::remove_fun_dotasset);
    let model = run(
        "remove_letin_from_expr",
        model,
        extract::remove_letin_from_expr,
    );
    let model = run("flat_sequence", model, normalize::flat_sequence);

    let warnings = bag.warnings().cloned().collect();
    Ok(TransformResult { model, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use archetype_model::function::{Function, FunctionKind, FunctionStruct};
    use archetype_model::term::Mterm;
    use archetype_model::Span;

    fn sp() -> Span {
        Span::zero(0)
    }

    fn minimal_model() -> Model {
        let mut m = Model::new("empty", sp());
        m.functions.push(Function {
            kind: FunctionKind::Entry,
            fs: FunctionStruct {
                name: "noop".into(),
                args: vec![],
                eargs: vec![],
                body: Mterm::skip(sp()),
                stovars: vec![],
                spec: None,
                loc: sp(),
            },
        });
        m
    }

    #[test]
    fn test_missing_entrypoint_stops_early() {
        let model = Model::new("empty", sp());
        let err = transform(model, &Options::default()).unwrap_err();
        assert_eq!(err.code, stop::MODEL);
        assert!(matches!(err.diagnostics[0].kind, ErrorKind::NoEntrypoint));
    }

    #[test]
    fn test_minimal_model_flows_through() {
        let result = transform(minimal_model(), &Options::default()).unwrap();
        assert!(result.warnings.is_empty());
        assert_eq!(result.model.functions.len(), 1);
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let a = transform(minimal_model(), &Options::default()).unwrap();
        let b = transform(minimal_model(), &Options::default()).unwrap();
        assert_eq!(a.model, b.model);
    }

    #[test]
    fn test_test_mode_adds_set_now_entry() {
        let options = Options {
            test_mode: true,
            ..Default::default()
        };
        let result = transform(minimal_model(), &options).unwrap();
        assert!(result.model.find_function("_set_now").is_some());
        assert!(result.model.storage.iter().any(|s| s.id == "_now"));
    }
}
