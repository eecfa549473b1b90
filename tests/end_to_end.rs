//! Six end-to-end scenarios exercising the backend through the reference frontend and
//! the reference interpreter in `support.rs`: a fused loop step, recursion, a
//! cross-module import's register contract, enum matching with duplicate-arm
//! rejection, a scope-stack diagnostic, and polymorphic string concatenation.

mod support;

use orusc::diagnostics::DiagCode;
use orusc::module_manager::InMemoryModuleManager;
use support::{compile, compile_expecting_diagnostics, function_index, math_module, Interpreter, Value};

fn assert_prints(vm: &Interpreter, expected: &[&str]) {
    let actual = vm.prints();
    assert_eq!(actual.len(), expected.len(), "{:?} vs {:?}", actual, expected);
    for (a, e) in actual.iter().zip(expected) {
        assert_eq!(a.as_str(), *e);
    }
}

#[test]
fn fused_inc_cmp_jmp_counts_a_for_range_loop_to_its_limit() {
    let mgr = InMemoryModuleManager::new();
    let compiled = compile(
        "let mut n = 0; for i in 0..5 { n = n + 1; } print(n);",
        &mgr,
    );
    let mut vm = Interpreter::new(&compiled.program);
    vm.run_main();
    assert_prints(&vm, &["5"]);
}

#[test]
fn inclusive_range_fast_path_synthesises_the_endpoint_bump() {
    let mgr = InMemoryModuleManager::new();
    let compiled = compile(
        "let mut n = 0; for i in 0..=5 { n = n + 1; } print(n);",
        &mgr,
    );
    let mut vm = Interpreter::new(&compiled.program);
    vm.run_main();
    assert_prints(&vm, &["6"]);
}

#[test]
fn descending_step_range_runs_the_sign_appropriate_comparison() {
    let mgr = InMemoryModuleManager::new();
    let compiled = compile(
        "let mut n = 0; for i in 10..0 step -2 { n = n + 1; } print(n);",
        &mgr,
    );
    let mut vm = Interpreter::new(&compiled.program);
    vm.run_main();
    assert_prints(&vm, &["5"]);
}

#[test]
fn unknown_sign_step_range_selects_its_comparison_at_run_time() {
    let mgr = InMemoryModuleManager::new();
    let compiled = compile(
        "let mut n = 0; let s = 0 - 1; for i in 10..0 step s { n = n + 1; } print(n);",
        &mgr,
    );
    let mut vm = Interpreter::new(&compiled.program);
    vm.run_main();
    assert_prints(&vm, &["10"]);
}

#[test]
fn recursive_function_resolves_its_own_name_before_its_body_compiles() {
    let mgr = InMemoryModuleManager::new();
    let compiled = compile(
        "fn fact(n: i32) -> i32 { \
             if n <= 1 { return 1; } \
             return n * fact(n - 1); \
         } \
         print(fact(6));",
        &mgr,
    );
    let mut vm = Interpreter::new(&compiled.program);
    vm.run_main();
    assert_prints(&vm, &["720"]);

    let fact = function_index(&compiled, "fact");
    assert_eq!(vm.call(fact, &[Value::I32(6)]), Value::I32(720));
}

#[test]
fn named_import_resolves_once_per_symbol_regardless_of_how_many_times_its_used() {
    let mgr = math_module();
    let compiled = compile("use math.{pi, sqrt}; use math.{pi};", &mgr);

    assert_eq!(compiled.imports.len(), 2, "pi is imported twice but only recorded once");
    let pi = compiled.imports.iter().find(|e| e.symbol == "pi").unwrap();
    let sqrt = compiled.imports.iter().find(|e| e.symbol == "sqrt").unwrap();
    assert_eq!(pi.module, "math");
    assert_eq!(sqrt.module, "math");
    assert_eq!(pi.register, 3, "the importer binds directly to the exporter's own register");
    assert_eq!(sqrt.register, 4, "the importer binds directly to the exporter's own register");
}

#[test]
fn match_binds_enum_payloads_and_rejects_a_duplicate_arm() {
    let mgr = InMemoryModuleManager::new();
    let compiled = compile(
        "enum Opt { Some(i32), None } \
         fn unwrap_or(o: Opt, default: i32) -> i32 { \
             return match o { \
                 Opt::Some(v) => v, \
                 Opt::None => default, \
             }; \
         } \
         print(unwrap_or(Opt::Some(42), 0)); \
         print(unwrap_or(Opt::None, 7));",
        &mgr,
    );
    let mut vm = Interpreter::new(&compiled.program);
    vm.run_main();
    assert_prints(&vm, &["42", "7"]);

    let diags = compile_expecting_diagnostics(
        "enum Opt { Some(i32), None } \
         fn f(o: Opt) -> i32 { \
             return match o { \
                 Opt::Some(v) => v, \
                 Opt::Some(v) => v, \
                 Opt::None => 0, \
             }; \
         }",
        &mgr,
    );
    assert!(
        diags.iter().any(|d| d.code == DiagCode::DuplicateMatchArm),
        "expected a duplicate-match-arm diagnostic, got {:#?}",
        diags,
    );
}

#[test]
fn break_outside_a_loop_names_the_compiler_scope_stack_in_its_note() {
    let mgr = InMemoryModuleManager::new();
    let diags = compile_expecting_diagnostics("break;", &mgr);

    assert_eq!(diags.len(), 1, "{:#?}", diags);
    assert_eq!(diags[0].code, DiagCode::BreakOutsideLoop);
    assert_eq!(
        diags[0].note.as_deref(),
        Some("Compiler scope stack reports no active loops at this point."),
    );
}

#[test]
fn the_plus_operator_concatenates_when_either_operand_is_a_string() {
    let mgr = InMemoryModuleManager::new();
    let compiled = compile(r#"print("count: " + 5);"#, &mgr);
    let mut vm = Interpreter::new(&compiled.program);
    vm.run_main();
    assert_prints(&vm, &["count: 5"]);
}
