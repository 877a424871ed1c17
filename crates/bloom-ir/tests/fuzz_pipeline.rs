//! Generated programs through parse, lower and a few ticks.

use bloom_eval::{CollectSink, Collaborators, Engine, EngineConfig, Value};
use proptest::prelude::*;

const STATE: &str = r#"
state {
    table nums(n: int);
    table words(w: string, n: int);
    scratch tmp(n: int);
    table out(n: int);
}
"#;

fn arb_int_expr() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        Just("r.n".to_string()),
        (-20i64..20).prop_map(|v| format!("({v})")),
    ];
    leaf.prop_recursive(3, 16, 2, |inner| {
        (inner.clone(), prop::sample::select(vec!["+", "-", "*", "/", "%"]), inner)
            .prop_map(|(l, op, r)| format!("({l} {op} {r})"))
    })
}

fn arb_cond() -> impl Strategy<Value = String> {
    (arb_int_expr(), prop::sample::select(vec!["==", "!=", "<", "<=", ">", ">="]), arb_int_expr())
        .prop_map(|(l, op, r)| format!("{l} {op} {r}"))
}

fn arb_arrow() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["<=", "<+", "<+-"])
}

fn arb_rule() -> impl Strategy<Value = String> {
    prop_oneof![
        (arb_arrow(), arb_int_expr()).prop_map(|(a, e)| format!("tmp {a} nums.map(|r| [{e}]);")),
        (arb_arrow(), arb_cond()).prop_map(|(a, c)| format!("out {a} tmp.filter(|r| {c});")),
        (arb_arrow(), arb_cond()).prop_map(|(a, c)| format!("out {a} nums.map(|r| if {c} {{ [r.n] }});")),
        arb_arrow().prop_map(|a| {
            format!("words {a} (nums * out).pairs(|r, o| if r.n == o.n {{ (format!(\"w{{}}\", r.n), o.n) }});")
        }),
        Just("stdio <~ words.map(|w| format!(\"{} = {}\", w.w, w.n));".to_string()),
    ]
}

fn arb_program() -> impl Strategy<Value = (String, Vec<i64>)> {
    (
        prop::collection::vec(arb_rule(), 1..6),
        prop::collection::vec(-10i64..10, 0..8),
    )
        .prop_map(|(rules, seeds)| (format!("{STATE}\nbloom {{\n{}\n}}", rules.join("\n")), seeds))
}

proptest! {
    #[test]
    fn generated_programs_lower_and_run((src, seeds) in arb_program()) {
        let program = bloom_ir::compile(&src).map_err(|e| TestCaseError::fail(format!("{e}\n{src}")))?;
        let config = EngineConfig { max_iterations: Some(10_000), ..EngineConfig::default() };
        let mut engine = Engine::with_collaborators(program, config, Collaborators::new(CollectSink::new()))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        engine
            .insert("nums", seeds.iter().map(|&n| vec![Value::from(n)]))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        // No generated rule feeds its own sources, so every tick is finite.
        for _ in 0..3 {
            engine.tick().map_err(|e| TestCaseError::fail(format!("{e}\n{src}")))?;
        }
    }

    #[test]
    fn ill_typed_rows_never_lower(value in "[a-z]{1,6}") {
        let src = format!("{STATE}\nbloom {{ out <= nums.map(|r| [\"{value}\"]); }}");
        prop_assert!(bloom_ir::compile(&src).is_err());
    }
}
