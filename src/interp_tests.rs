//! Interpreter Behavior Tests
//!
//! End-to-end through compile + invoke: expression semantics, methods,
//! closures, control flow, the capability round trip, overlay rewrites and
//! the execution budget.

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use crate::capability::CapabilityValues;
    use crate::compile::{compile_script, CompileMode};
    use crate::interp::{root_env, Interp, RuntimeError, Scope};
    use crate::lower;
    use crate::value::Value;

    fn run(script: &str) -> Value {
        run_with(script, CapabilityValues::new())
    }

    fn run_with(script: &str, caps: CapabilityValues) -> Value {
        compile_script(script, CompileMode::Plain)
            .expect("compiles")
            .invoke(&caps.into_args())
            .expect("runs")
    }

    fn caps_with_data(data: serde_json::Value) -> CapabilityValues {
        let mut caps = CapabilityValues::new();
        caps.set("data", Value::from(data)).expect("known slot");
        caps
    }

    /// GetVar/SetVar natives over a shared store, for overlay tests.
    fn var_store() -> (Rc<RefCell<HashMap<String, Value>>>, Value, Value) {
        let store = Rc::new(RefCell::new(HashMap::new()));
        let get = {
            let store = Rc::clone(&store);
            Value::native("GetVar", move |args| {
                let key = args.first().map(Value::display_string).unwrap_or_default();
                Ok(store.borrow().get(&key).cloned().unwrap_or(Value::Undefined))
            })
        };
        let set = {
            let store = Rc::clone(&store);
            Value::native("SetVar", move |args| {
                let key = args.first().map(Value::display_string).unwrap_or_default();
                let value = args.get(1).cloned().unwrap_or(Value::Undefined);
                store.borrow_mut().insert(key, value.clone());
                Ok(value)
            })
        };
        (store, get, set)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn arithmetic_and_precedence() {
        assert!(run("return (1 + 2) * 3 - 4 / 2").strict_eq(&Value::Number(7.0)));
        assert!(run("return 2 ** 10").strict_eq(&Value::Number(1024.0)));
        assert!(run("return 7 % 3").strict_eq(&Value::Number(1.0)));
    }

    #[test]
    fn string_concatenation_coerces() {
        assert!(run("return 'n = ' + 42").strict_eq(&Value::string("n = 42")));
        assert!(run("return 1 + '2'").strict_eq(&Value::string("12")));
    }

    #[test]
    fn equality_strict_and_loose() {
        assert!(run("return 1 == '1'").strict_eq(&Value::Bool(true)));
        assert!(run("return 1 === '1'").strict_eq(&Value::Bool(false)));
        assert!(run("return null == undefined").strict_eq(&Value::Bool(true)));
    }

    #[test]
    fn logical_short_circuit_and_nullish() {
        assert!(run("return null ?? 'fallback'").strict_eq(&Value::string("fallback")));
        assert!(run("return 0 ?? 'fallback'").strict_eq(&Value::Number(0.0)));
        assert!(run("return 0 || 'fallback'").strict_eq(&Value::string("fallback")));
        assert!(run("return false && ShowToast('never')").strict_eq(&Value::Bool(false)));
    }

    #[test]
    fn optional_chaining_short_circuits() {
        assert!(run("return data?.missing?.deep").strict_eq(&Value::Undefined));
        let result = run_with(
            "return data?.user?.name",
            caps_with_data(serde_json::json!({ "user": { "name": "Ada" } })),
        );
        assert!(result.strict_eq(&Value::string("Ada")));
    }

    #[test]
    fn template_literals_interpolate() {
        let result = run_with(
            "return `Hi ${data.name}, you have ${data.count} items`",
            caps_with_data(serde_json::json!({ "name": "Ada", "count": 3 })),
        );
        assert!(result.strict_eq(&Value::string("Hi Ada, you have 3 items")));
    }

    #[test]
    fn typeof_unresolved_is_undefined_not_an_error() {
        assert!(run("return typeof neverDeclared").strict_eq(&Value::string("undefined")));
    }

    #[test]
    fn await_passes_the_value_through() {
        assert!(run("return await 5").strict_eq(&Value::Number(5.0)));
    }

    #[test]
    fn this_is_undefined() {
        assert!(run("return typeof this").strict_eq(&Value::string("undefined")));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // METHODS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn string_methods() {
        assert!(run("return ' Hello '.trim().toUpperCase()").strict_eq(&Value::string("HELLO")));
        assert!(run("return 'a,b,c'.split(',').length").strict_eq(&Value::Number(3.0)));
        assert!(run("return 'abcdef'.slice(1, -1)").strict_eq(&Value::string("bcde")));
        assert!(run("return '5'.padStart(3, '0')").strict_eq(&Value::string("005")));
    }

    #[test]
    fn array_methods_with_script_callbacks() {
        let caps = caps_with_data(serde_json::json!({ "nums": [1, 2, 3, 4, 5] }));
        let result = run_with(
            "return data.nums.filter(v => v % 2 === 0).map(v => v * 10).join(',')",
            caps,
        );
        assert!(result.strict_eq(&Value::string("20,40")));
    }

    #[test]
    fn reduce_accumulates() {
        let caps = caps_with_data(serde_json::json!({ "nums": [1, 2, 3, 4] }));
        let result = run_with("return data.nums.reduce((acc, v) => acc + v, 0)", caps);
        assert!(result.strict_eq(&Value::Number(10.0)));
    }

    #[test]
    fn mutating_array_methods() {
        let script = "const xs = [1, 2];\nxs.push(3);\nxs.unshift(0);\nreturn xs.join('-');";
        assert!(run(script).strict_eq(&Value::string("0-1-2-3")));
    }

    #[test]
    fn json_builtins_round_trip() {
        assert!(run(r#"return JSON.parse('{"a": 2}').a + 1"#).strict_eq(&Value::Number(3.0)));
        assert!(
            run("return JSON.stringify({ b: [1, 2] })")
                .strict_eq(&Value::string(r#"{"b":[1.0,2.0]}"#))
                || run("return JSON.stringify({ b: [1, 2] })")
                    .strict_eq(&Value::string(r#"{"b":[1,2]}"#))
        );
    }

    #[test]
    fn math_builtins() {
        assert!(run("return Math.max(1, 9, 4)").strict_eq(&Value::Number(9.0)));
        assert!(run("return Math.floor(3.9)").strict_eq(&Value::Number(3.0)));
    }

    #[test]
    fn object_namespace_helpers() {
        assert!(
            run("return Object.keys({ b: 1, a: 2 }).length").strict_eq(&Value::Number(2.0))
        );
        assert!(run("return parseInt('42px')").strict_eq(&Value::Number(42.0)));
        assert!(run("return parseFloat('3.5rem')").strict_eq(&Value::Number(3.5)));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CONTROL FLOW, FUNCTIONS, CLOSURES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn for_loop_accumulates() {
        let script = "let sum = 0;\nfor (let i = 1; i <= 4; i++) { sum += i; }\nreturn sum;";
        assert!(run(script).strict_eq(&Value::Number(10.0)));
    }

    #[test]
    fn for_of_and_for_in() {
        let caps = caps_with_data(serde_json::json!({ "xs": [10, 20] }));
        assert!(run_with(
            "let t = 0;\nfor (const x of data.xs) { t += x; }\nreturn t;",
            caps
        )
        .strict_eq(&Value::Number(30.0)));

        let caps = caps_with_data(serde_json::json!({ "a": 1, "b": 2 }));
        assert!(run_with(
            "let ks = [];\nfor (const k in data) { ks.push(k); }\nreturn ks.join(',');",
            caps
        )
        .strict_eq(&Value::string("a,b")));
    }

    #[test]
    fn switch_matches_and_falls_through() {
        let script = "switch (data.kind) { case 'a': return 1; case 'b': return 2; default: return 0; }";
        let result = run_with(script, caps_with_data(serde_json::json!({ "kind": "b" })));
        assert!(result.strict_eq(&Value::Number(2.0)));

        let fallthrough =
            "let n = 0;\nswitch (1) { case 1: n += 10; case 2: n += 1; break; case 3: n += 100; }\nreturn n;";
        assert!(run(fallthrough).strict_eq(&Value::Number(11.0)));
    }

    #[test]
    fn closures_capture_their_environment() {
        let script = "function counter() { let n = 0; return () => { n = n + 1; return n; }; }\nconst inc = counter();\ninc();\ninc();\nreturn inc();";
        assert!(run(script).strict_eq(&Value::Number(3.0)));
    }

    #[test]
    fn function_declarations_hoist() {
        assert!(run("return double(21);\nfunction double(n) { return n * 2; }")
            .strict_eq(&Value::Number(42.0)));
    }

    #[test]
    fn try_catch_binds_error_values() {
        assert!(run("try { return null.x } catch (e) { return e.name }")
            .strict_eq(&Value::string("TypeError")));
        assert!(run("try { throw 'boom' } catch (e) { return e }")
            .strict_eq(&Value::string("boom")));
        assert!(run("try { missing() } catch (e) { return e.name } finally { }")
            .strict_eq(&Value::string("ReferenceError")));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CAPABILITY ROUND TRIP
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn get_var_fallback_round_trip() {
        let mut caps = CapabilityValues::new();
        caps.set(
            "GetVar",
            Value::native("GetVar", |_args| Ok(Value::Undefined)),
        )
        .expect("known slot");
        let result = run_with("return GetVar('x') || 'Guest'", caps);
        assert!(result.strict_eq(&Value::string("Guest")));
    }

    #[test]
    fn capability_natives_receive_script_arguments() {
        let seen = Rc::new(RefCell::new(vec![]));
        let log = Rc::clone(&seen);
        let mut caps = CapabilityValues::new();
        caps.set(
            "ShowToast",
            Value::native("ShowToast", move |args| {
                log.borrow_mut()
                    .push(args.first().map(Value::display_string).unwrap_or_default());
                Ok(Value::Undefined)
            }),
        )
        .expect("known slot");
        run_with("ShowToast('saved');\nShowToast('twice');", caps);
        assert_eq!(*seen.borrow(), vec!["saved", "twice"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SCOPE OVERLAY
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn overlay_reads_and_writes_go_through_the_store() {
        let (store, get, set) = var_store();
        store
            .borrow_mut()
            .insert("count".to_string(), Value::Number(4.0));

        let mut caps = CapabilityValues::new();
        caps.set("GetVar", get).expect("known slot");
        caps.set("SetVar", set).expect("known slot");

        let unit = compile_script("count = count + 1;\nreturn count;", CompileMode::ScopeOverlay)
            .expect("compiles");
        let result = unit.invoke(&caps.into_args()).expect("runs");
        assert!(result.strict_eq(&Value::Number(5.0)));
        assert!(store.borrow()["count"].strict_eq(&Value::Number(5.0)));
    }

    #[test]
    fn overlay_leaves_locals_alone() {
        let (store, get, set) = var_store();
        let mut caps = CapabilityValues::new();
        caps.set("GetVar", get).expect("known slot");
        caps.set("SetVar", set).expect("known slot");

        let unit = compile_script(
            "let local = 1;\nlocal = local + 1;\nreturn local;",
            CompileMode::ScopeOverlay,
        )
        .expect("compiles");
        let result = unit.invoke(&caps.into_args()).expect("runs");
        assert!(result.strict_eq(&Value::Number(2.0)));
        assert!(store.borrow().is_empty());
    }

    #[test]
    fn overlay_postfix_update_yields_the_old_value() {
        let (store, get, set) = var_store();
        store
            .borrow_mut()
            .insert("n".to_string(), Value::Number(7.0));
        let mut caps = CapabilityValues::new();
        caps.set("GetVar", get).expect("known slot");
        caps.set("SetVar", set).expect("known slot");

        let unit =
            compile_script("return n++;", CompileMode::ScopeOverlay).expect("compiles");
        let result = unit.invoke(&caps.into_args()).expect("runs");
        assert!(result.strict_eq(&Value::Number(7.0)));
        assert!(store.borrow()["n"].strict_eq(&Value::Number(8.0)));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // BUDGET AND DEPTH
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn infinite_loop_hits_the_step_budget() {
        let body = lower::lower_script("while (true) {}").expect("lowers");
        let interp = Interp::with_budget(10_000);
        let env = Scope::child(&root_env());
        let err = interp.run(&body, &env).expect_err("budget exhausted");
        assert!(matches!(err, RuntimeError::Budget(_)));
    }

    #[test]
    fn budget_exhaustion_is_not_catchable() {
        let body = lower::lower_script("try { while (true) {} } catch (e) { return 'caught' }")
            .expect("lowers");
        let interp = Interp::with_budget(10_000);
        let env = Scope::child(&root_env());
        let err = interp.run(&body, &env).expect_err("budget exhausted");
        assert!(matches!(err, RuntimeError::Budget(_)));
    }

    #[test]
    fn runaway_recursion_hits_the_depth_limit() {
        let err = compile_script("function f() { return f(); }\nreturn f();", CompileMode::Plain)
            .expect("compiles")
            .invoke(&[])
            .expect_err("depth limit");
        assert!(matches!(err, RuntimeError::Range(_)));
    }

    #[test]
    fn recursion_under_the_depth_limit_completes() {
        // Must finish on a default-sized test-thread stack; the limit exists
        // so the interpreter errors out long before the Rust stack would.
        let script =
            "function down(n) { if (n === 0) { return 0; } return down(n - 1) + 1; }\nreturn down(50);";
        assert!(run(script).strict_eq(&Value::Number(50.0)));
    }

    #[test]
    fn depth_limit_is_a_catchable_range_error() {
        let script =
            "try { function f() { return f(); } return f(); } catch (e) { return e.name }";
        assert!(run(script).strict_eq(&Value::string("RangeError")));
    }
}
