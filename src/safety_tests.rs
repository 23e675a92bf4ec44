//! Safety Gate Tests for the Script Security Policy
//!
//! These tests verify the validation invariants that must hold before any
//! script is compiled or executed:
//! - forbidden globals, calls, properties and dynamic import are rejected
//! - local shadowing is never misreported
//! - violations accumulate instead of short-circuiting

#[cfg(test)]
mod tests {
    use crate::analyzer::{validate, validation_failure};
    use crate::policy::ViolationKind;

    fn kinds(script: &str) -> Vec<ViolationKind> {
        validate(script).errors.iter().map(|e| e.kind).collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CLEAN SCRIPTS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn clean_script_validates() {
        let result = validate("const name = data.name;\nreturn name || 'Guest';");
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn capability_calls_are_accepted() {
        let result = validate("SetVar('count', GetVar('count') + 1);\nShowToast('saved');");
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn top_level_return_and_await_are_legal() {
        assert!(validate("return await InvokeFunction('sum', [1, 2])").valid);
    }

    #[test]
    fn unknown_identifiers_are_permitted() {
        // Neither forbidden, capability, nor safe builtin. The permissive
        // middle ground resolves at runtime, not validation time.
        assert!(validate("return somethingTheHostMayProvide").valid);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FORBIDDEN GLOBALS AND CALLS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn eval_is_rejected_with_exactly_one_error() {
        let result = validate("eval('1 + 1')");
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
        assert_eq!(result.errors[0].kind, ViolationKind::ForbiddenCall);
        assert_eq!(result.errors[0].offending_identifier.as_deref(), Some("eval"));
    }

    #[test]
    fn new_function_is_rejected_once() {
        let result = validate("const f = new Function('return 1');");
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
        assert_eq!(result.errors[0].kind, ViolationKind::ForbiddenCall);
    }

    #[test]
    fn global_object_aliases_are_rejected() {
        for name in ["window", "globalThis", "document", "process"] {
            let result = validate(&format!("return {}.title", name));
            assert!(!result.valid, "{} slipped through", name);
            assert_eq!(result.errors[0].kind, ViolationKind::ForbiddenGlobal);
        }
    }

    #[test]
    fn network_and_storage_primitives_are_rejected() {
        assert_eq!(kinds("fetch('/api')"), vec![ViolationKind::ForbiddenGlobal]);
        assert_eq!(
            kinds("localStorage.setItem('k', 'v')"),
            vec![ViolationKind::ForbiddenGlobal]
        );
    }

    #[test]
    fn set_timeout_with_string_payload_is_indirect_eval() {
        let result = validate("setTimeout('doEvil()', 100)");
        assert!(!result.valid);
        assert_eq!(result.errors[0].kind, ViolationKind::ForbiddenCall);
        assert_eq!(
            result.errors[0].offending_identifier.as_deref(),
            Some("setTimeout")
        );
    }

    #[test]
    fn set_timeout_with_function_payload_is_fine() {
        assert!(validate("setTimeout(() => ShowToast('hi'), 100)").valid);
    }

    #[test]
    fn dynamic_import_is_rejected() {
        assert_eq!(
            kinds("import('fs').then(m => m)"),
            vec![ViolationKind::ForbiddenDynamicImport]
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FORBIDDEN PROPERTIES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn proto_access_is_rejected_dot_and_bracket() {
        assert_eq!(
            kinds("data.__proto__.x = 1"),
            vec![ViolationKind::ForbiddenProperty]
        );
        assert_eq!(
            kinds("data['__proto__'].x = 1"),
            vec![ViolationKind::ForbiddenProperty]
        );
    }

    #[test]
    fn constructor_and_prototype_are_rejected() {
        assert!(!validate("return data.constructor").valid);
        assert!(!validate("return data['prototype']").valid);
    }

    #[test]
    fn computed_access_with_dynamic_key_is_not_flagged() {
        // A dynamic key cannot be classified statically; the runtime's
        // member model has no prototype chain to pollute.
        assert!(validate("const k = 'name'; return data[k]").valid);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SHADOWING
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn local_shadowing_of_capability_names_is_accepted() {
        let result = validate("const GetVar = (k) => k;\nreturn GetVar('x');");
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn locally_declared_fetch_is_the_scripts_own() {
        let result = validate("const fetch = (u) => u;\nreturn fetch('/x');");
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn function_parameters_shadow() {
        assert!(validate("function f(window) { return window; }\nreturn f(1);").valid);
    }

    #[test]
    fn catch_parameters_shadow() {
        assert!(validate("try { ShowToast('x') } catch (process) { return process }").valid);
    }

    #[test]
    fn parameter_shadowing_does_not_leak_out_of_its_function() {
        // `window` is only a binding inside `f`; the top-level reference must
        // still hit the forbidden-global table.
        let result = validate("function f(window) { return 1; }\nreturn window.title;");
        assert!(!result.valid, "nested binding leaked into the outer scope");
        assert_eq!(result.errors[0].kind, ViolationKind::ForbiddenGlobal);
        assert_eq!(result.errors[0].line, 2);
    }

    #[test]
    fn arrow_parameters_do_not_leak_either() {
        let result = validate("const f = (fetch) => fetch;\nfetch('/x');");
        assert!(!result.valid, "{:?}", result.errors);
        assert_eq!(result.errors[0].kind, ViolationKind::ForbiddenGlobal);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // ACCUMULATION AND POSITIONS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn violations_accumulate() {
        let result = validate("window.open('/');\nfetch('/api');\neval('1');");
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3, "{:?}", result.errors);
        let lines: Vec<u32> = result.errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn text_that_closes_the_wrapper_is_rejected() {
        // Parses as a two-statement program: the closed wrapper plus a second
        // function carrying the smuggled eval. Not wrapper-shaped, so it must
        // reject rather than validate only the first (empty) body.
        let result = validate("1});(async function () {eval('x')");
        assert!(!result.valid, "wrapper escape validated clean");
        assert_eq!(result.errors[0].kind, ViolationKind::Syntax);
    }

    #[test]
    fn syntax_errors_report_script_positions() {
        let result = validate("const a = 1;\nreturn ===;");
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ViolationKind::Syntax);
        assert_eq!(result.errors[0].line, 2);
    }

    #[test]
    fn error_positions_are_one_based_script_coordinates() {
        let result = validate("const ok = 1;\nreturn window;");
        assert_eq!(result.errors[0].line, 2);
        assert_eq!(result.errors[0].column, 8);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SAVE-PATH FAILURE EVENT
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn validation_failure_event_for_rejected_script() {
        let result = validate("eval('1')");
        let failure = validation_failure("comp-42", &result).expect("rejected script");
        assert_eq!(failure.component_id, "comp-42");
        assert_eq!(failure.errors.len(), 1);
        assert!(failure.message.contains("comp-42"));
        assert!(failure.message.contains("line 1"));
    }

    #[test]
    fn no_failure_event_for_valid_script() {
        let result = validate("return 1");
        assert!(validation_failure("comp-42", &result).is_none());
    }

    #[test]
    fn errors_serialize_camel_case() {
        let result = validate("return data.__proto__");
        let json = serde_json::to_value(&result.errors[0]).expect("serializable");
        assert_eq!(json["kind"], "forbidden-property");
        assert!(json.get("offendingIdentifier").is_some());
    }
}
