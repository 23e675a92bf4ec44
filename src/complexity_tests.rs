//! Complexity Analyzer Tests
//!
//! The complexity gate is advisory everywhere except server-side rendering;
//! these tests pin the thresholds, the recursion heuristic and the fail-open
//! behavior on malformed scripts.

#[cfg(test)]
mod tests {
    use crate::complexity::{
        analyze, is_safe_for_server_render, warnings_for, MAX_LOOP_COUNT, MAX_NESTING_DEPTH,
        MAX_NODE_COUNT,
    };

    /// `n` nested `if` blocks. Each level contributes the if statement plus
    /// its block, so the measured depth is `2 * n`.
    fn nested_ifs(n: usize) -> String {
        let mut script = String::new();
        for _ in 0..n {
            script.push_str("if (data.x) {");
        }
        script.push_str("ShowToast('deep');");
        for _ in 0..n {
            script.push('}');
        }
        script
    }

    fn many_statements(n: usize) -> String {
        (0..n)
            .map(|i| format!("let v{} = {};\n", i, i))
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LOOPS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn infinite_loop_is_one_loop_under_limits() {
        let result = analyze("while (true) {}");
        assert!(result.has_loop);
        assert_eq!(result.loop_count, 1);
        assert!(!result.exceeds_limits, "{:?}", result.reason);
    }

    #[test]
    fn loop_variants_all_count() {
        let script = "while (a) {}\ndo {} while (a);\nfor (let i = 0; i < 1; i++) {}\nfor (const k in data) {}\nfor (const v of values) {}";
        let result = analyze(script);
        assert_eq!(result.loop_count, 5);
        assert!(!result.exceeds_limits);
    }

    #[test]
    fn too_many_loops_exceed() {
        let script = "while(a){}\n".repeat((MAX_LOOP_COUNT + 1) as usize);
        let result = analyze(&script);
        assert!(result.exceeds_limits);
        let reason = result.reason.expect("reason for failure");
        assert!(reason.contains("loop count"), "{}", reason);
    }

    #[test]
    fn loops_block_nothing_but_warn() {
        assert!(is_safe_for_server_render("for (const v of values) { SetVar('v', v); }"));
        let warnings = warnings_for("while (data.busy) {}");
        assert!(warnings.iter().any(|w| w.contains("loop")), "{:?}", warnings);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // NESTING DEPTH
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn deep_nesting_exceeds() {
        let result = analyze(&nested_ifs(8));
        assert!(result.max_depth > MAX_NESTING_DEPTH);
        assert!(result.exceeds_limits);
        assert!(result.reason.expect("reason").contains("nesting depth"));
    }

    #[test]
    fn moderate_nesting_warns_without_exceeding() {
        let result = analyze(&nested_ifs(6));
        assert!(!result.exceeds_limits, "{:?}", result.reason);
        let warnings = warnings_for(&nested_ifs(6));
        assert!(
            warnings.iter().any(|w| w.contains("nested")),
            "{:?}",
            warnings
        );
    }

    #[test]
    fn shallow_script_has_no_warnings() {
        assert!(warnings_for("return data.name").is_empty());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // NODE COUNT
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn small_script_counts_only_its_own_nodes() {
        let result = analyze("return 1");
        assert!(result.node_count > 0);
        // The async-function wrapper must not leak into the count.
        assert!(result.node_count < 10, "counted {}", result.node_count);
    }

    #[test]
    fn huge_script_exceeds_node_count() {
        let result = analyze(&many_statements(400));
        assert!(result.node_count > MAX_NODE_COUNT, "counted {}", result.node_count);
        assert!(result.exceeds_limits);
        assert!(result.reason.expect("reason").contains("node count"));
    }

    #[test]
    fn node_count_verdict_flips_exactly_past_the_limit() {
        // Grow the script until the reported count first crosses the limit;
        // the largest script at or under it must pass, the next must fail.
        let mut n = 1;
        let mut under = analyze(&many_statements(n));
        loop {
            let next = analyze(&many_statements(n + 1));
            if next.node_count > MAX_NODE_COUNT {
                assert!(under.node_count <= MAX_NODE_COUNT);
                assert!(!under.exceeds_limits, "{:?}", under.reason);
                assert!(next.exceeds_limits);
                assert!(next.reason.expect("reason").contains("node count"));
                break;
            }
            n += 1;
            under = next;
        }
    }

    #[test]
    fn near_limit_node_count_warns_without_exceeding() {
        // First script whose count clears 70% of the limit; each statement
        // adds only a handful of nodes, so it lands well under the hard cap.
        let mut n = 1;
        let script = loop {
            let candidate = many_statements(n);
            let count = analyze(&candidate).node_count;
            if f64::from(count) > f64::from(MAX_NODE_COUNT) * 0.7 {
                break candidate;
            }
            n += 1;
        };
        let result = analyze(&script);
        assert!(!result.exceeds_limits, "{:?}", result.reason);
        let warnings = warnings_for(&script);
        assert!(warnings.iter().any(|w| w.contains("large")), "{:?}", warnings);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // RECURSION HEURISTIC
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn self_call_flags_potential_recursion() {
        let result = analyze("function walk(n) { return walk(n - 1); }\nreturn walk(5);");
        assert!(result.potential_recursion);
        assert!(!result.exceeds_limits);
        assert!(!is_safe_for_server_render(
            "function walk(n) { return walk(n - 1); }\nreturn walk(5);"
        ));
    }

    #[test]
    fn mutual_declaration_and_call_flags() {
        // The heuristic is name-based; it does not prove the cycle.
        let result = analyze("function a() { return b(); }\nfunction b() { return a(); }");
        assert!(result.potential_recursion);
    }

    #[test]
    fn plain_function_calls_do_not_flag() {
        let result = analyze("function double(n) { return n * 2; }\nreturn double(21);");
        assert!(!result.potential_recursion);
        assert!(is_safe_for_server_render(
            "function double(n) { return n * 2; }\nreturn double(21);"
        ));
    }

    #[test]
    fn one_function_calling_another_does_not_flag() {
        let script = "function double(n) { return n * 2; }\nfunction quad(n) { return double(double(n)); }\nreturn quad(5);";
        assert!(!analyze(script).potential_recursion);
    }

    #[test]
    fn self_call_through_a_nested_closure_flags() {
        let script = "function retry(n) { return [1].map(() => retry(n - 1))[0]; }\nreturn retry(2);";
        assert!(analyze(script).potential_recursion);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FAIL-OPEN
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn parse_failure_yields_safe_default() {
        let result = analyze("return ===;");
        assert_eq!(result.node_count, 0);
        assert!(!result.exceeds_limits);
        assert!(result.reason.is_none());
    }
}
