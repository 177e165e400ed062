//! Built-in clinical rules used to seed an empty rule store.

use super::RuleSpec;

/// Left ventricular ejection fraction, English or Chinese label.
pub const LVEF_PATTERN: &str =
    r"(?i)(?:LVEF[:=]?\s*([0-9]{1,3}\s*%?))|(?:射血分数[:：]?\s*([0-9]{1,3}\s*%?))";

/// Left ventricular systolic function, descriptive state.
pub const LV_SYSTOLIC_FUNCTION_PATTERN: &str = r"(?:左室收缩功能(?:\s*[:：]?\s*)(降低|减弱|正常|减低了|减低|差|下降))|(?:收缩力(?:\s*[:：]?\s*)(降低|减弱|正常|下降|差))";

/// Rules the store is seeded with when no configuration overrides them.
pub fn default_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new("LVEF", LVEF_PATTERN).with_keywords(["LVEF", "射血分数", "左室射血分数"]),
        RuleSpec::new("左室收缩功能", LV_SYSTOLIC_FUNCTION_PATTERN).with_keywords([
            "左室收缩功能",
            "收缩功能",
            "左室收缩力",
            "心室肌收缩力",
        ]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;

    #[test]
    fn test_default_rules_compile() {
        for spec in default_rules() {
            let rule = Rule::compile(spec);
            assert!(rule.is_enabled(), "{} should compile", rule.name());
        }
    }

    #[test]
    fn test_lvef_pattern_matches_both_labels() {
        let rule = Rule::compile(default_rules().remove(0));
        let regex = rule.regex().unwrap();

        assert!(regex.is_match("lvef: 45%"));
        assert!(regex.is_match("射血分数：38%"));
        assert!(!regex.is_match("心功能正常"));
    }
}
