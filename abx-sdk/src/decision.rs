//! The decision engine.
//!
//! Pure functions over one experiment and one user; the client calls them
//! under the cache's shared lock. Anything that cannot be evaluated
//! (missing attribute, type mismatch, unknown operator, bad version
//! string) makes the rule false, so malformed targeting can only shrink
//! an audience, never widen it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use semver::Version;
use tracing::warn;
use xxhash_rust::xxh64::xxh64;

use abx_types::{AttrValue, Experiment, Operator, TargetingRule, BUCKET_COUNT};

/// The deterministic bucket for a user in an experiment.
///
/// Same `(user_id, salt)` always produces the same bucket; per-experiment
/// salts keep rebucketing independent across experiments.
#[must_use]
pub fn bucket_for(user_id: &str, salt: &str) -> u64 {
    let mut key = Vec::with_capacity(user_id.len() + salt.len());
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(salt.as_bytes());
    xxh64(&key, 0) % BUCKET_COUNT
}

/// Evaluate one experiment for one user at `now`.
///
/// Returns the variant name on assignment. The order of checks is fixed:
/// active gate, force-exclude, force-include, targeting rules, bucketing.
#[must_use]
pub fn evaluate_experiment(
    exp: &Experiment,
    user_id: &str,
    attributes: &HashMap<String, AttrValue>,
    now: DateTime<Utc>,
) -> Option<String> {
    if !exp.is_active_at(now) {
        return None;
    }

    if exp.override_lists.force_exclude.contains(user_id) {
        return None;
    }

    if let Some(variant) = exp.override_lists.forced_variant(user_id) {
        return Some(variant.to_string());
    }

    if !matches_all_rules(&exp.targeting_rules, attributes) {
        return None;
    }

    let bucket = bucket_for(user_id, &exp.salt);
    exp.variants
        .iter()
        .find(|v| v.contains(bucket))
        .map(|v| v.name.clone())
}

fn matches_all_rules(
    rules: &[TargetingRule],
    attributes: &HashMap<String, AttrValue>,
) -> bool {
    rules.iter().all(|rule| evaluate_rule(rule, attributes))
}

/// Evaluate one targeting rule against the user's attributes.
#[must_use]
pub fn evaluate_rule(rule: &TargetingRule, attributes: &HashMap<String, AttrValue>) -> bool {
    let Some(user_value) = attributes.get(&rule.attribute) else {
        return false;
    };

    match &rule.operator {
        Operator::Equals => user_value.display() == rule.value.display(),
        Operator::NotEquals => user_value.display() != rule.value.display(),

        Operator::Contains => user_value.display().contains(&rule.value.display()),
        Operator::NotContains => !user_value.display().contains(&rule.value.display()),

        Operator::GreaterThan => compare_numeric(user_value, &rule.value, |a, b| a > b),
        Operator::LessThan => compare_numeric(user_value, &rule.value, |a, b| a < b),
        Operator::GreaterThanOrEqual => compare_numeric(user_value, &rule.value, |a, b| a >= b),
        Operator::LessThanOrEqual => compare_numeric(user_value, &rule.value, |a, b| a <= b),

        Operator::VersionGreaterThan => compare_versions(user_value, &rule.value, |a, b| a > b),
        Operator::VersionLessThan => compare_versions(user_value, &rule.value, |a, b| a < b),
        Operator::VersionEquals => compare_versions(user_value, &rule.value, |a, b| a == b),

        Operator::InList => in_list(user_value, &rule.value),
        Operator::NotInList => match rule.value.as_str_list() {
            Some(_) => !in_list(user_value, &rule.value),
            None => false,
        },

        Operator::Other(name) => {
            warn!(operator = %name, attribute = %rule.attribute, "unknown targeting operator");
            false
        }
    }
}

fn compare_numeric(user: &AttrValue, rule: &AttrValue, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (user.as_f64(), rule.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn compare_versions(
    user: &AttrValue,
    rule: &AttrValue,
    cmp: impl Fn(&Version, &Version) -> bool,
) -> bool {
    let (Some(user_str), Some(rule_str)) = (user.as_str(), rule.as_str()) else {
        return false;
    };
    match (Version::parse(user_str), Version::parse(rule_str)) {
        (Ok(user_version), Ok(rule_version)) => cmp(&user_version, &rule_version),
        _ => false,
    }
}

fn in_list(user: &AttrValue, rule: &AttrValue) -> bool {
    let Some(list) = rule.as_str_list() else {
        return false;
    };
    let user_str = user.display();
    list.iter().any(|item| *item == user_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use abx_types::{ConfigVersion, ExperimentStatus, OverrideLists, Variant};
    use chrono::TimeZone;

    fn experiment(salt: &str) -> Experiment {
        Experiment {
            id: "exp-1".to_string(),
            layer_id: "l1".to_string(),
            config_version: ConfigVersion::generate(),
            end_time: None,
            salt: salt.to_string(),
            status: ExperimentStatus::Active,
            targeting_rules: Vec::new(),
            override_lists: OverrideLists::default(),
            variants: vec![
                Variant {
                    name: "A".to_string(),
                    bucket_range: [0, 499],
                },
                Variant {
                    name: "B".to_string(),
                    bucket_range: [500, 999],
                },
            ],
        }
    }

    fn attrs(pairs: &[(&str, AttrValue)]) -> HashMap<String, AttrValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn rule(attribute: &str, operator: Operator, value: AttrValue) -> TargetingRule {
        TargetingRule {
            attribute: attribute.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn bucketing_is_deterministic() {
        let b1 = bucket_for("u1", "s");
        let b2 = bucket_for("u1", "s");
        assert_eq!(b1, b2);
        assert!(b1 < BUCKET_COUNT);
    }

    #[test]
    fn assignment_matches_computed_bucket() {
        // Scenario: two variants splitting the whole space; the variant
        // returned must be the one whose range holds xxh64("u1s") % 1000.
        let exp = experiment("s");
        let bucket = bucket_for("u1", "s");
        let expected = if bucket <= 499 { "A" } else { "B" };

        let first = evaluate_experiment(&exp, "u1", &HashMap::new(), Utc::now());
        let second = evaluate_experiment(&exp, "u1", &HashMap::new(), Utc::now());
        assert_eq!(first.as_deref(), Some(expected));
        assert_eq!(first, second);
    }

    #[test]
    fn bucket_gap_means_no_assignment() {
        let mut exp = experiment("s");
        let bucket = bucket_for("u1", &exp.salt);
        // Carve the user's bucket out of both ranges.
        exp.variants = vec![Variant {
            name: "narrow".to_string(),
            bucket_range: if bucket == 0 { [1, 1] } else { [0, 0] },
        }];
        assert_eq!(
            evaluate_experiment(&exp, "u1", &HashMap::new(), Utc::now()),
            None
        );
    }

    #[test]
    fn expired_experiment_never_assigns() {
        let mut exp = experiment("s");
        exp.end_time = Some(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(
            evaluate_experiment(&exp, "u1", &HashMap::new(), Utc::now()),
            None
        );
    }

    #[test]
    fn non_active_status_never_assigns() {
        for status in [
            ExperimentStatus::Draft,
            ExperimentStatus::Paused,
            ExperimentStatus::Finished,
        ] {
            let mut exp = experiment("s");
            exp.status = status;
            assert_eq!(
                evaluate_experiment(&exp, "u1", &HashMap::new(), Utc::now()),
                None
            );
        }
    }

    #[test]
    fn force_exclude_is_absolute() {
        let mut exp = experiment("s");
        exp.override_lists.force_exclude.insert("u1".to_string());
        // u1 would otherwise bucket into a variant; exclusion wins.
        assert_eq!(
            evaluate_experiment(&exp, "u1", &HashMap::new(), Utc::now()),
            None
        );
        // Other users are unaffected.
        assert!(evaluate_experiment(&exp, "u2", &HashMap::new(), Utc::now()).is_some());
    }

    #[test]
    fn force_include_skips_targeting_and_bucketing() {
        let mut exp = experiment("s");
        // A rule nobody passes.
        exp.targeting_rules = vec![rule("country", Operator::Equals, AttrValue::from("nowhere"))];
        exp.override_lists
            .force_include
            .entry("B".to_string())
            .or_default()
            .insert("u1".to_string());

        assert_eq!(
            evaluate_experiment(&exp, "u1", &HashMap::new(), Utc::now()).as_deref(),
            Some("B")
        );
        assert_eq!(
            evaluate_experiment(&exp, "u2", &HashMap::new(), Utc::now()),
            None
        );
    }

    #[test]
    fn force_exclude_beats_force_include() {
        let mut exp = experiment("s");
        exp.override_lists.force_exclude.insert("u1".to_string());
        exp.override_lists
            .force_include
            .entry("A".to_string())
            .or_default()
            .insert("u1".to_string());
        assert_eq!(
            evaluate_experiment(&exp, "u1", &HashMap::new(), Utc::now()),
            None
        );
    }

    #[test]
    fn all_rules_must_match() {
        let mut exp = experiment("s");
        exp.targeting_rules = vec![
            rule("country", Operator::Equals, AttrValue::from("ru")),
            rule("platform", Operator::Equals, AttrValue::from("ios")),
        ];

        let both = attrs(&[
            ("country", AttrValue::from("ru")),
            ("platform", AttrValue::from("ios")),
        ]);
        assert!(evaluate_experiment(&exp, "u1", &both, Utc::now()).is_some());

        let one = attrs(&[("country", AttrValue::from("ru"))]);
        assert_eq!(evaluate_experiment(&exp, "u1", &one, Utc::now()), None);
    }

    #[test]
    fn missing_attribute_fails_the_rule() {
        let r = rule("country", Operator::Equals, AttrValue::from("ru"));
        assert!(!evaluate_rule(&r, &HashMap::new()));
    }

    #[test]
    fn equals_compares_printable_forms() {
        let r = rule("build", Operator::Equals, AttrValue::Number(42.0));
        assert!(evaluate_rule(&r, &attrs(&[("build", AttrValue::from("42"))])));
        assert!(evaluate_rule(&r, &attrs(&[("build", AttrValue::Number(42.0))])));
        assert!(!evaluate_rule(&r, &attrs(&[("build", AttrValue::from("43"))])));

        let r = rule("build", Operator::NotEquals, AttrValue::Number(42.0));
        assert!(evaluate_rule(&r, &attrs(&[("build", AttrValue::from("43"))])));
    }

    #[test]
    fn numeric_operators_coerce_and_fail_closed() {
        let r = rule("age", Operator::GreaterThan, AttrValue::Number(18.0));
        assert!(evaluate_rule(&r, &attrs(&[("age", AttrValue::Number(19.0))])));
        assert!(evaluate_rule(&r, &attrs(&[("age", AttrValue::from("19"))])));
        assert!(!evaluate_rule(&r, &attrs(&[("age", AttrValue::Number(18.0))])));
        assert!(!evaluate_rule(&r, &attrs(&[("age", AttrValue::from("teen"))])));
        assert!(!evaluate_rule(&r, &attrs(&[("age", AttrValue::Bool(true))])));

        let r = rule("age", Operator::GreaterThanOrEqual, AttrValue::Number(18.0));
        assert!(evaluate_rule(&r, &attrs(&[("age", AttrValue::Number(18.0))])));

        let r = rule("age", Operator::LessThanOrEqual, AttrValue::Number(18.0));
        assert!(evaluate_rule(&r, &attrs(&[("age", AttrValue::Number(18.0))])));
        assert!(!evaluate_rule(&r, &attrs(&[("age", AttrValue::Number(18.5))])));

        let r = rule("age", Operator::LessThan, AttrValue::from("not-a-number"));
        assert!(!evaluate_rule(&r, &attrs(&[("age", AttrValue::Number(1.0))])));
    }

    #[test]
    fn version_operators() {
        // Scenario from the acceptance list: boundary at 1.2.3.
        let r = rule(
            "app_version",
            Operator::VersionGreaterThan,
            AttrValue::from("1.2.3"),
        );
        assert!(evaluate_rule(
            &r,
            &attrs(&[("app_version", AttrValue::from("1.2.4"))])
        ));
        assert!(!evaluate_rule(
            &r,
            &attrs(&[("app_version", AttrValue::from("1.2.2"))])
        ));
        assert!(!evaluate_rule(
            &r,
            &attrs(&[("app_version", AttrValue::from("not-a-version"))])
        ));

        let r = rule(
            "app_version",
            Operator::VersionLessThan,
            AttrValue::from("2.0.0"),
        );
        assert!(evaluate_rule(
            &r,
            &attrs(&[("app_version", AttrValue::from("1.9.9"))])
        ));

        let r = rule(
            "app_version",
            Operator::VersionEquals,
            AttrValue::from("1.2.3"),
        );
        assert!(evaluate_rule(
            &r,
            &attrs(&[("app_version", AttrValue::from("1.2.3"))])
        ));
        assert!(!evaluate_rule(
            &r,
            &attrs(&[("app_version", AttrValue::from("1.2.4"))])
        ));
    }

    #[test]
    fn list_operators() {
        let list = AttrValue::StringList(vec!["ru".to_string(), "kz".to_string()]);

        let r = rule("country", Operator::InList, list.clone());
        assert!(evaluate_rule(&r, &attrs(&[("country", AttrValue::from("ru"))])));
        assert!(!evaluate_rule(&r, &attrs(&[("country", AttrValue::from("us"))])));

        let r = rule("country", Operator::NotInList, list);
        assert!(evaluate_rule(&r, &attrs(&[("country", AttrValue::from("us"))])));
        assert!(!evaluate_rule(&r, &attrs(&[("country", AttrValue::from("ru"))])));

        // A non-list rule value fails closed for both.
        let r = rule("country", Operator::InList, AttrValue::from("ru"));
        assert!(!evaluate_rule(&r, &attrs(&[("country", AttrValue::from("ru"))])));
        let r = rule("country", Operator::NotInList, AttrValue::from("ru"));
        assert!(!evaluate_rule(&r, &attrs(&[("country", AttrValue::from("us"))])));
    }

    #[test]
    fn contains_operators() {
        let r = rule("ua", Operator::Contains, AttrValue::from("Mobile"));
        assert!(evaluate_rule(
            &r,
            &attrs(&[("ua", AttrValue::from("Safari Mobile 17"))])
        ));
        assert!(!evaluate_rule(&r, &attrs(&[("ua", AttrValue::from("Desktop"))])));

        let r = rule("ua", Operator::NotContains, AttrValue::from("Mobile"));
        assert!(evaluate_rule(&r, &attrs(&[("ua", AttrValue::from("Desktop"))])));
    }

    #[test]
    fn unknown_operator_fails_closed() {
        let r = rule(
            "country",
            Operator::Other("REGEX_MATCH".to_string()),
            AttrValue::from(".*"),
        );
        assert!(!evaluate_rule(&r, &attrs(&[("country", AttrValue::from("ru"))])));
    }
}
