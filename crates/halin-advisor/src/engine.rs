//! Rule engine: a fixed, ordered battery of categorized rules.
//!
//! Rules are plain data (`{name, predicate, evaluate}`) grouped under a
//! [`Category`]. The engine walks the groups in order, skips rules whose
//! predicate declines the snapshot, and tags each finding with its group's
//! category as it is collected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::advice::{Advice, Category, OVERALL};
use crate::error::{AdviceError, AdvisorError};
use crate::rules;
use crate::snapshot::{DiagnosticSnapshot, NodeDiagnostic};

/// Decides whether a rule applies to a snapshot.
pub type Predicate = fn(&DiagnosticSnapshot) -> bool;

/// Produces zero or more findings for a snapshot.
pub type Evaluate = fn(&DiagnosticSnapshot, &AdvisorConfig) -> Result<Vec<Advice>, AdviceError>;

/// Tunables shared by every rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Transaction lag at or above which a member is reported as an error.
    pub tx_lag_error_threshold: i64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            tx_lag_error_threshold: 20,
        }
    }
}

/// One rule.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Stable name used in logs and errors.
    pub name: &'static str,
    /// Whether the rule runs for a given snapshot.
    pub predicate: Predicate,
    /// The rule body.
    pub evaluate: Evaluate,
}

impl Rule {
    /// A rule that runs for every snapshot.
    pub fn always(name: &'static str, evaluate: Evaluate) -> Self {
        Self {
            name,
            predicate: always,
            evaluate,
        }
    }

    /// A rule gated by `predicate`.
    pub fn when(name: &'static str, predicate: Predicate, evaluate: Evaluate) -> Self {
        Self {
            name,
            predicate,
            evaluate,
        }
    }
}

/// Rules sharing a category.
#[derive(Debug, Clone)]
pub struct RuleGroup {
    /// Category stamped on every finding from this group.
    pub category: Category,
    /// Rules in evaluation order.
    pub rules: Vec<Rule>,
}

/// Predicate accepting every snapshot.
pub fn always(_: &DiagnosticSnapshot) -> bool {
    true
}

/// Predicate accepting only multi-member clusters.
pub fn cluster_only(snapshot: &DiagnosticSnapshot) -> bool {
    snapshot.is_cluster()
}

/// Predicate accepting only enterprise deployments.
pub fn enterprise_only(snapshot: &DiagnosticSnapshot) -> bool {
    snapshot.is_enterprise()
}

/// Runs `generate` once per distinct situation for a per-member value.
///
/// When every member reports the same value the generator runs exactly once
/// with [`OVERALL`] as the address and the first member as context.
/// Otherwise it runs once per member with that member's address and value.
/// Findings without a database are stamped with the member's (or the
/// deployment's) database.
pub fn for_member_value<X, F>(
    snapshot: &DiagnosticSnapshot,
    extract: X,
    mut generate: F,
) -> Result<Vec<Advice>, AdviceError>
where
    X: Fn(&NodeDiagnostic) -> Option<Value>,
    F: FnMut(&str, Option<&Value>, &NodeDiagnostic) -> Result<Advice, AdviceError>,
{
    let Some(first) = snapshot.nodes.first() else {
        return Ok(Vec::new());
    };

    let values: Vec<Option<Value>> = snapshot.nodes.iter().map(&extract).collect();
    let unanimous = values.iter().all(|v| v == &values[0]);

    if unanimous {
        let advice = generate(OVERALL, values[0].as_ref(), first)?;
        return Ok(vec![stamp_database(advice, snapshot.database())]);
    }

    snapshot
        .nodes
        .iter()
        .zip(values.iter())
        .map(|(node, value)| {
            let advice = generate(node.addr(), value.as_ref(), node)?;
            Ok(stamp_database(advice, Some(node.basics.database.as_str())))
        })
        .collect()
}

/// [`for_member_value`] over the configuration option `key`.
pub fn for_config_option<F>(
    snapshot: &DiagnosticSnapshot,
    key: &str,
    generate: F,
) -> Result<Vec<Advice>, AdviceError>
where
    F: FnMut(&str, Option<&Value>, &NodeDiagnostic) -> Result<Advice, AdviceError>,
{
    for_member_value(snapshot, |node| node.config(key).cloned(), generate)
}

fn stamp_database(advice: Advice, database: Option<&str>) -> Advice {
    if advice.database.is_some() {
        advice
    } else {
        advice.with_database(database)
    }
}

/// The rule engine.
#[derive(Debug, Clone)]
pub struct Advisor {
    groups: Vec<RuleGroup>,
    config: AdvisorConfig,
}

impl Advisor {
    /// The standard battery.
    pub fn new(config: AdvisorConfig) -> Self {
        Self::with_groups(rules::default_groups(), config)
    }

    /// A custom battery.
    pub fn with_groups(groups: Vec<RuleGroup>, config: AdvisorConfig) -> Self {
        Self { groups, config }
    }

    /// Number of rules across every group.
    pub fn rule_count(&self) -> usize {
        self.groups.iter().map(|g| g.rules.len()).sum()
    }

    /// Evaluates every applicable rule, in group order.
    pub fn generate_recommendations(
        &self,
        snapshot: &DiagnosticSnapshot,
    ) -> Result<Vec<Advice>, AdvisorError> {
        let mut findings = Vec::new();
        for group in &self.groups {
            for rule in &group.rules {
                if !(rule.predicate)(snapshot) {
                    debug!(rule = rule.name, "rule does not apply to snapshot");
                    continue;
                }
                let produced = (rule.evaluate)(snapshot, &self.config).map_err(|source| {
                    AdvisorError::Rule {
                        rule: rule.name,
                        source,
                    }
                })?;
                findings.extend(produced.into_iter().map(|a| a.with_category(group.category)));
            }
        }
        debug!(count = findings.len(), "advisor finished");
        Ok(findings)
    }

    /// Validates an exported snapshot and evaluates it.
    ///
    /// Rejects input that is not an object or lacks the `halin` block.
    pub fn recommendations_from_json(&self, value: &Value) -> Result<Vec<Advice>, AdvisorError> {
        let object = value.as_object().ok_or(AdvisorError::NotAnObject)?;
        if !object.contains_key("halin") {
            return Err(AdvisorError::MissingHalin);
        }
        let snapshot = DiagnosticSnapshot::deserialize(value)?;
        self.generate_recommendations(&snapshot)
    }
}

impl Default for Advisor {
    fn default() -> Self {
        Self::new(AdvisorConfig::default())
    }
}

/// Evaluates the standard battery with default tunables.
pub fn generate_recommendations(
    snapshot: &DiagnosticSnapshot,
) -> Result<Vec<Advice>, AdvisorError> {
    Advisor::default().generate_recommendations(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::Level;
    use crate::snapshot::{Basics, ClusterRole};
    use serde_json::json;

    fn node(addr: &str, role: ClusterRole, config: &[(&str, Value)]) -> NodeDiagnostic {
        let mut basics = Basics::new(addr);
        basics.role = role;
        basics.database = "neo4j".to_string();
        let mut node = NodeDiagnostic::empty(basics);
        for (k, v) in config {
            node.configuration.insert(k.to_string(), v.clone());
        }
        node
    }

    fn snapshot(nodes: Vec<NodeDiagnostic>) -> DiagnosticSnapshot {
        DiagnosticSnapshot::new("test", nodes)
    }

    #[test]
    fn test_unanimous_option_generates_once_with_overall() {
        let snap = snapshot(vec![
            node("a", ClusterRole::Leader, &[("k", json!("1"))]),
            node("b", ClusterRole::Follower, &[("k", json!("1"))]),
            node("c", ClusterRole::Follower, &[("k", json!("1"))]),
        ]);
        let mut calls = Vec::new();
        let out = for_config_option(&snap, "k", |addr, value, _| {
            calls.push((addr.to_string(), value.cloned()));
            Advice::pass(addr, "ok")
        })
        .unwrap();
        assert_eq!(calls, vec![(OVERALL.to_string(), Some(json!("1")))]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].database.as_deref(), Some("neo4j"));
    }

    #[test]
    fn test_disagreeing_option_generates_per_member() {
        let snap = snapshot(vec![
            node("a", ClusterRole::Leader, &[("k", json!("1"))]),
            node("b", ClusterRole::Follower, &[("k", json!("2"))]),
            node("c", ClusterRole::Follower, &[]),
        ]);
        let mut calls = Vec::new();
        for_config_option(&snap, "k", |addr, value, member| {
            assert_eq!(addr, member.addr());
            calls.push((addr.to_string(), value.cloned()));
            Advice::info(addr, "seen")
        })
        .unwrap();
        assert_eq!(
            calls,
            vec![
                ("a".to_string(), Some(json!("1"))),
                ("b".to_string(), Some(json!("2"))),
                ("c".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_empty_snapshot_produces_nothing() {
        let out = for_config_option(&snapshot(vec![]), "k", |addr, _, _| Advice::pass(addr, "x"))
            .unwrap();
        assert!(out.is_empty());
    }

    fn one_pass(s: &DiagnosticSnapshot, _: &AdvisorConfig) -> Result<Vec<Advice>, AdviceError> {
        Ok(vec![Advice::pass(s.nodes[0].addr(), "fine")?])
    }

    fn declines(_: &DiagnosticSnapshot, _: &AdvisorConfig) -> Result<Vec<Advice>, AdviceError> {
        Ok(Vec::new())
    }

    fn broken(_: &DiagnosticSnapshot, _: &AdvisorConfig) -> Result<Vec<Advice>, AdviceError> {
        Ok(vec![Advice::warn("a", "f", "")?])
    }

    #[test]
    fn test_findings_are_tagged_and_flattened_in_group_order() {
        let advisor = Advisor::with_groups(
            vec![
                RuleGroup {
                    category: Category::Memory,
                    rules: vec![Rule::always("one", one_pass), Rule::always("none", declines)],
                },
                RuleGroup {
                    category: Category::Schema,
                    rules: vec![Rule::always("two", one_pass)],
                },
            ],
            AdvisorConfig::default(),
        );
        let snap = snapshot(vec![node("a", ClusterRole::Standalone, &[])]);
        let out = advisor.generate_recommendations(&snap).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].category, Some(Category::Memory));
        assert_eq!(out[1].category, Some(Category::Schema));
        assert_eq!(advisor.rule_count(), 3);
    }

    #[test]
    fn test_predicates_gate_rules() {
        let advisor = Advisor::with_groups(
            vec![RuleGroup {
                category: Category::Cluster,
                rules: vec![
                    Rule::when("cluster", cluster_only, one_pass),
                    Rule::when("enterprise", enterprise_only, one_pass),
                ],
            }],
            AdvisorConfig::default(),
        );
        let snap = snapshot(vec![node("a", ClusterRole::Standalone, &[])]);
        assert!(advisor.generate_recommendations(&snap).unwrap().is_empty());

        let mut clustered = snapshot(vec![
            node("a", ClusterRole::Leader, &[]),
            node("b", ClusterRole::Follower, &[]),
        ]);
        assert_eq!(advisor.generate_recommendations(&clustered).unwrap().len(), 1);

        clustered.nodes[0].basics.dbms.edition = "enterprise".to_string();
        assert_eq!(advisor.generate_recommendations(&clustered).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_advice_from_a_rule_is_an_error() {
        let advisor = Advisor::with_groups(
            vec![RuleGroup {
                category: Category::Cluster,
                rules: vec![Rule::always("broken", broken)],
            }],
            AdvisorConfig::default(),
        );
        let snap = snapshot(vec![node("a", ClusterRole::Standalone, &[])]);
        match advisor.generate_recommendations(&snap) {
            Err(AdvisorError::Rule { rule, source }) => {
                assert_eq!(rule, "broken");
                assert_eq!(source, AdviceError::MissingAdvice { level: Level::Warn });
            }
            other => panic!("expected rule error, got {:?}", other),
        }
    }

    #[test]
    fn test_json_input_must_be_an_object_with_halin() {
        let advisor = Advisor::default();
        assert!(matches!(
            advisor.recommendations_from_json(&json!([1, 2])),
            Err(AdvisorError::NotAnObject)
        ));
        assert!(matches!(
            advisor.recommendations_from_json(&json!({ "nodes": [] })),
            Err(AdvisorError::MissingHalin)
        ));
        assert!(matches!(
            advisor.recommendations_from_json(&json!({ "halin": {}, "nodes": 3 })),
            Err(AdvisorError::Malformed(_))
        ));
    }

    #[test]
    fn test_exported_snapshot_round_trips_through_json() {
        let snap = snapshot(vec![node("a", ClusterRole::Standalone, &[])]);
        let value = serde_json::to_value(&snap).unwrap();
        let from_json = Advisor::default().recommendations_from_json(&value).unwrap();
        let direct = generate_recommendations(&snap).unwrap();
        assert_eq!(from_json, direct);
    }
}
