//! Topology, writer, version and replication rules.

use std::collections::BTreeSet;

use serde_json::json;

use crate::advice::{Advice, OVERALL};
use crate::engine::{cluster_only, AdvisorConfig, Rule};
use crate::error::AdviceError;
use crate::snapshot::DiagnosticSnapshot;

/// Cluster rules in evaluation order.
pub fn rules() -> Vec<Rule> {
    vec![
        Rule::when("odd-core-count", cluster_only, odd_core_count),
        Rule::always("single-writer", single_writer),
        Rule::always("version-consistency", version_consistency),
        Rule::always("transaction-race", transaction_race),
    ]
}

/// Warns on an even number of core members.
pub fn odd_core_count(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    let cores = snapshot
        .nodes
        .iter()
        .filter(|n| n.basics.role.is_core())
        .count();
    let advice = if cores % 2 == 0 {
        Advice::warn(
            OVERALL,
            format!("The cluster has an even number of core members ({})", cores),
            "Run an odd number of core members; an even count can split votes \
             without adding fault tolerance",
        )?
    } else {
        Advice::pass(
            OVERALL,
            format!("The cluster has an odd number of core members ({})", cores),
        )?
    };
    Ok(vec![advice
        .with_evidence(json!({ "cores": cores }))
        .with_database(snapshot.database())])
}

/// Exactly one member may accept writes.
pub fn single_writer(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    if snapshot.nodes.is_empty() {
        return Ok(Vec::new());
    }
    let writers: Vec<&str> = snapshot
        .nodes
        .iter()
        .filter(|n| n.basics.role.is_writer())
        .map(|n| n.addr())
        .collect();

    let advice = match writers.len() {
        1 => Advice::pass(OVERALL, format!("Exactly one writer: {}", writers[0]))?,
        0 => Advice::error(
            OVERALL,
            "No member currently accepts writes",
            "Check cluster health; the cluster may be without a leader",
        )?,
        n => Advice::error(
            OVERALL,
            format!("{} members claim to accept writes: {}", n, writers.join(", ")),
            "Only one member should be a writer; check for split-brain or mixed clusters",
        )?,
    };
    Ok(vec![advice
        .with_evidence(json!({ "writers": writers }))
        .with_database(snapshot.database())])
}

/// All members must run the same server version.
pub fn version_consistency(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    let versions: BTreeSet<&str> = snapshot
        .nodes
        .iter()
        .filter_map(|n| n.basics.dbms.primary_version())
        .collect();

    let advice = match versions.len() {
        0 => return Ok(Vec::new()),
        1 => Advice::pass(
            OVERALL,
            format!(
                "All members run version {}",
                versions.iter().next().copied().unwrap_or_default()
            ),
        )?,
        _ => {
            let detected: Vec<&str> = versions.iter().copied().collect();
            Advice::error(
                OVERALL,
                format!("Members run different versions: {}", detected.join(", ")),
                "Upgrade every member to the same version",
            )?
            .with_evidence(json!({ "versions": detected }))
        }
    };
    Ok(vec![advice.with_database(snapshot.database())])
}

/// Compares every member's last committed transaction with the writer's.
///
/// Members level with the writer pass, members behind warn (or error once
/// the lag reaches the configured threshold) and members ahead of the
/// writer are errors: that only happens when writer detection is wrong or
/// the member belongs to another cluster.
pub fn transaction_race(
    snapshot: &DiagnosticSnapshot,
    config: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    let Some(writer) = snapshot.writer() else {
        return Ok(Vec::new());
    };
    let database = snapshot.database();

    if snapshot.nodes.len() == 1 {
        return Ok(vec![Advice::pass(
            writer.addr(),
            "Single member deployment; there is no replication to fall behind",
        )?
        .with_database(database)]);
    }

    let Some(writer_tx) = writer.last_tx_id() else {
        return Ok(vec![Advice::info(
            writer.addr(),
            "The writer did not report a last committed transaction id",
        )?
        .with_advice("Make sure JMX is reachable so replication lag can be measured")
        .with_database(database)]);
    };

    let mut findings = Vec::with_capacity(snapshot.nodes.len());
    for node in &snapshot.nodes {
        let Some(tx) = node.last_tx_id() else {
            findings.push(
                Advice::info(node.addr(), "Member did not report a last committed transaction id")?
                    .with_database(database),
            );
            continue;
        };

        let lag = writer_tx - tx;
        let evidence = json!({
            "lastTxId": tx,
            "writerTxId": writer_tx,
            "laggingBy": lag,
        });
        let advice = if lag == 0 {
            Advice::pass(node.addr(), format!("Even with the writer at transaction {}", tx))?
        } else if lag < 0 {
            Advice::error(
                node.addr(),
                format!(
                    "Member is ahead of the writer by {} transactions",
                    lag.unsigned_abs()
                ),
                "A member should never be ahead of the writer; verify which member \
                 is the leader and that every member belongs to the same cluster",
            )?
        } else if lag >= config.tx_lag_error_threshold {
            Advice::error(
                node.addr(),
                format!("Member is lagging the writer by {} transactions", lag),
                "Investigate replication health and network latency for this member",
            )?
        } else {
            Advice::warn(
                node.addr(),
                format!("Member is lagging the writer by {} transactions", lag),
                "Some lag is normal under write load; keep an eye on it",
            )?
        };
        findings.push(advice.with_evidence(evidence).with_database(database));
    }
    Ok(findings)
}
