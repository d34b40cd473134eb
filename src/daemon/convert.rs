//! Conversions between wire payloads and store value types.

use chrono::{DateTime, TimeZone, Utc};

use super::wire;
use crate::state;

/// Number of entries kept per telemetry breakdown.
const TOP_BUCKETS: usize = 5;

pub(crate) fn connection_from_wire(conn: wire::Connection) -> state::Connection {
    state::Connection {
        protocol: conn.protocol,
        src_ip: conn.src_ip,
        src_port: conn.src_port,
        dst_ip: conn.dst_ip,
        dst_host: conn.dst_host,
        dst_port: conn.dst_port,
        user_id: conn.user_id,
        process_id: conn.process_id,
        process_path: conn.process_path,
        process_cwd: conn.process_cwd,
        process_args: conn.process_args,
        process_checksums: conn.process_checksums,
    }
}

pub(crate) fn rules_from_wire(list: Vec<wire::Rule>, node_id: &str) -> Vec<state::Rule> {
    list.into_iter()
        .map(|rule| rule_from_wire(rule, node_id))
        .collect()
}

pub(crate) fn rule_from_wire(rule: wire::Rule, node_id: &str) -> state::Rule {
    state::Rule {
        node_id: node_id.to_string(),
        name: rule.name,
        description: rule.description,
        action: rule.action,
        duration: rule.duration,
        enabled: rule.enabled,
        precedence: rule.precedence,
        no_log: rule.no_log,
        created_at: timestamp_from_unix(rule.created),
        operator: operator_from_wire(rule.operator),
    }
}

pub(crate) fn operator_from_wire(op: wire::Operator) -> state::RuleOperator {
    state::RuleOperator {
        kind: op.kind,
        operand: op.operand,
        data: op.data,
        sensitive: op.sensitive,
        children: op.children.into_iter().map(operator_from_wire).collect(),
    }
}

pub(crate) fn rule_to_wire(rule: &state::Rule) -> wire::Rule {
    wire::Rule {
        name: rule.name.clone(),
        description: rule.description.clone(),
        action: rule.action.clone(),
        duration: rule.duration.clone(),
        enabled: rule.enabled,
        precedence: rule.precedence,
        no_log: rule.no_log,
        created: rule.created_at.map(|t| t.timestamp()).unwrap_or_default(),
        operator: operator_to_wire(&rule.operator),
    }
}

pub(crate) fn operator_to_wire(op: &state::RuleOperator) -> wire::Operator {
    wire::Operator {
        kind: op.kind.clone(),
        operand: op.operand.clone(),
        data: op.data.clone(),
        sensitive: op.sensitive,
        children: op.children.iter().map(operator_to_wire).collect(),
    }
}

pub(crate) fn stats_from_wire(stats: wire::Stats, node_id: &str, node_name: &str) -> state::Stats {
    state::Stats {
        node_id: node_id.to_string(),
        node_name: node_name.to_string(),
        daemon_version: stats.daemon_version,
        rules: stats.rules,
        connections: stats.connections,
        accepted: stats.accepted,
        dropped: stats.dropped,
        ignored: stats.ignored,
        rule_hits: stats.rule_hits,
        rule_misses: stats.rule_misses,
        top_dest_hosts: top_buckets(stats.by_host, TOP_BUCKETS),
        top_dest_ports: top_buckets(stats.by_port, TOP_BUCKETS),
        top_executables: top_buckets(stats.by_executable, TOP_BUCKETS),
        updated_at: Some(Utc::now()),
    }
}

pub(crate) fn alert_from_wire(alert: wire::Alert, node_id: &str) -> state::Alert {
    state::Alert {
        id: alert.id.to_string(),
        node_id: node_id.to_string(),
        text: alert.text,
        priority: alert.priority,
        kind: alert.kind,
        action: alert.action,
        created_at: Some(Utc::now()),
    }
}

fn timestamp_from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

fn top_buckets(
    values: std::collections::HashMap<String, u64>,
    size: usize,
) -> Vec<state::StatBucket> {
    let mut buckets: Vec<state::StatBucket> = values
        .into_iter()
        .filter(|(_, value)| *value > 0)
        .map(|(label, value)| state::StatBucket { label, value })
        .collect();
    buckets.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    buckets.truncate(size);
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn rule_round_trips_through_wire_form() {
        let rule = state::Rule {
            node_id: "n".to_string(),
            name: "ssh".to_string(),
            action: "allow".to_string(),
            duration: "always".to_string(),
            enabled: true,
            created_at: timestamp_from_unix(1_700_000_000),
            operator: state::RuleOperator {
                kind: "list".to_string(),
                operand: "list".to_string(),
                children: vec![state::RuleOperator {
                    kind: "simple".to_string(),
                    operand: "process.path".to_string(),
                    data: "/usr/bin/ssh".to_string(),
                    ..state::RuleOperator::default()
                }],
                ..state::RuleOperator::default()
            },
            ..state::Rule::default()
        };

        let back = rule_from_wire(rule_to_wire(&rule), "n");
        assert_eq!(back, rule);
    }

    #[test]
    fn zero_created_timestamp_maps_to_none() {
        let rule = rule_from_wire(wire::Rule::default(), "n");
        assert!(rule.created_at.is_none());
    }

    #[test]
    fn telemetry_breakdowns_keep_top_five_sorted() {
        let mut by_host = HashMap::new();
        for (host, count) in [
            ("a.example", 1u64),
            ("b.example", 9),
            ("c.example", 4),
            ("d.example", 4),
            ("e.example", 0),
            ("f.example", 7),
            ("g.example", 2),
        ] {
            by_host.insert(host.to_string(), count);
        }

        let stats = stats_from_wire(
            wire::Stats {
                by_host,
                ..wire::Stats::default()
            },
            "node",
            "node-name",
        );

        let labels: Vec<&str> = stats
            .top_dest_hosts
            .iter()
            .map(|b| b.label.as_str())
            .collect();
        // Zero-count buckets dropped, ties broken by label.
        assert_eq!(
            labels,
            ["b.example", "f.example", "c.example", "d.example", "g.example"]
        );
        assert_eq!(stats.node_name, "node-name");
    }
}
