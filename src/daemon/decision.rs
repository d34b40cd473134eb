//! Pure decision-to-rule logic.
//!
//! Turns a prompt decision plus a candidate connection into a concrete rule.
//! No I/O and no shared state: target availability checks and the fallback
//! priority order live here so both the interactive path and the timeout
//! path produce rules the same way.

use chrono::Utc;

use super::error::DaemonError;
use crate::controller::{PromptDecision, PromptTarget};
use crate::state::{Connection, Rule, RuleOperator};

/// Operator type used for single-leaf matching expressions.
pub const RULE_TYPE_SIMPLE: &str = "simple";

/// Picks the most specific target whose backing field is populated.
///
/// Priority: process path, process command, destination host, destination
/// ip, destination port, then process id (always available).
pub fn best_available_target(conn: &Connection) -> PromptTarget {
    if !conn.process_path.is_empty() {
        PromptTarget::ProcessPath
    } else if !conn.process_args.is_empty() {
        PromptTarget::ProcessCommand
    } else if !conn.dst_host.is_empty() {
        PromptTarget::DestinationHost
    } else if !conn.dst_ip.is_empty() {
        PromptTarget::DestinationIp
    } else if conn.dst_port != 0 {
        PromptTarget::DestinationPort
    } else {
        PromptTarget::ProcessId
    }
}

/// Reports whether the requested target's backing field is populated.
pub fn target_available(conn: &Connection, target: PromptTarget) -> bool {
    match target {
        PromptTarget::ProcessPath => !conn.process_path.is_empty(),
        PromptTarget::ProcessCommand => {
            !conn.process_args.is_empty() || !conn.process_path.is_empty()
        }
        PromptTarget::DestinationHost => !conn.dst_host.is_empty(),
        PromptTarget::DestinationIp => !conn.dst_ip.is_empty(),
        PromptTarget::DestinationPort => conn.dst_port != 0,
        PromptTarget::ProcessId | PromptTarget::UserId => true,
    }
}

/// Maps a target kind to a concrete leaf operator.
///
/// Fails when the requested target's backing field is empty; fallback
/// selection is the caller's job, never silently substituted here.
pub fn operator_for_target(
    conn: &Connection,
    target: PromptTarget,
) -> Result<RuleOperator, DaemonError> {
    let unavailable = |target: PromptTarget| DaemonError::TargetUnavailable {
        target: target.as_str(),
    };
    match target {
        PromptTarget::ProcessPath => {
            if conn.process_path.is_empty() {
                return Err(unavailable(target));
            }
            Ok(simple_operator(target.as_str(), conn.process_path.clone()))
        }
        PromptTarget::ProcessCommand => {
            let cmd_line = conn.process_args.join(" ").trim().to_string();
            if cmd_line.is_empty() {
                // A daemon may omit the argument vector; the path leaf is the
                // closest stable equivalent.
                if conn.process_path.is_empty() {
                    return Err(unavailable(target));
                }
                return Ok(simple_operator(
                    PromptTarget::ProcessPath.as_str(),
                    conn.process_path.clone(),
                ));
            }
            Ok(simple_operator(target.as_str(), cmd_line))
        }
        PromptTarget::ProcessId => Ok(simple_operator(
            target.as_str(),
            conn.process_id.to_string(),
        )),
        PromptTarget::UserId => Ok(simple_operator(target.as_str(), conn.user_id.to_string())),
        PromptTarget::DestinationIp => {
            if conn.dst_ip.is_empty() {
                return Err(unavailable(target));
            }
            Ok(simple_operator(target.as_str(), conn.dst_ip.clone()))
        }
        PromptTarget::DestinationHost => {
            if conn.dst_host.is_empty() {
                return Err(unavailable(target));
            }
            Ok(simple_operator(target.as_str(), conn.dst_host.clone()))
        }
        PromptTarget::DestinationPort => {
            if conn.dst_port == 0 {
                return Err(unavailable(target));
            }
            Ok(simple_operator(target.as_str(), conn.dst_port.to_string()))
        }
    }
}

/// Builds a fully-formed rule from a decision, resolving the target through
/// [`best_available_target`] when the decision leaves it unset.
pub fn build_rule(conn: &Connection, decision: PromptDecision) -> Result<Rule, DaemonError> {
    let target = decision
        .target
        .unwrap_or_else(|| best_available_target(conn));
    let operator = operator_for_target(conn, target)?;
    let now = Utc::now();
    Ok(Rule {
        node_id: String::new(),
        name: format!("user-{}", now.timestamp_nanos_opt().unwrap_or_default()),
        description: String::new(),
        action: decision.action.as_str().to_string(),
        duration: decision.duration.as_str().to_string(),
        enabled: true,
        precedence: false,
        no_log: false,
        created_at: Some(now),
        operator,
    })
}

/// Short human-readable label for a connection, used in error banners.
pub fn connection_label(conn: &Connection) -> String {
    let process = if conn.process_path.is_empty() {
        "unknown"
    } else {
        conn.process_path.as_str()
    };
    let dest = if !conn.dst_host.is_empty() {
        conn.dst_host.as_str()
    } else if !conn.dst_ip.is_empty() {
        conn.dst_ip.as_str()
    } else {
        "destination"
    };
    format!("{process} -> {dest}:{}", conn.dst_port)
}

fn simple_operator(operand: &str, data: String) -> RuleOperator {
    RuleOperator {
        kind: RULE_TYPE_SIMPLE.to_string(),
        operand: operand.to_string(),
        data,
        sensitive: false,
        children: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{PromptAction, PromptDuration};

    fn full_connection() -> Connection {
        Connection {
            protocol: "tcp".to_string(),
            dst_ip: "93.184.216.34".to_string(),
            dst_host: "example.com".to_string(),
            dst_port: 443,
            user_id: 1000,
            process_id: 4242,
            process_path: "/usr/bin/curl".to_string(),
            process_args: vec!["curl".to_string(), "https://example.com".to_string()],
            ..Connection::default()
        }
    }

    #[test]
    fn operator_availability_table() {
        let full = full_connection();
        let empty = Connection::default();

        let cases: &[(PromptTarget, &str, Option<&str>)] = &[
            (PromptTarget::ProcessPath, "/usr/bin/curl", None),
            (
                PromptTarget::ProcessCommand,
                "curl https://example.com",
                None,
            ),
            (PromptTarget::ProcessId, "4242", Some("0")),
            (PromptTarget::UserId, "1000", Some("0")),
            (PromptTarget::DestinationIp, "93.184.216.34", None),
            (PromptTarget::DestinationHost, "example.com", None),
            (PromptTarget::DestinationPort, "443", None),
        ];

        for (target, want_data, empty_data) in cases {
            let op = operator_for_target(&full, *target).expect("populated target");
            assert_eq!(op.kind, RULE_TYPE_SIMPLE);
            assert_eq!(op.operand, target.as_str());
            assert_eq!(op.data, *want_data, "target {target}");

            match empty_data {
                // Id targets never fail; they fall back to zero values.
                Some(zero) => {
                    let op = operator_for_target(&empty, *target).expect("id target");
                    assert_eq!(op.data, *zero);
                }
                None => {
                    let err = operator_for_target(&empty, *target).unwrap_err();
                    assert!(matches!(err, DaemonError::TargetUnavailable { .. }));
                }
            }
        }
    }

    #[test]
    fn command_target_falls_back_to_path_leaf() {
        let mut conn = full_connection();
        conn.process_args.clear();
        let op = operator_for_target(&conn, PromptTarget::ProcessCommand).unwrap();
        assert_eq!(op.operand, "process.path");
        assert_eq!(op.data, "/usr/bin/curl");
    }

    #[test]
    fn best_target_priority_order() {
        let mut conn = full_connection();
        assert_eq!(best_available_target(&conn), PromptTarget::ProcessPath);
        conn.process_path.clear();
        assert_eq!(best_available_target(&conn), PromptTarget::ProcessCommand);
        conn.process_args.clear();
        assert_eq!(best_available_target(&conn), PromptTarget::DestinationHost);
        conn.dst_host.clear();
        assert_eq!(best_available_target(&conn), PromptTarget::DestinationIp);
        conn.dst_ip.clear();
        assert_eq!(best_available_target(&conn), PromptTarget::DestinationPort);
        conn.dst_port = 0;
        assert_eq!(best_available_target(&conn), PromptTarget::ProcessId);
    }

    #[test]
    fn build_rule_uses_decision_target() {
        let rule = build_rule(
            &full_connection(),
            PromptDecision {
                action: PromptAction::Allow,
                duration: PromptDuration::Always,
                target: Some(PromptTarget::DestinationHost),
            },
        )
        .unwrap();

        assert_eq!(rule.action, "allow");
        assert_eq!(rule.duration, "always");
        assert!(rule.enabled);
        assert!(rule.name.starts_with("user-"));
        assert_eq!(rule.operator.operand, "dest.host");
        assert_eq!(rule.operator.data, "example.com");
        assert!(rule.created_at.is_some());
    }

    #[test]
    fn build_rule_falls_back_to_best_target() {
        let mut conn = full_connection();
        conn.process_path.clear();
        conn.process_args.clear();
        let rule = build_rule(&conn, PromptDecision::default()).unwrap();
        assert_eq!(rule.operator.operand, "dest.host");
        assert_eq!(rule.action, "deny");
        assert_eq!(rule.duration, "once");
    }

    #[test]
    fn build_rule_propagates_target_errors() {
        let err = build_rule(
            &Connection::default(),
            PromptDecision {
                target: Some(PromptTarget::DestinationIp),
                ..PromptDecision::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DaemonError::TargetUnavailable { target: "dest.ip" }
        ));
    }

    #[test]
    fn connection_labels_fall_back_sensibly() {
        assert_eq!(
            connection_label(&full_connection()),
            "/usr/bin/curl -> example.com:443"
        );
        assert_eq!(
            connection_label(&Connection::default()),
            "unknown -> destination:0"
        );
    }
}
