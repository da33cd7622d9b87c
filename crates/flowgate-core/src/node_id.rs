// Node id generation and validation
//
// Format: {type}_{subtype}_{8-hex}, e.g. trigger_manual_a3b4c5d6

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::workflow::{Connection, ConnectionsMap, Node};

static NODE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]{2,99}$").expect("valid pattern"));

/// Names that cannot be used as node ids
pub const RESERVED_IDS: [&str; 9] = [
    "start",
    "end",
    "input",
    "output",
    "context",
    "workflow",
    "execution",
    "node",
    "connection",
];

/// Whether `id` is a well-formed, non-reserved node id
pub fn is_valid_node_id(id: &str) -> bool {
    NODE_ID_PATTERN.is_match(id) && !RESERVED_IDS.contains(&id.to_ascii_lowercase().as_str())
}

/// Generate a fresh node id that does not collide with `existing`
pub fn generate_node_id(node_type: &str, subtype: &str, existing: &HashSet<String>) -> String {
    let base = format!("{}_{}", clean_identifier(node_type), clean_identifier(subtype));

    for _ in 0..100 {
        let hex = Uuid::new_v4().simple().to_string();
        let candidate = format!("{base}_{}", &hex[..8]);
        if !existing.contains(&candidate) && is_valid_node_id(&candidate) {
            return candidate;
        }
    }

    // Collision storm fallback: a full uuid cannot collide in practice
    format!("node_{}", Uuid::new_v4().simple())
}

/// Ensure every node carries a valid, unique id.
///
/// Rules: a valid, unseen id is kept; missing, duplicate, reserved or
/// malformed ids are regenerated. Idempotent: a second pass changes nothing.
pub fn ensure_unique_node_ids(nodes: &mut [Node]) {
    let mut seen: HashSet<String> = HashSet::new();

    for node in nodes.iter_mut() {
        let current = node.id.trim().to_string();
        let needs_new_id = current.is_empty() || seen.contains(&current) || !is_valid_node_id(&current);

        if needs_new_id {
            let new_id = generate_node_id(node.node_type.as_str(), &node.subtype, &seen);
            node.id = new_id.clone();
            seen.insert(new_id);
        } else {
            node.id = current.clone();
            seen.insert(current);
        }
    }
}

/// Resolve connection endpoints given by display name to node ids.
/// References that are already ids (or unknown) are left untouched for
/// validation to catch.
pub fn resolve_connection_references(
    connections: &ConnectionsMap,
    nodes: &[Node],
) -> ConnectionsMap {
    let name_to_id: HashMap<&str, &str> = nodes
        .iter()
        .filter(|n| !n.name.is_empty() && !n.id.is_empty())
        .map(|n| (n.name.as_str(), n.id.as_str()))
        .collect();

    let resolve = |reference: &str| -> String {
        name_to_id
            .get(reference)
            .map(|id| id.to_string())
            .unwrap_or_else(|| reference.to_string())
    };

    connections
        .iter()
        .map(|(source, by_type)| {
            let resolved_targets = by_type
                .iter()
                .map(|(conn_type, targets)| {
                    let targets = targets
                        .iter()
                        .map(|c| Connection {
                            node: resolve(&c.node),
                            index: c.index,
                        })
                        .collect();
                    (*conn_type, targets)
                })
                .collect();
            (resolve(source), resolved_targets)
        })
        .collect()
}

fn clean_identifier(text: &str) -> String {
    if text.is_empty() {
        return "unknown".to_string();
    }

    let lowered = text.to_ascii_lowercase();
    let stripped = lowered.replace("_node", "").replace("-node", "");

    let mut cleaned = String::with_capacity(stripped.len());
    let mut last_was_sep = false;
    for ch in stripped.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch);
            last_was_sep = false;
        } else if !last_was_sep && !cleaned.is_empty() {
            cleaned.push('_');
            last_was_sep = true;
        }
    }
    let cleaned = cleaned.trim_matches('_').to_string();

    if cleaned.is_empty() {
        return "unknown".to_string();
    }
    if cleaned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return format!("n{cleaned}");
    }
    cleaned
}
