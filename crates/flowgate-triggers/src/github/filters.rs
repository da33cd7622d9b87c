// Pure filter predicates over GitHub webhook payloads

use std::collections::BTreeSet;

use globset::{Glob, GlobSetBuilder};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::GithubEventFilters;

/// GitHub bot accounts: sender type Bot, or a `[bot]` marker in the login
pub fn is_bot_sender(payload: &Value) -> bool {
    let sender = &payload["sender"];
    if sender.get("type").and_then(Value::as_str) == Some("Bot") {
        return true;
    }
    sender
        .get("login")
        .and_then(Value::as_str)
        .is_some_and(|login| login.to_ascii_lowercase().contains("[bot]"))
}

/// The event-specific author: push uses the first commit's author name,
/// PRs and issues use the opening user, everything else falls back to the
/// sender login.
pub fn event_author<'a>(event_type: &str, payload: &'a Value) -> Option<&'a str> {
    match event_type {
        "push" => payload["commits"]
            .get(0)
            .and_then(|c| c["author"]["name"].as_str()),
        "pull_request" => payload["pull_request"]["user"]["login"].as_str(),
        "issues" => payload["issue"]["user"]["login"].as_str(),
        _ => payload["sender"]["login"].as_str(),
    }
}

/// Whether `author` matches the global author regex (anchored at the start,
/// like a prefix match). Unmatchable patterns reject.
pub fn author_matches(author: &str, pattern: &str) -> bool {
    match Regex::new(&format!("^(?:{pattern})")) {
        Ok(re) => re.is_match(author),
        Err(e) => {
            warn!(pattern, "invalid author filter regex: {e}");
            false
        }
    }
}

/// The branch an event refers to: pushes carry `refs/heads/{branch}`, pull
/// requests filter on their base branch.
pub fn event_branch(event_type: &str, payload: &Value) -> Option<String> {
    match event_type {
        "push" => payload["ref"]
            .as_str()
            .and_then(|r| r.strip_prefix("refs/heads/"))
            .map(str::to_string),
        "pull_request" => payload["pull_request"]["base"]["ref"]
            .as_str()
            .map(str::to_string),
        _ => None,
    }
}

/// Union of added + modified + removed paths across all commits of a push
pub fn changed_files_from_push(payload: &Value) -> Vec<String> {
    let mut files = BTreeSet::new();
    if let Some(commits) = payload["commits"].as_array() {
        for commit in commits {
            for key in ["added", "modified", "removed"] {
                if let Some(paths) = commit[key].as_array() {
                    files.extend(paths.iter().filter_map(Value::as_str).map(str::to_string));
                }
            }
        }
    }
    files.into_iter().collect()
}

/// Whether any file matches any of the glob patterns
pub fn files_match_patterns(files: &[String], patterns: &[String]) -> bool {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern, "invalid path glob: {e}"),
        }
    }
    let Ok(set) = builder.build() else {
        return false;
    };
    files.iter().any(|file| set.is_match(file))
}

fn labels_of(event_type: &str, payload: &Value) -> Vec<String> {
    let container = match event_type {
        "issues" => &payload["issue"],
        "pull_request" => &payload["pull_request"],
        _ => return Vec::new(),
    };
    container["labels"]
        .as_array()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| l["name"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn in_list(value: Option<&str>, allowed: &[String]) -> bool {
    value.is_some_and(|v| allowed.iter().any(|a| a == v))
}

/// Apply the event-specific filter set. `pr_changed_files` carries the PR
/// files fetched from the API when a `paths` filter is configured.
pub fn matches_event_filters(
    event_type: &str,
    payload: &Value,
    filters: &GithubEventFilters,
    pr_changed_files: Option<&[String]>,
) -> bool {
    if let Some(branches) = &filters.branches {
        if matches!(event_type, "push" | "pull_request") {
            if let Some(branch) = event_branch(event_type, payload) {
                if !branches.contains(&branch) {
                    debug!(branch, "branch not in filter");
                    return false;
                }
            }
        }
    }

    if let Some(actions) = &filters.actions {
        if !in_list(payload["action"].as_str(), actions) {
            debug!(action = payload["action"].as_str(), "action not in filter");
            return false;
        }
    }

    if let Some(labels) = &filters.labels {
        if matches!(event_type, "issues" | "pull_request") {
            let event_labels = labels_of(event_type, payload);
            if !labels.iter().any(|l| event_labels.contains(l)) {
                debug!("no matching labels");
                return false;
            }
        }
    }

    if let Some(draft_handling) = &filters.draft_handling {
        if event_type == "pull_request" {
            let is_draft = payload["pull_request"]["draft"].as_bool().unwrap_or(false);
            match draft_handling.as_str() {
                "ignore" if is_draft => return false,
                "only" if !is_draft => return false,
                _ => {}
            }
        }
    }

    if let Some(patterns) = &filters.paths {
        if matches!(event_type, "push" | "pull_request") {
            let files = match event_type {
                "push" => changed_files_from_push(payload),
                _ => pr_changed_files.map(<[String]>::to_vec).unwrap_or_default(),
            };
            if !files_match_patterns(&files, patterns) {
                debug!("no changed files match path patterns");
                return false;
            }
        }
    }

    if let Some(authors) = &filters.authors {
        if let Some(author) = event_author(event_type, payload) {
            if !authors.iter().any(|a| a == author) {
                debug!(author, "author not in allow-list");
                return false;
            }
        }
    }

    if let Some(states) = &filters.states {
        if event_type == "pull_request_review"
            && !in_list(payload["review"]["state"].as_str(), states)
        {
            return false;
        }
    }

    if let Some(workflows) = &filters.workflows {
        if event_type == "workflow_run"
            && !in_list(payload["workflow_run"]["path"].as_str(), workflows)
        {
            return false;
        }
    }

    if let Some(conclusions) = &filters.conclusions {
        if matches!(event_type, "workflow_run" | "workflow_job")
            && !in_list(payload[event_type]["conclusion"].as_str(), conclusions)
        {
            return false;
        }
    }

    if let Some(ref_types) = &filters.ref_types {
        if matches!(event_type, "create" | "delete")
            && !in_list(payload["ref_type"].as_str(), ref_types)
        {
            return false;
        }
    }

    true
}
