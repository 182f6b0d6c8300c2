//! Progress events reported by the engine during a solve.
//!
//! These are the domain-side event types: the client converts incoming wire
//! frames into [`StatusUpdate`] values before fanning them out to display
//! and trace sinks. They serialize cleanly so a trace sink can persist each
//! update as one JSON line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Name prefix the engine uses for internal registry-auth steps.
///
/// These leak into the vertex stream and are hidden from interactive
/// display, same as weak progress groups.
pub const AUTH_STEP_PREFIX: &str = "[auth] ";

/// One progress report from the engine, carrying vertex state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Vertices whose state changed since the previous update.
    pub vertexes: Vec<Vertex>,
}

impl StatusUpdate {
    /// Returns `true` when the update carries no vertex transitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertexes.is_empty()
    }
}

/// State of one graph node as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// Content digest of the node this vertex reports on.
    pub digest: Digest,
    /// Human-readable step name.
    pub name: String,
    /// When execution started, if it has.
    pub started: Option<DateTime<Utc>>,
    /// When execution finished, if it has.
    pub completed: Option<DateTime<Utc>>,
    /// Whether the engine satisfied this node from cache.
    pub cached: bool,
    /// Failure text, empty when the vertex has not failed.
    pub error: String,
    /// Display grouping hint, if the graph producer attached one.
    pub progress_group: Option<ProgressHint>,
}

impl Vertex {
    /// Returns `true` when this vertex belongs in interactive display.
    ///
    /// Vertices in weak progress groups and the engine's internal auth
    /// steps are suppressed; they still reach the trace sink.
    #[must_use]
    pub fn is_displayable(&self) -> bool {
        if self.progress_group.as_ref().is_some_and(|group| group.weak) {
            return false;
        }
        !self.name.starts_with(AUTH_STEP_PREFIX)
    }

    /// Returns `true` when the vertex carries failure text.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Display grouping attached to a vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressHint {
    pub id: String,
    pub name: String,
    /// Weak groups are hidden from interactive display.
    pub weak: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(name: &str) -> Vertex {
        Vertex {
            digest: Digest::from_bytes(name.as_bytes()),
            name: name.to_string(),
            started: None,
            completed: None,
            cached: false,
            error: String::new(),
            progress_group: None,
        }
    }

    #[test]
    fn test_plain_vertex_is_displayable() {
        assert!(vertex("compile sources").is_displayable());
    }

    #[test]
    fn test_weak_group_vertex_is_hidden() {
        let mut v = vertex("internal step");
        v.progress_group = Some(ProgressHint {
            id: "g1".to_string(),
            name: "internals".to_string(),
            weak: true,
        });
        assert!(!v.is_displayable());
    }

    #[test]
    fn test_strong_group_vertex_is_displayable() {
        let mut v = vertex("user step");
        v.progress_group = Some(ProgressHint {
            id: "g2".to_string(),
            name: "user".to_string(),
            weak: false,
        });
        assert!(v.is_displayable());
    }

    #[test]
    fn test_auth_step_is_hidden() {
        assert!(!vertex("[auth] registry token").is_displayable());
    }

    #[test]
    fn test_error_marks_vertex_failed() {
        let mut v = vertex("failing step");
        assert!(!v.is_failed());
        v.error = "exit code 1".to_string();
        assert!(v.is_failed());
    }

    #[test]
    fn test_status_update_serde_roundtrip() {
        let update = StatusUpdate {
            vertexes: vec![vertex("step"), vertex("[auth] hidden")],
        };
        let json = serde_json::to_string(&update).expect("serialize failed");
        assert!(json.contains("\"digest\""));
        let back: StatusUpdate = serde_json::from_str(&json).expect("deserialize failed");
        assert_eq!(back, update);
    }
}
