// src/types.rs
// Metadata records with known shapes: functions, run logs, pipelines, cron jobs, bindings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::RelayError;

/// A container-backed executable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub title: String,
    /// Image reference, `host/vendor/image[:version]`
    pub image: String,
    /// Raw invocation parameters; segments are separated by a literal backslash
    pub params: String,
    /// Newline separated `KEY=value` pairs
    pub env: String,
    /// Backing container, assigned on first run and reused afterwards
    #[serde(skip)]
    pub container_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Function {
    pub fn new(title: impl Into<String>, image: impl Into<String>, params: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: None,
            title: title.into(),
            image: image.into(),
            params: params.into(),
            env: String::new(),
            container_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }
}

/// One invocation outcome, keyed by the caller-supplied run id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub id: Uuid,
    pub function_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub result: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Function,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Function => "function",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" | "func" => Ok(InputKind::Function),
            other => Err(RelayError::InvalidInput(format!("unknown input kind: {}", other))),
        }
    }
}

/// Output kinds are open-ended; the router decides which ones it can dispatch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputKind(pub String);

impl OutputKind {
    pub fn topic() -> Self {
        OutputKind("topic".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing rule from a triggering source to an output sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub title: String,
    pub input_kind: InputKind,
    pub input_id: Uuid,
    pub output_kind: OutputKind,
    pub output_id: Uuid,
}

impl Pipeline {
    pub fn function_to_topic(function_id: Uuid, binding_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            input_kind: InputKind::Function,
            input_id: function_id,
            output_kind: OutputKind::topic(),
            output_id: binding_id,
        }
    }
}

/// Scheduler-assigned entry id, persisted so a job can be replaced or removed later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScheduleHandle(pub i64);

impl fmt::Display for ScheduleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub id: Uuid,
    pub title: String,
    /// Cron expression, 5-field (minute resolution) or seconds-first 6/7-field
    pub schedule: String,
    pub function_id: Uuid,
    #[serde(skip)]
    pub schedule_handle: Option<ScheduleHandle>,
}

impl CronJob {
    pub fn new(schedule: impl Into<String>, function_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            schedule: schedule.into(),
            function_id,
            schedule_handle: None,
        }
    }
}

/// Owner of topic bindings; holds the access key and origin allow-list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    #[serde(skip_serializing)]
    pub key: String,
    /// `;` separated origins, `*` allows any
    pub origins: String,
}

impl Project {
    pub fn new(title: impl Into<String>, key: impl Into<String>, origins: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            key: key.into(),
            origins: origins.into(),
        }
    }

    pub fn allows_origin(&self, origin: &str) -> bool {
        self.origins
            .split(';')
            .map(str::trim)
            .any(|allowed| allowed == "*" || allowed == origin)
    }
}

/// Named topic owned by a project; pipeline topic outputs point at these
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicBinding {
    pub id: Uuid,
    pub project_id: Uuid,
    pub collection: String,
}

impl TopicBinding {
    pub fn new(project_id: Uuid, collection: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            collection: collection.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    /// Lenient parse for query strings; anything but "asc" sorts descending
    pub fn parse_lenient(s: &str) -> Self {
        if s.eq_ignore_ascii_case("asc") {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_origin_allow_list() {
        let project = Project::new("site", "k", "https://a.example; https://b.example");
        assert!(project.allows_origin("https://a.example"));
        assert!(project.allows_origin("https://b.example"));
        assert!(!project.allows_origin("https://evil.example"));

        let open = Project::new("open", "k", "*");
        assert!(open.allows_origin("anything"));
    }

    #[test]
    fn test_input_kind_accepts_legacy_name() {
        assert_eq!("func".parse::<InputKind>().unwrap(), InputKind::Function);
        assert_eq!("function".parse::<InputKind>().unwrap(), InputKind::Function);
        assert!("topic".parse::<InputKind>().is_err());
    }

    #[test]
    fn test_sort_direction_lenient() {
        assert_eq!(SortDirection::parse_lenient("ASC"), SortDirection::Asc);
        assert_eq!(SortDirection::parse_lenient("desc"), SortDirection::Desc);
        assert_eq!(SortDirection::parse_lenient(""), SortDirection::Desc);
    }

    #[test]
    fn test_project_key_not_serialized() {
        let project = Project::new("site", "secret", "*");
        let json = serde_json::to_string(&project).unwrap();
        assert!(!json.contains("secret"));
    }
}
