//! Task and pending-operation models
//!
//! The local store and the remote document store share one wire shape.
//! Reading is tolerant (legacy `completed` flags, millisecond timestamps,
//! empty date strings); writing always produces the canonical form.

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Remote collection holding every user's tasks
pub const TASKS_COLLECTION: &str = "tasks";

pub const TITLE_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// Priority level for tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("invalid priority '{other}' (expected low, medium or high)")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Workflow state of a task.
///
/// This is the canonical completion representation. The boolean
/// `completed` flag seen on the wire is derived from it: a task is
/// completed exactly when its status is [`Status::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl Status {
    pub fn is_done(self) -> bool {
        self == Self::Done
    }

    /// Maps a legacy boolean flag onto the three-state enum
    pub fn from_completed(completed: bool) -> Self {
        if completed { Self::Done } else { Self::Todo }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "in-progress" | "in_progress" | "inprogress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(format!(
                "invalid status '{other}' (expected todo, in-progress or done)"
            )),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Done => "done",
        })
    }
}

/// A task/todo item, in normalized form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TaskRecord", into = "TaskRecord")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: Status,
    pub due_date: Option<NaiveDate>,
    pub due_time: Option<NaiveTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Generates a client-side id. The client is the only id authority;
    /// the same id is used as the remote document id.
    pub fn new_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Builds a fresh task from user input
    pub fn from_draft(draft: TaskDraft, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::new_id(),
            title: draft.title.trim().to_string(),
            description: non_empty(draft.description),
            priority: draft.priority,
            status: draft.status,
            due_date: draft.due_date,
            due_time: draft.due_time,
            created_at: now,
            updated_at: now,
            user_id: Some(user_id.to_string()),
            synced_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_done()
    }

    /// Merges a patch into this task. `id` and `created_at` never change.
    pub fn apply(&mut self, patch: TaskPatch, now: DateTime<Utc>) {
        if let Some(title) = patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            self.description = non_empty(description);
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        // An explicit status wins over the boolean view.
        match (patch.status, patch.completed) {
            (Some(status), _) => self.status = status,
            (None, Some(true)) => self.status = Status::Done,
            (None, Some(false)) if self.status.is_done() => self.status = Status::Todo,
            _ => {}
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(due_time) = patch.due_time {
            self.due_time = due_time;
        }
        self.updated_at = now;
    }

    /// Canonical JSON document for the remote store
    pub fn to_document(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(TaskRecord::from(self.clone()))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Recovers a creation time from an id that embeds one.
///
/// UUIDv7 ids carry their generation time; legacy ids were the creation
/// time in milliseconds since the epoch.
pub fn created_at_from_id(id: &str) -> Option<DateTime<Utc>> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        let (secs, nanos) = uuid.get_timestamp()?.to_unix();
        return DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos);
    }
    if id.len() >= 12 && id.bytes().all(|b| b.is_ascii_digit()) {
        return id.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis);
    }
    None
}

/// User input for a new task
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: Status,
    pub due_date: Option<NaiveDate>,
    pub due_time: Option<NaiveTime>,
}

impl TaskDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update. `None` leaves a field untouched; for clearable fields
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
    pub completed: Option<bool>,
    pub due_date: Option<Option<NaiveDate>>,
    pub due_time: Option<Option<NaiveTime>>,
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

/// Timestamp as found in stored records.
///
/// Older clients wrote epoch milliseconds, document stores may hand back
/// `{seconds, nanoseconds}` objects; everything new is RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Text(String),
    Millis(i64),
    Parts { seconds: i64, nanoseconds: u32 },
}

impl WireTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            Self::Parts {
                seconds,
                nanoseconds,
            } => DateTime::from_timestamp(*seconds, *nanoseconds),
        }
    }
}

impl From<DateTime<Utc>> for WireTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::Text(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

/// Wire shape of a task, shared by local and remote storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<NaiveDate>,
    #[serde(
        default,
        serialize_with = "serialize_hhmm",
        deserialize_with = "lenient_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<WireTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<WireTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<WireTimestamp>,
}

impl From<TaskRecord> for Task {
    fn from(record: TaskRecord) -> Self {
        let status = record
            .status
            .unwrap_or_else(|| Status::from_completed(record.completed.unwrap_or(false)));

        let created_at = record
            .created_at
            .as_ref()
            .and_then(WireTimestamp::to_datetime)
            .or_else(|| created_at_from_id(&record.id))
            .unwrap_or_else(Utc::now);

        let updated_at = record
            .updated_at
            .as_ref()
            .and_then(WireTimestamp::to_datetime)
            .unwrap_or(created_at);

        Self {
            id: record.id,
            title: record.title,
            description: non_empty(record.description),
            priority: record.priority,
            status,
            due_date: record.due_date,
            due_time: record.due_time,
            created_at,
            updated_at,
            user_id: record.user_id,
            synced_at: record.synced_at.as_ref().and_then(WireTimestamp::to_datetime),
        }
    }
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            priority: task.priority,
            status: Some(task.status),
            completed: Some(task.status.is_done()),
            due_date: task.due_date,
            due_time: task.due_time,
            created_at: Some(task.created_at.into()),
            updated_at: Some(task.updated_at.into()),
            user_id: task.user_id,
            synced_at: task.synced_at.map(Into::into),
        }
    }
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    // Accept full timestamps as well, keeping the calendar day.
    let day = raw.get(..10).unwrap_or(raw.as_str());
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map(Some)
        .map_err(serde::de::Error::custom)
}

fn lenient_time<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
        .map(Some)
        .map_err(serde::de::Error::custom)
}

fn serialize_hhmm<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match time {
        Some(t) => serializer.serialize_str(&t.format("%H:%M").to_string()),
        None => serializer.serialize_none(),
    }
}

/// Kind of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// Payload of a queued mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PendingAction {
    Add {
        task: Task,
    },
    Update {
        task: Task,
    },
    Delete {
        #[serde(rename = "taskId")]
        task_id: String,
    },
}

impl PendingAction {
    pub fn kind(&self) -> Action {
        match self {
            Self::Add { .. } => Action::Add,
            Self::Update { .. } => Action::Update,
            Self::Delete { .. } => Action::Delete,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::Add { task } | Self::Update { task } => &task.id,
            Self::Delete { task_id } => task_id,
        }
    }
}

/// A mutation that has not been confirmed by the remote store yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    #[serde(flatten)]
    pub action: PendingAction,
    pub user_id: String,
    /// Enqueue time, for diagnostics only
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn legacy_completed_flag_maps_to_status() {
        let task: Task = serde_json::from_value(json!({
            "id": "1700000000000",
            "title": "Buy milk",
            "completed": true,
            "createdAt": 1_700_000_000_000_i64
        }))
        .unwrap();

        assert_eq!(task.status, Status::Done);
        assert!(task.is_completed());
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(
            task.created_at,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
        );
    }

    #[test]
    fn status_wins_over_completed_flag() {
        let task: Task = serde_json::from_value(json!({
            "id": "a",
            "title": "t",
            "status": "in-progress",
            "completed": true
        }))
        .unwrap();
        assert_eq!(task.status, Status::InProgress);
    }

    #[test]
    fn serialization_emits_consistent_status_and_flag() {
        let task = Task::from_draft(TaskDraft::titled("Write report"), "user-1", Utc::now());
        let value = serde_json::to_value(&task).unwrap();

        assert_eq!(value["status"], "todo");
        assert_eq!(value["completed"], false);
        assert_eq!(value["userId"], "user-1");
        assert!(value["createdAt"].is_string());
        assert!(value.get("syncedAt").is_none());
    }

    #[test]
    fn missing_created_at_is_derived_from_uuid_v7_id() {
        let id = Task::new_id();
        let task: Task = serde_json::from_value(json!({ "id": id, "title": "t" })).unwrap();
        let embedded = created_at_from_id(&id).unwrap();

        assert_eq!(task.created_at, embedded);
        assert!((Utc::now() - embedded).num_seconds().abs() < 60);
    }

    #[test]
    fn missing_created_at_falls_back_to_now_for_opaque_ids() {
        let before = Utc::now();
        let task: Task = serde_json::from_value(json!({ "id": "abc", "title": "t" })).unwrap();
        assert!(task.created_at >= before);
        assert_eq!(task.updated_at, task.created_at);
    }

    #[test]
    fn missing_created_at_is_derived_from_legacy_millisecond_id() {
        let task: Task =
            serde_json::from_value(json!({ "id": "1700000000000", "title": "t" })).unwrap();
        assert_eq!(
            task.created_at,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
        );
    }

    #[test]
    fn short_numeric_ids_are_not_treated_as_timestamps() {
        assert_eq!(created_at_from_id("17000000000"), None);

        let before = Utc::now();
        let task: Task =
            serde_json::from_value(json!({ "id": "17000000000", "title": "t" })).unwrap();
        assert!(task.created_at >= before);
    }

    #[test]
    fn document_is_the_full_wire_record() {
        let task = Task::from_draft(TaskDraft::titled("Write report"), "user-1", Utc::now());
        let doc = task.to_document().unwrap();

        assert_eq!(doc["id"], task.id.as_str());
        assert_eq!(doc["title"], "Write report");
        assert_eq!(doc["status"], "todo");
        assert_eq!(doc["completed"], false);
        assert_eq!(doc["userId"], "user-1");
    }

    #[test]
    fn firestore_style_timestamp_is_accepted() {
        let task: Task = serde_json::from_value(json!({
            "id": "abc",
            "title": "t",
            "createdAt": { "seconds": 1_700_000_000, "nanoseconds": 0 }
        }))
        .unwrap();
        assert_eq!(task.created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn empty_due_fields_read_as_absent() {
        let task: Task = serde_json::from_value(json!({
            "id": "abc",
            "title": "t",
            "dueDate": "",
            "dueTime": ""
        }))
        .unwrap();
        assert_eq!(task.due_date, None);
        assert_eq!(task.due_time, None);
    }

    #[test]
    fn due_time_round_trips_as_hours_and_minutes() {
        let task: Task = serde_json::from_value(json!({
            "id": "abc",
            "title": "t",
            "dueDate": "2024-01-15T00:00:00.000Z",
            "dueTime": "09:30"
        }))
        .unwrap();
        assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2024, 1, 15));

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["dueDate"], "2024-01-15");
        assert_eq!(value["dueTime"], "09:30");
    }

    #[rstest]
    #[case(Status::Todo, TaskPatch::completed(true), Status::Done)]
    #[case(Status::Done, TaskPatch::completed(false), Status::Todo)]
    #[case(Status::InProgress, TaskPatch::completed(false), Status::InProgress)]
    #[case(Status::Done, TaskPatch::status(Status::InProgress), Status::InProgress)]
    fn patch_keeps_completion_views_consistent(
        #[case] initial: Status,
        #[case] patch: TaskPatch,
        #[case] expected: Status,
    ) {
        let mut task = Task::from_draft(TaskDraft::titled("t"), "u", Utc::now());
        task.status = initial;
        task.apply(patch, Utc::now());
        assert_eq!(task.status, expected);
        assert_eq!(task.is_completed(), expected == Status::Done);
    }

    #[test]
    fn patch_never_touches_identity_or_creation_time() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut task = Task::from_draft(TaskDraft::titled("old"), "u", created);
        let id = task.id.clone();
        let later = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        task.apply(
            TaskPatch {
                title: Some("  new  ".into()),
                description: Some(Some("   ".into())),
                ..TaskPatch::default()
            },
            later,
        );

        assert_eq!(task.id, id);
        assert_eq!(task.created_at, created);
        assert_eq!(task.updated_at, later);
        assert_eq!(task.title, "new");
        assert_eq!(task.description, None);
    }

    #[test]
    fn pending_operation_wire_shape() {
        let op = PendingOperation {
            action: PendingAction::Delete {
                task_id: "t1".into(),
            },
            user_id: "u1".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["action"], "delete");
        assert_eq!(value["taskId"], "t1");
        assert_eq!(value["userId"], "u1");

        let back: PendingOperation = serde_json::from_value(value).unwrap();
        assert_eq!(back, op);
    }
}
