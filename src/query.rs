//! Filtering, search, ordering and counters over the local task list

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::cmp::Reverse;
use std::str::FromStr;

use crate::models::Task;

/// Which tasks to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    /// Not done yet (todo or in progress)
    Pending,
    Completed,
    /// Not done and past its due moment
    Overdue,
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "pending" => Ok(Self::Pending),
            "completed" | "done" => Ok(Self::Completed),
            "overdue" => Ok(Self::Overdue),
            other => Err(format!(
                "invalid filter '{other}' (expected all, pending, completed or overdue)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    /// High priority first
    Priority,
    /// Earliest due first, undated last
    DueDate,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "priority" => Ok(Self::Priority),
            "due" | "due-date" => Ok(Self::DueDate),
            other => Err(format!(
                "invalid sort '{other}' (expected newest, oldest, priority or due)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub status: StatusFilter,
    pub search: Option<String>,
    pub sort: SortOrder,
}

/// Whether a task is past due at `now` (local wall-clock time). Done
/// tasks never are; a due date without a time runs to the end of that day.
pub fn is_overdue(task: &Task, now: NaiveDateTime) -> bool {
    if task.is_completed() {
        return false;
    }
    match (task.due_date, task.due_time) {
        (Some(date), Some(time)) => date.and_time(time) < now,
        (Some(date), None) => date < now.date(),
        (None, _) => false,
    }
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl TaskQuery {
    pub fn matches(&self, task: &Task) -> bool {
        self.matches_at(task, local_now())
    }

    pub fn matches_at(&self, task: &Task, now: NaiveDateTime) -> bool {
        let status_ok = match self.status {
            StatusFilter::All => true,
            StatusFilter::Pending => !task.is_completed(),
            StatusFilter::Completed => task.is_completed(),
            StatusFilter::Overdue => is_overdue(task, now),
        };
        if !status_ok {
            return false;
        }

        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                task.title.to_lowercase().contains(&term)
                    || task
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&term))
            }
        }
    }

    pub fn apply(&self, tasks: &[Task]) -> Vec<Task> {
        self.apply_at(tasks, local_now())
    }

    pub fn apply_at(&self, tasks: &[Task], now: NaiveDateTime) -> Vec<Task> {
        let mut selected: Vec<Task> = tasks
            .iter()
            .filter(|t| self.matches_at(t, now))
            .cloned()
            .collect();
        match self.sort {
            SortOrder::Newest => selected.sort_by_key(|t| Reverse(t.created_at)),
            SortOrder::Oldest => selected.sort_by_key(|t| t.created_at),
            SortOrder::Priority => {
                selected.sort_by_key(|t| (Reverse(t.priority), Reverse(t.created_at)))
            }
            SortOrder::DueDate => selected.sort_by_key(|t| {
                (t.due_date.is_none(), t.due_date, t.due_time, t.created_at)
            }),
        }
        selected
    }
}

/// Progress counters shown above the list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub overdue: usize,
    /// Rounded percentage of completed tasks
    pub progress: u8,
}

impl TaskStats {
    pub fn of(tasks: &[Task]) -> Self {
        Self::of_at(tasks, local_now())
    }

    pub fn of_at(tasks: &[Task], now: NaiveDateTime) -> Self {
        let total = tasks.len();
        let completed = tasks.iter().filter(|t| t.is_completed()).count();
        let progress = if total == 0 {
            0
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            total,
            completed,
            pending: total - completed,
            overdue: tasks.iter().filter(|t| is_overdue(t, now)).count(),
            progress,
        }
    }
}
