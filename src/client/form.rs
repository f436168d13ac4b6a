//! Task form state and client-side validation.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::tasks::model::{
    MAX_DESCRIPTION_LEN, MAX_TITLE_LEN, NewTask, Priority, Task, TaskPatch, TaskStatus,
};

/// Raw form input, as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskForm {
    pub title: String,
    pub description: String,
    pub priority: String,
    /// `YYYY-MM-DD` or RFC 3339.
    pub due_date: String,
    pub status: Option<TaskStatus>,
}

/// Field name to error message.
pub type FormErrors = BTreeMap<&'static str, String>;

/// Validated form values.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: Option<TaskStatus>,
}

impl TaskForm {
    /// Prefill the form for editing `task`.
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
            priority: task
                .priority
                .map(|p| u8::from(p).to_string())
                .unwrap_or_default(),
            due_date: task
                .due_date
                .map(|d| d.date_naive().to_string())
                .unwrap_or_default(),
            status: Some(task.status),
        }
    }

    pub fn validate(&self) -> Result<ValidTask, FormErrors> {
        let mut errors = FormErrors::new();

        let title = self.title.trim();
        if title.is_empty() {
            errors.insert("title", "Title is required".to_string());
        } else if title.chars().count() > MAX_TITLE_LEN {
            errors.insert(
                "title",
                format!("Title must be at most {MAX_TITLE_LEN} characters"),
            );
        }

        let description = self.description.trim();
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.insert(
                "description",
                format!("Description must be at most {MAX_DESCRIPTION_LEN} characters"),
            );
        }

        let priority = match self.priority.trim() {
            "" => None,
            raw => match raw.parse::<u8>().ok().and_then(|n| Priority::try_from(n).ok()) {
                Some(p) => Some(p),
                None => {
                    errors.insert("priority", "Priority must be 1, 2 or 3".to_string());
                    None
                }
            },
        };

        let due_date = match self.due_date.trim() {
            "" => None,
            raw => match parse_due_date(raw) {
                Some(d) => Some(d),
                None => {
                    errors.insert("due_date", "Invalid due date".to_string());
                    None
                }
            },
        };

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(ValidTask {
            title: title.to_string(),
            description: (!description.is_empty()).then(|| description.to_string()),
            priority,
            due_date,
            status: self.status,
        })
    }

    pub fn to_new_task(&self) -> Result<NewTask, FormErrors> {
        let valid = self.validate()?;
        Ok(NewTask {
            title: valid.title,
            description: valid.description,
            priority: valid.priority,
            due_date: valid.due_date,
            status: valid.status,
        })
    }

    /// Patch carrying every form field. Blank optional fields clear the
    /// stored value.
    pub fn to_patch(&self) -> Result<TaskPatch, FormErrors> {
        let valid = self.validate()?;
        Ok(TaskPatch {
            title: Some(valid.title),
            description: Some(valid.description),
            priority: Some(valid.priority),
            due_date: Some(valid.due_date),
            status: valid.status,
        })
    }
}

fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
