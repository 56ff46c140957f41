//! Task field validation

use crate::models::{DESCRIPTION_MAX_CHARS, TITLE_MAX_CHARS, TaskDraft, TaskPatch};

/// Validates user input before it reaches storage.
///
/// Implementations return every violation found, not just the first one.
pub trait TaskValidator: Send + Sync {
    fn validate_draft(&self, draft: &TaskDraft) -> Result<(), Vec<String>>;

    fn validate_patch(&self, patch: &TaskPatch) -> Result<(), Vec<String>>;
}

/// Title and description rules used by the Clario UI
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultValidator;

impl TaskValidator for DefaultValidator {
    fn validate_draft(&self, draft: &TaskDraft) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        check_title(&draft.title, &mut errors);
        if let Some(description) = &draft.description {
            check_description(description, &mut errors);
        }
        finish(errors)
    }

    fn validate_patch(&self, patch: &TaskPatch) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if let Some(title) = &patch.title {
            check_title(title, &mut errors);
        }
        if let Some(Some(description)) = &patch.description {
            check_description(description, &mut errors);
        }
        finish(errors)
    }
}

fn check_title(title: &str, errors: &mut Vec<String>) {
    let title = title.trim();
    if title.is_empty() {
        errors.push("title is required".to_string());
    } else if title.chars().count() > TITLE_MAX_CHARS {
        errors.push(format!("title cannot exceed {TITLE_MAX_CHARS} characters"));
    }
}

fn check_description(description: &str, errors: &mut Vec<String>) {
    if description.trim().chars().count() > DESCRIPTION_MAX_CHARS {
        errors.push(format!(
            "description cannot exceed {DESCRIPTION_MAX_CHARS} characters"
        ));
    }
}

fn finish(errors: Vec<String>) -> Result<(), Vec<String>> {
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", false)]
    #[case("   ", false)]
    #[case("Buy milk", true)]
    #[case(&"x".repeat(100), true)]
    #[case(&"x".repeat(101), false)]
    #[case(&"é".repeat(100), true)]
    fn title_rules(#[case] title: &str, #[case] valid: bool) {
        let draft = TaskDraft::titled(title);
        assert_eq!(DefaultValidator.validate_draft(&draft).is_ok(), valid);
    }

    #[test]
    fn reports_every_violation() {
        let draft = TaskDraft {
            description: Some("d".repeat(501)),
            ..TaskDraft::default()
        };
        let errors = DefaultValidator.validate_draft(&draft).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn patch_only_checks_present_fields() {
        assert!(DefaultValidator.validate_patch(&TaskPatch::completed(true)).is_ok());
        assert!(DefaultValidator.validate_patch(&TaskPatch::title(" ")).is_err());

        let clear_description = TaskPatch {
            description: Some(None),
            ..TaskPatch::default()
        };
        assert!(DefaultValidator.validate_patch(&clear_description).is_ok());
    }
}
