use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

text_enum!(Role {
    Student => "student",
    Teacher => "teacher",
    Admin => "admin",
});

/// Actions gated by role. Checked in handlers and services, never only in the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    TakeQuizzes,
    ManageQuizzes,
    ViewUnpublished,
    ViewAllAttempts,
    ViewAnalytics,
    GradeAttempts,
}

impl Capability {
    fn describe(&self) -> &'static str {
        match self {
            Capability::TakeQuizzes => "take quizzes",
            Capability::ManageQuizzes => "manage quizzes",
            Capability::ViewUnpublished => "view unpublished quizzes",
            Capability::ViewAllAttempts => "view attempts of other students",
            Capability::ViewAnalytics => "view quiz analytics",
            Capability::GradeAttempts => "grade attempts",
        }
    }
}

impl Role {
    pub fn allows(&self, capability: Capability) -> bool {
        match self {
            Role::Student => matches!(capability, Capability::TakeQuizzes),
            Role::Teacher | Role::Admin => !matches!(capability, Capability::TakeQuizzes),
        }
    }
}

/// The authenticated caller, passed explicitly into every operation that makes an
/// authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: Uuid,
    pub role: Role,
}

impl Viewer {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.role.allows(capability)
    }

    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "role '{}' may not {}",
                self.role,
                capability.describe()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn students_only_take_quizzes() {
        let student = Viewer::new(Uuid::new_v4(), Role::Student);
        assert!(student.can(Capability::TakeQuizzes));
        assert!(!student.can(Capability::ManageQuizzes));
        assert!(!student.can(Capability::ViewAnalytics));
        assert!(matches!(
            student.require(Capability::GradeAttempts),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn staff_manage_but_do_not_take() {
        for role in [Role::Teacher, Role::Admin] {
            let viewer = Viewer::new(Uuid::new_v4(), role);
            assert!(viewer.require(Capability::ManageQuizzes).is_ok());
            assert!(viewer.require(Capability::ViewAllAttempts).is_ok());
            assert!(!viewer.can(Capability::TakeQuizzes));
        }
    }

    #[test]
    fn role_parses_from_claim_text() {
        assert_eq!("teacher".parse::<Role>(), Ok(Role::Teacher));
        assert!("parent".parse::<Role>().is_err());
    }
}
