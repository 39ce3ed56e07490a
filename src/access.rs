//! Role → permitted operations.
//!
//! Every gated IPC method maps to exactly one [`Operation`], and the router
//! checks it once through [`authorize`] before dispatching.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Parent,
    Anonymous,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
            Role::Anonymous => "anonymous",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "parent" => Ok(Role::Parent),
            "anonymous" | "" => Ok(Role::Anonymous),
            other => Err(CoreError::validation(format!("unknown role {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    ViewRoster,
    ViewProfile,
    ManageStudents,
    EditNotes,
    AssignClass,
    ManageClasses,
    ManagePlans,
    RecordProgress,
    ViewAttendance,
    RecordAttendance,
    ViewAttendanceReport,
    RecordExams,
    ViewFinance,
    ManageFinance,
    ManageExpenses,
    ViewSettings,
    UpdateTheme,
    ManageCurrency,
    ManageExamFields,
    ViewDashboard,
    ManageNotifications,
    ResetData,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::ViewRoster => "view the roster",
            Operation::ViewProfile => "view student profiles",
            Operation::ManageStudents => "manage students",
            Operation::EditNotes => "edit student notes",
            Operation::AssignClass => "assign classes",
            Operation::ManageClasses => "manage classes",
            Operation::ManagePlans => "manage plans",
            Operation::RecordProgress => "record progress",
            Operation::ViewAttendance => "view attendance",
            Operation::RecordAttendance => "record attendance",
            Operation::ViewAttendanceReport => "view attendance reports",
            Operation::RecordExams => "record exams",
            Operation::ViewFinance => "view finances",
            Operation::ManageFinance => "manage payment statuses",
            Operation::ManageExpenses => "manage expenses",
            Operation::ViewSettings => "view settings",
            Operation::UpdateTheme => "change the theme",
            Operation::ManageCurrency => "change the currency",
            Operation::ManageExamFields => "configure exam fields",
            Operation::ViewDashboard => "view the dashboard",
            Operation::ManageNotifications => "manage notifications",
            Operation::ResetData => "reset all data",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn permits(role: Role, op: Operation) -> bool {
    use Operation::*;
    match role {
        Role::Admin => true,
        Role::Teacher => !matches!(
            op,
            ViewFinance
                | ManageFinance
                | ManageExpenses
                | ManageCurrency
                | ManageExamFields
                | ResetData
        ),
        Role::Parent => matches!(op, ViewProfile | ViewSettings),
        Role::Anonymous => matches!(op, ViewSettings),
    }
}

pub fn authorize(role: Role, operation: Operation) -> Result<()> {
    if permits(role, operation) {
        Ok(())
    } else {
        Err(CoreError::Forbidden { role, operation })
    }
}

/// The operation a domain method needs. `None` for methods that are not
/// part of the domain surface.
pub fn operation_for(method: &str) -> Option<Operation> {
    use Operation::*;
    let op = match method {
        "students.list" | "classes.list" | "plans.list" => ViewRoster,
        "students.profile" | "progress.get" | "exams.listForStudent" => ViewProfile,
        "students.create" | "students.update" | "students.delete" => ManageStudents,
        "students.updateNote" => EditNotes,
        "students.assignClass" => AssignClass,
        "classes.create" | "classes.update" | "classes.delete" => ManageClasses,
        "plans.create" | "plans.update" | "plans.delete" => ManagePlans,
        "progress.markRange" | "progress.togglePage" => RecordProgress,
        "attendance.day" | "attendance.trailing" => ViewAttendance,
        "attendance.save" => RecordAttendance,
        "attendance.monthlyReport" => ViewAttendanceReport,
        "exams.record" => RecordExams,
        "finance.month" | "finance.summary" | "finance.trailing" | "expenses.list" => {
            ViewFinance
        }
        "finance.save" => ManageFinance,
        "expenses.add" | "expenses.delete" => ManageExpenses,
        "settings.get" => ViewSettings,
        "settings.update" => UpdateTheme,
        "settings.setCurrency" => ManageCurrency,
        "settings.examFields.add" | "settings.examFields.remove" => ManageExamFields,
        "dashboard.summary" | "dashboard.topStudents" | "dashboard.classDistribution" => {
            ViewDashboard
        }
        "notifications.list"
        | "notifications.markRead"
        | "notifications.markAllRead"
        | "notifications.clear" => ManageNotifications,
        "workspace.reset" => ResetData,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_may_do_everything() {
        for m in ["finance.save", "expenses.add", "settings.examFields.remove", "students.delete"] {
            let op = operation_for(m).unwrap();
            assert!(authorize(Role::Admin, op).is_ok(), "{}", m);
        }
    }

    #[test]
    fn teacher_is_kept_out_of_money_and_configuration() {
        for m in ["finance.save", "finance.month", "expenses.delete", "settings.setCurrency", "settings.examFields.add"] {
            let op = operation_for(m).unwrap();
            assert!(
                matches!(authorize(Role::Teacher, op), Err(CoreError::Forbidden { .. })),
                "{}",
                m
            );
        }
        for m in ["students.create", "progress.togglePage", "attendance.save", "exams.record", "settings.update", "attendance.monthlyReport"] {
            assert!(authorize(Role::Teacher, operation_for(m).unwrap()).is_ok(), "{}", m);
        }
    }

    #[test]
    fn only_admin_may_reset() {
        let op = operation_for("workspace.reset").unwrap();
        assert_eq!(op, Operation::ResetData);
        assert!(permits(Role::Admin, op));
        for role in [Role::Teacher, Role::Parent, Role::Anonymous] {
            assert!(!permits(role, op), "{}", role);
        }
    }

    #[test]
    fn parent_and_anonymous_cannot_mutate() {
        let mutations = [
            "students.create",
            "students.updateNote",
            "classes.delete",
            "progress.markRange",
            "attendance.save",
            "notifications.markAllRead",
            "notifications.clear",
        ];
        for m in mutations {
            let op = operation_for(m).unwrap();
            assert!(!permits(Role::Parent, op), "{}", m);
            assert!(!permits(Role::Anonymous, op), "{}", m);
        }
        assert!(permits(Role::Parent, operation_for("students.profile").unwrap()));
        assert!(!permits(Role::Anonymous, operation_for("students.profile").unwrap()));
    }

    #[test]
    fn unknown_methods_have_no_operation() {
        assert_eq!(operation_for("students.explode"), None);
        assert_eq!(operation_for("health"), None);
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("principal".parse::<Role>().is_err());
    }
}
