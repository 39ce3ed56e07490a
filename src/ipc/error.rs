use serde_json::json;

use crate::error::CoreError;
use crate::persistence::PersistenceError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Reply for a line that could not be parsed, so there is no id to echo.
pub fn bad_json(message: impl Into<String>) -> serde_json::Value {
    json!({
        "ok": false,
        "error": {
            "code": "bad_json",
            "message": message.into(),
        }
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<CoreError> for HandlerErr {
    fn from(e: CoreError) -> Self {
        let message = e.to_string();
        match e {
            CoreError::Validation(_) => HandlerErr {
                code: "bad_params",
                message,
                details: None,
            },
            CoreError::NotFound { kind, id } => HandlerErr {
                code: "not_found",
                message,
                details: Some(json!({ "kind": kind, "id": id })),
            },
            CoreError::Forbidden { role, operation } => HandlerErr {
                code: "forbidden",
                message,
                details: Some(json!({ "role": role, "operation": operation })),
            },
            CoreError::Persistence(p) => p.into(),
        }
    }
}

impl From<PersistenceError> for HandlerErr {
    fn from(e: PersistenceError) -> Self {
        let retryable = e.is_transient();
        HandlerErr {
            code: if retryable {
                "persistence_transient"
            } else {
                "persistence_rejected"
            },
            message: e.to_string(),
            details: Some(json!({ "retryable": retryable })),
        }
    }
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Operation, Role};
    use crate::persistence::EntityKind;

    #[test]
    fn core_errors_map_to_wire_codes() {
        let e: HandlerErr = CoreError::validation("unit must be between 1 and 30, got 31").into();
        assert_eq!(e.code, "bad_params");

        let e: HandlerErr = CoreError::not_found(EntityKind::Class, "c9").into();
        assert_eq!(e.code, "not_found");
        assert_eq!(e.details.unwrap()["kind"], "class");

        let e: HandlerErr = CoreError::Forbidden {
            role: Role::Parent,
            operation: Operation::RecordAttendance,
        }
        .into();
        assert_eq!(e.code, "forbidden");
        assert_eq!(e.details.unwrap()["operation"], "recordAttendance");
    }

    #[test]
    fn persistence_errors_carry_retry_hint() {
        let e: HandlerErr =
            CoreError::from(PersistenceError::Transport("database is locked".into())).into();
        assert_eq!(e.code, "persistence_transient");
        assert_eq!(e.details.unwrap()["retryable"], true);

        let e: HandlerErr = PersistenceError::Rejected("constraint".into()).into();
        assert_eq!(e.code, "persistence_rejected");
        assert_eq!(e.details.unwrap()["retryable"], false);
    }

    #[test]
    fn error_envelope_shape() {
        let v = HandlerErr::bad_params("missing studentId").response("7");
        assert_eq!(v["id"], "7");
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "bad_params");
        assert!(v["error"].get("details").is_none());
    }
}
