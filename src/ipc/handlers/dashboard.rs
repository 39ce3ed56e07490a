use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_optional_date, get_usize_or};
use crate::ipc::types::Request;
use crate::session::Session;
use serde_json::json;

const DEFAULT_TOP_STUDENTS: usize = 5;

fn dashboard_summary(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = get_optional_date(params, "today")?
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    Ok(json!({
        "summary": session.aggregates().summary(today),
        "currency": session.settings().currency,
        "unreadNotifications": session.unread_count(),
    }))
}

fn dashboard_top_students(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let limit = get_usize_or(params, "limit", DEFAULT_TOP_STUDENTS)?;
    Ok(json!({ "students": session.aggregates().top_students_by_progress(limit) }))
}

fn dashboard_class_distribution(session: &Session) -> Result<serde_json::Value, HandlerErr> {
    let unassigned = session
        .store()
        .find_students(|s| s.class_id.is_none())
        .count();
    Ok(json!({
        "classes": session.aggregates().class_distribution(),
        "unassigned": unassigned,
    }))
}

pub async fn try_handle(session: &mut Session, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "dashboard.summary" => dashboard_summary(session, p),
        "dashboard.topStudents" => dashboard_top_students(session, p),
        "dashboard.classDistribution" => dashboard_class_distribution(session),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
