use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_optional_u8, get_required_str, get_u8};
use crate::ipc::types::Request;
use crate::session::Session;
use serde_json::json;

fn progress_get(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let progress = session.progress().staged(&student_id)?;
    Ok(json!({
        "studentId": student_id,
        "units": progress,
        "totalPages": progress.total_completed(),
    }))
}

async fn progress_mark_range(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let unit = get_u8(params, "unit")?;
    let from_page = get_u8(params, "fromPage")?;
    let to_page = get_optional_u8(params, "toPage")?.unwrap_or(from_page);

    let change = session
        .mark_range(&student_id, unit, from_page, to_page)
        .await?;
    let pages = session
        .progress()
        .get(&student_id)
        .map(|p| p.pages(unit))
        .unwrap_or_default();
    Ok(json!({
        "studentId": student_id,
        "unit": unit,
        "added": change.added,
        "pages": pages,
        "completedInUnit": change.completed_in_unit,
        "totalPages": change.total_completed,
    }))
}

async fn progress_toggle_page(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let unit = get_u8(params, "unit")?;
    let page = get_u8(params, "page")?;

    let completed = session.toggle_page(&student_id, unit, page).await?;
    Ok(json!({
        "studentId": student_id,
        "unit": unit,
        "page": page,
        "completed": completed,
        "completedInUnit": session.progress().completed_count(&student_id, unit),
        "totalPages": session.progress().total_completed(&student_id),
    }))
}

pub async fn try_handle(session: &mut Session, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "progress.get" => progress_get(session, p),
        "progress.markRange" => progress_mark_range(session, p).await,
        "progress.togglePage" => progress_toggle_page(session, p).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
