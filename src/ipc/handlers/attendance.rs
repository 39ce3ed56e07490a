use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{
    get_date, get_field, get_month, get_optional_month, get_optional_str, get_required_str,
    get_usize_or,
};
use crate::ipc::types::Request;
use crate::model::{AttendanceStatus, MonthKey, Student};
use crate::session::Session;
use serde_json::json;
use std::collections::BTreeMap;

pub const DEFAULT_TRAILING_MONTHS: usize = 6;
const MAX_TRAILING_MONTHS: usize = 60;

pub fn trailing_months(params: &serde_json::Value) -> Result<usize, HandlerErr> {
    let months = get_usize_or(params, "months", DEFAULT_TRAILING_MONTHS)?;
    if months == 0 || months > MAX_TRAILING_MONTHS {
        return Err(HandlerErr::bad_params(format!(
            "months must be between 1 and {}",
            MAX_TRAILING_MONTHS
        )));
    }
    Ok(months)
}

pub fn current_month(params: &serde_json::Value) -> Result<MonthKey, HandlerErr> {
    Ok(get_optional_month(params, "now")?
        .unwrap_or_else(|| MonthKey::of(chrono::Local::now().date_naive())))
}

fn roster<'a>(session: &'a Session, class_id: Option<&str>) -> Result<Vec<&'a Student>, HandlerErr> {
    let store = session.store();
    match class_id {
        Some(cid) => {
            store.class(cid)?;
            Ok(store.students_in_class(cid))
        }
        None => Ok(store.students().iter().collect()),
    }
}

fn attendance_day(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_date(params, "date")?;
    let class_id = get_optional_str(params, "classId");
    let students = roster(session, class_id.as_deref())?;

    let day = session.attendance().day(date);
    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            json!({
                "studentId": s.id,
                "name": s.name,
                "status": day.get(&s.id),
            })
        })
        .collect();
    let count = |status: AttendanceStatus| {
        students
            .iter()
            .filter(|s| day.get(&s.id) == Some(&status))
            .count()
    };

    Ok(json!({
        "date": date,
        "rows": rows,
        "present": count(AttendanceStatus::Present),
        "absent": count(AttendanceStatus::Absent),
    }))
}

async fn attendance_save(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_date(params, "date")?;
    let statuses: BTreeMap<String, AttendanceStatus> = get_field(params, "statuses")?;
    let saved = session.save_attendance(date, &statuses).await?;
    Ok(json!({ "date": date, "saved": saved }))
}

fn attendance_monthly_report(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let month = get_month(params, "month")?;
    let class = session.store().class(&class_id)?;
    let students = session.store().students_in_class(&class_id);
    let matrix = session.attendance().monthly_matrix(&students, month);
    Ok(json!({
        "classId": class.id,
        "className": class.name,
        "report": matrix,
    }))
}

fn attendance_trailing(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let months = trailing_months(params)?;
    let now = current_month(params)?;
    Ok(json!({ "series": session.attendance().trailing_totals(months, now) }))
}

pub async fn try_handle(session: &mut Session, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "attendance.day" => attendance_day(session, p),
        "attendance.save" => attendance_save(session, p).await,
        "attendance.monthlyReport" => attendance_monthly_report(session, p),
        "attendance.trailing" => attendance_trailing(session, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
