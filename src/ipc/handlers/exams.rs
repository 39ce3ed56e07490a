use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_field, get_required_str, get_u8};
use crate::ipc::types::Request;
use crate::session::Session;
use serde_json::json;
use std::collections::BTreeMap;

async fn exams_record(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let name = get_required_str(params, "name")?;
    let unit = get_u8(params, "unit")?;
    let scores: BTreeMap<String, i64> = get_field(params, "scores")?;

    let exam = session.record_exam(&student_id, &name, unit, &scores).await?;
    Ok(json!({ "examId": exam.id, "exam": exam }))
}

fn exams_list_for_student(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    session.store().student(&student_id)?;
    Ok(json!({ "exams": session.exams().for_student(&student_id) }))
}

pub async fn try_handle(session: &mut Session, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "exams.record" => exams_record(session, p).await,
        "exams.listForStudent" => exams_list_for_student(session, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
