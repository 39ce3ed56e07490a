use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_field, get_optional_str, get_required_str, parse_params};
use crate::ipc::types::Request;
use crate::model::Student;
use crate::progress::UNIT_COUNT;
use crate::session::{Session, StudentInput, StudentPatch};
use serde::Serialize;
use serde_json::json;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentRow<'a> {
    #[serde(flatten)]
    student: &'a Student,
    total_pages: usize,
}

fn row<'a>(session: &Session, student: &'a Student) -> StudentRow<'a> {
    StudentRow {
        student,
        total_pages: session.progress().total_completed(&student.id),
    }
}

fn students_list(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId");
    if let Some(cid) = class_id.as_deref() {
        session.store().class(cid)?;
    }
    let needle = get_optional_str(params, "search").map(|s| s.to_lowercase());

    let students: Vec<StudentRow> = session
        .store()
        .find_students(move |s| {
            class_id.as_deref().map_or(true, |cid| s.class_id.as_deref() == Some(cid))
                && needle
                    .as_deref()
                    .map_or(true, |n| s.name.to_lowercase().contains(n))
        })
        .map(|s| row(session, s))
        .collect();
    Ok(json!({ "students": students }))
}

async fn students_create(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input: StudentInput = parse_params(params)?;
    let student = session.create_student(input).await?;
    Ok(json!({ "studentId": student.id, "student": student }))
}

async fn students_update(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let patch: StudentPatch = if params.get("patch").is_some() {
        get_field(params, "patch")?
    } else {
        parse_params(params)?
    };
    let student = session.update_student(&student_id, patch).await?;
    Ok(json!({ "student": student }))
}

async fn students_delete(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    session.delete_student(&student_id).await?;
    Ok(json!({ "ok": true }))
}

async fn students_assign_class(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_ids: Vec<String> = get_field(params, "studentIds")?;
    let class_id = get_optional_str(params, "classId");
    let updated = session
        .assign_class(&student_ids, class_id.as_deref())
        .await?;
    Ok(json!({ "updated": updated, "classId": class_id }))
}

async fn students_update_note(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let notes = params
        .get("notes")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let student = session.update_note(&student_id, &notes).await?;
    Ok(json!({ "studentId": student.id, "notes": student.notes }))
}

fn students_profile(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let store = session.store();
    let student = store.student(&student_id)?;
    let class = student.class_id.as_deref().and_then(|id| store.class(id).ok());
    let plan = student.plan_id.as_deref().and_then(|id| store.plan(id).ok());

    let progress = session.progress().get(&student_id);
    let units: Vec<serde_json::Value> = (1..=UNIT_COUNT)
        .filter_map(|u| {
            let pages = progress.map(|p| p.pages(u)).unwrap_or_default();
            if pages.is_empty() {
                return None;
            }
            Some(json!({ "unit": u, "completed": pages.len(), "pages": pages }))
        })
        .collect();

    Ok(json!({
        "student": student,
        "class": class,
        "plan": plan,
        "units": units,
        "totalPages": session.progress().total_completed(&student_id),
        "exams": session.exams().for_student(&student_id),
    }))
}

pub async fn try_handle(session: &mut Session, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "students.list" => students_list(session, p),
        "students.create" => students_create(session, p).await,
        "students.update" => students_update(session, p).await,
        "students.delete" => students_delete(session, p).await,
        "students.assignClass" => students_assign_class(session, p).await,
        "students.updateNote" => students_update_note(session, p).await,
        "students.profile" => students_profile(session, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
