use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_field, get_required_str, parse_params};
use crate::ipc::types::Request;
use crate::session::{ClassInput, Session};
use serde_json::json;

fn classes_list(session: &Session) -> Result<serde_json::Value, HandlerErr> {
    let store = session.store();
    let classes: Vec<serde_json::Value> = store
        .classes()
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "schedule": c.schedule,
                "fee": c.fee,
                "photo": c.photo,
                "teacherId": c.teacher_id,
                "studentCount": store.students_in_class(&c.id).len(),
            })
        })
        .collect();
    Ok(json!({ "classes": classes }))
}

async fn classes_create(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input: ClassInput = parse_params(params)?;
    let class = session.create_class(input).await?;
    Ok(json!({ "classId": class.id, "class": class }))
}

async fn classes_update(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let input: ClassInput = get_field(params, "patch").or_else(|_| parse_params(params))?;
    let class = session.update_class(&class_id, input).await?;
    Ok(json!({ "class": class }))
}

async fn classes_delete(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let unassigned = session.delete_class(&class_id).await?;
    Ok(json!({ "ok": true, "unassignedStudents": unassigned }))
}

pub async fn try_handle(session: &mut Session, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "classes.list" => classes_list(session),
        "classes.create" => classes_create(session, p).await,
        "classes.update" => classes_update(session, p).await,
        "classes.delete" => classes_delete(session, p).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
