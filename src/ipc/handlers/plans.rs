use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_field, get_required_str, parse_params};
use crate::ipc::types::Request;
use crate::session::{PlanInput, Session};
use serde_json::json;

fn plans_list(session: &Session) -> Result<serde_json::Value, HandlerErr> {
    let store = session.store();
    let plans: Vec<serde_json::Value> = store
        .plans()
        .iter()
        .map(|p| {
            let students = store
                .find_students(|s| s.plan_id.as_deref() == Some(p.id.as_str()))
                .count();
            json!({
                "id": p.id,
                "name": p.name,
                "description": p.description,
                "pagesPerWeek": p.pages_per_week,
                "studentCount": students,
            })
        })
        .collect();
    Ok(json!({ "plans": plans }))
}

async fn plans_create(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input: PlanInput = parse_params(params)?;
    let plan = session.create_plan(input).await?;
    Ok(json!({ "planId": plan.id, "plan": plan }))
}

async fn plans_update(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let plan_id = get_required_str(params, "planId")?;
    let input: PlanInput = get_field(params, "patch").or_else(|_| parse_params(params))?;
    let plan = session.update_plan(&plan_id, input).await?;
    Ok(json!({ "plan": plan }))
}

async fn plans_delete(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let plan_id = get_required_str(params, "planId")?;
    let detached = session.delete_plan(&plan_id).await?;
    Ok(json!({ "ok": true, "detachedStudents": detached }))
}

pub async fn try_handle(session: &mut Session, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "plans.list" => plans_list(session),
        "plans.create" => plans_create(session, p).await,
        "plans.update" => plans_update(session, p).await,
        "plans.delete" => plans_delete(session, p).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
