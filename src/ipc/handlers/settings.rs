use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::{get_field, get_optional_str, get_required_str, get_usize_or};
use crate::ipc::types::Request;
use crate::model::Theme;
use crate::session::Session;
use serde_json::json;

fn settings_get(session: &Session) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({ "settings": session.settings() }))
}

async fn settings_update(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let theme: Option<Theme> = match params.get("theme") {
        None | Some(serde_json::Value::Null) => None,
        Some(_) => Some(get_field(params, "theme")?),
    };
    let accent = get_optional_str(params, "accentColor");
    if theme.is_none() && accent.is_none() {
        return Err(HandlerErr::bad_params("nothing to update"));
    }
    let settings = session.update_appearance(theme, accent.as_deref()).await?;
    Ok(json!({ "settings": settings }))
}

async fn settings_set_currency(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let currency = get_required_str(params, "currency")?;
    let settings = session.set_currency(&currency).await?;
    Ok(json!({ "settings": settings }))
}

async fn exam_fields_add(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let max_mark: u32 = get_field(params, "maxMark")?;
    let settings = session.add_exam_field(&name, max_mark).await?;
    Ok(json!({ "examFields": settings.exam_fields }))
}

async fn exam_fields_remove(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    if params.get("index").is_none() {
        return Err(HandlerErr::bad_params("missing index"));
    }
    let index = get_usize_or(params, "index", 0)?;
    let settings = session.remove_exam_field(index).await?;
    Ok(json!({ "examFields": settings.exam_fields }))
}

/// Wipes every collection. Admin only; the router enforces that.
async fn workspace_reset(session: &mut Session) -> Result<serde_json::Value, HandlerErr> {
    let removed = session.reset_all().await?;
    Ok(json!({ "removed": removed }))
}

pub async fn try_handle(session: &mut Session, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "settings.get" => settings_get(session),
        "settings.update" => settings_update(session, p).await,
        "settings.setCurrency" => settings_set_currency(session, p).await,
        "settings.examFields.add" => exam_fields_add(session, p).await,
        "settings.examFields.remove" => exam_fields_remove(session, p).await,
        "workspace.reset" => workspace_reset(session).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
