use crate::access::Role;
use crate::ipc::error::{err, ok, respond, HandlerErr};
use crate::ipc::params::{get_optional_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::persistence::SqlitePersistence;
use crate::session::Session;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "role": state.role,
        }),
    )
}

async fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let role = match get_optional_str(&req.params, "role") {
        None => Role::Teacher,
        Some(raw) => match raw.parse::<Role>() {
            Ok(r) => r,
            Err(e) => return HandlerErr::from(e).response(&req.id),
        },
    };

    let persistence = match SqlitePersistence::open(&path) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    let session = match Session::open(Arc::new(persistence)).await {
        Ok(s) => s,
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };

    tracing::info!(workspace = %path.display(), %role, "workspace opened");
    let students = session.store().students().len();
    state.workspace = Some(path.clone());
    state.session = Some(session);
    state.role = role;
    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "role": role,
            "students": students,
        }),
    )
}

fn handle_set_role(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let role: Role = get_required_str(&req.params, "role")?.parse()?;
    tracing::info!(from = %state.role, to = %role, "role changed");
    state.role = role;
    Ok(json!({ "role": role }))
}

async fn handle_reload(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let Some(session) = state.session.as_mut() else {
        return Err(HandlerErr {
            code: "no_workspace",
            message: "select a workspace first".to_string(),
            details: None,
        });
    };
    session.reload().await?;
    Ok(json!({ "students": session.store().students().len() }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req).await),
        "session.setRole" => Some(respond(&req.id, handle_set_role(state, req))),
        "session.reload" => Some(respond(&req.id, handle_reload(state).await)),
        _ => None,
    }
}
