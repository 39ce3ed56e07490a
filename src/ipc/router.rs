use super::handlers;
use super::types::{AppState, Request};
use crate::access;
use crate::ipc::error::{err, HandlerErr};

pub async fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "dispatch");

    if let Some(resp) = handlers::core::try_handle(state, &req).await {
        return resp;
    }

    let Some(operation) = access::operation_for(&req.method) else {
        return err(
            &req.id,
            "not_implemented",
            format!("unknown method: {}", req.method),
            None,
        );
    };
    let role = state.role;
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = access::authorize(role, operation) {
        tracing::warn!(method = %req.method, %role, "request denied");
        return HandlerErr::from(e).response(&req.id);
    }

    if let Some(resp) = handlers::students::try_handle(session, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::classes::try_handle(session, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::plans::try_handle(session, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::progress::try_handle(session, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(session, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::exams::try_handle(session, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::finance::try_handle(session, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::settings::try_handle(session, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::dashboard::try_handle(session, &req).await {
        return resp;
    }
    if let Some(resp) = handlers::notifications::try_handle(session, &req).await {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
