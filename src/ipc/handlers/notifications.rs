use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::get_required_str;
use crate::ipc::types::Request;
use crate::session::Session;
use serde_json::json;

fn notifications_list(session: &Session) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "notifications": session.notifications(),
        "unread": session.unread_count(),
    }))
}

async fn notifications_mark_read(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    session.mark_notification_read(&id).await?;
    Ok(json!({ "unread": session.unread_count() }))
}

async fn notifications_mark_all_read(session: &mut Session) -> Result<serde_json::Value, HandlerErr> {
    let marked = session.mark_all_notifications_read().await?;
    Ok(json!({ "marked": marked, "unread": session.unread_count() }))
}

async fn notifications_clear(session: &mut Session) -> Result<serde_json::Value, HandlerErr> {
    let cleared = session.clear_notifications().await?;
    Ok(json!({ "cleared": cleared }))
}

pub async fn try_handle(session: &mut Session, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "notifications.list" => notifications_list(session),
        "notifications.markRead" => notifications_mark_read(session, &req.params).await,
        "notifications.markAllRead" => notifications_mark_all_read(session).await,
        "notifications.clear" => notifications_clear(session).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
