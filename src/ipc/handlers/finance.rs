use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::attendance::{current_month, trailing_months};
use crate::ipc::params::{get_date, get_field, get_money, get_month, get_optional_month, get_required_str};
use crate::ipc::types::Request;
use crate::model::PaymentStatus;
use crate::session::Session;
use serde_json::json;
use std::collections::BTreeMap;

fn finance_month(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let month = get_month(params, "month")?;
    let store = session.store();
    let fees = store.fee_table();
    let finance = session.finance();

    let rows: Vec<serde_json::Value> = store
        .students()
        .iter()
        .map(|s| {
            json!({
                "studentId": s.id,
                "name": s.name,
                "classId": s.class_id,
                "fee": fees.fee(&s.id).unwrap_or_default(),
                "expected": finance.expected_amount(month, &s.id, &fees),
                "status": finance.status(month, &s.id),
            })
        })
        .collect();
    Ok(json!({
        "month": month,
        "rows": rows,
        "summary": finance.summary(month, &fees),
    }))
}

async fn finance_save(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let month = get_month(params, "month")?;
    let statuses: BTreeMap<String, PaymentStatus> = get_field(params, "statuses")?;
    let saved = session.save_financials(month, &statuses).await?;
    Ok(json!({ "month": month, "saved": saved }))
}

fn finance_summary(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let month = get_month(params, "month")?;
    let fees = session.store().fee_table();
    Ok(json!({
        "summary": session.finance().summary(month, &fees),
        "currency": session.settings().currency,
    }))
}

fn finance_trailing(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let months = trailing_months(params)?;
    let now = current_month(params)?;
    let fees = session.store().fee_table();
    Ok(json!({ "series": session.finance().trailing_series(months, now, &fees) }))
}

fn expenses_list(session: &Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let month = get_optional_month(params, "month")?;
    let expenses: Vec<_> = session
        .finance()
        .expenses()
        .iter()
        .filter(|e| month.map_or(true, |m| m.contains(e.date)))
        .collect();
    Ok(json!({ "expenses": expenses }))
}

async fn expenses_add(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let description = get_required_str(params, "description")?;
    let amount = get_money(params, "amount")?;
    let date = get_date(params, "date")?;
    let expense = session.add_expense(&description, amount, date).await?;
    Ok(json!({ "expenseId": expense.id, "expense": expense }))
}

async fn expenses_delete(session: &mut Session, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let expense_id = get_required_str(params, "expenseId")?;
    session.delete_expense(&expense_id).await?;
    Ok(json!({ "ok": true }))
}

pub async fn try_handle(session: &mut Session, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "finance.month" => finance_month(session, p),
        "finance.save" => finance_save(session, p).await,
        "finance.summary" => finance_summary(session, p),
        "finance.trailing" => finance_trailing(session, p),
        "expenses.list" => expenses_list(session, p),
        "expenses.add" => expenses_add(session, p).await,
        "expenses.delete" => expenses_delete(session, p).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
