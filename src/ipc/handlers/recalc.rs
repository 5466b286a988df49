use super::helpers::{calc_err, db_conn, optional_str, required_str};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::recalc;
use serde_json::json;

fn handle_recalculate_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scheme_id = match required_str(req, "gradingSchemeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = optional_str(req, "termId");

    match recalc::recalculate_all(conn, &scheme_id, term_id.as_deref()) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => calc_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.recalculateAll" => Some(handle_recalculate_all(state, req)),
        _ => None,
    }
}
