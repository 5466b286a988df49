use super::helpers::{calc_err, db_conn, required_str};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::report;
use serde_json::json;

fn handle_student_term_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match report::build_student_term_report(conn, &student_id, &term_id) {
        Ok(payload) => ok(&req.id, json!(payload)),
        Err(e) => calc_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.studentTermReport" => Some(handle_student_term_report(state, req)),
        _ => None,
    }
}
