use super::helpers::{calc_err, db_conn, new_id, optional_str, required_i64, required_str};
use crate::attendance;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use serde_json::json;

const RECORD_STATUSES: [&str; 6] = ["present", "absent", "late", "tardy", "excused", "unexcused"];

fn handle_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_group_id = match required_str(req, "classGroupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_date = match required_str(req, "sessionDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if NaiveDate::parse_from_str(&session_date, "%Y-%m-%d").is_err() {
        return err(
            &req.id,
            "bad_params",
            "sessionDate must be an ISO date (YYYY-MM-DD)",
            None,
        );
    }
    let status = match required_str(req, "status") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    if !RECORD_STATUSES.contains(&status.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("status must be one of: {}", RECORD_STATUSES.join(", ")),
            None,
        );
    }

    let id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO attendance_records(id, class_group_id, student_id, session_date, status)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &class_group_id, &student_id, &session_date, &status),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "recordId": id }))
}

fn handle_override_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_group_id = match required_str(req, "classGroupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let total_days = match required_i64(req, "totalDays") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let days_present = match required_i64(req, "daysPresent") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // The invariant is enforced here at write time; the reconciler still
    // clamps defensively in case a violated row reaches it.
    if days_present > total_days || total_days < 0 || days_present < 0 {
        return err(
            &req.id,
            "invalid_override",
            "daysPresent must be between 0 and totalDays",
            Some(json!({ "totalDays": total_days, "daysPresent": days_present })),
        );
    }

    if let Err(e) = conn.execute(
        "INSERT INTO attendance_overrides(id, student_id, class_group_id, term_id, total_days, days_present)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, class_group_id, term_id)
         DO UPDATE SET total_days = excluded.total_days,
                       days_present = excluded.days_present",
        (
            new_id(),
            &student_id,
            &class_group_id,
            &term_id,
            total_days,
            days_present,
        ),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "studentId": student_id, "classGroupId": class_group_id, "termId": term_id }),
    )
}

fn handle_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_group_id = optional_str(req, "classGroupId");

    match attendance::resolve_for_student(conn, &student_id, &term_id, class_group_id.as_deref()) {
        Ok(figures) => ok(&req.id, json!(figures)),
        Err(e) => calc_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(handle_record(state, req)),
        "attendance.overrideSet" => Some(handle_override_set(state, req)),
        "attendance.resolve" => Some(handle_resolve(state, req)),
        _ => None,
    }
}
