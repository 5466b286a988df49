use super::helpers::{db_conn, new_id, optional_i64, required_str};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use serde_json::json;

fn parse_date(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let raw = required_str(req, key)?;
    match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(_) => Ok(raw),
        Err(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be an ISO date (YYYY-MM-DD)", key),
            None,
        )),
    }
}

fn handle_school_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = new_id();
    if let Err(e) = conn.execute("INSERT INTO schools(id, name) VALUES(?, ?)", (&id, &name)) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "schoolId": id }))
}

fn handle_campus_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO campuses(id, school_id, name) VALUES(?, ?, ?)",
        (&id, &school_id, &name),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "campusId": id }))
}

fn handle_term_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match required_str(req, "session") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start_date = match parse_date(req, "startDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end_date = match parse_date(req, "endDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let total_school_days = optional_i64(req, "totalSchoolDays");

    let id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO terms(id, school_id, session, name, start_date, end_date, total_school_days)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &school_id,
            &session,
            &name,
            &start_date,
            &end_date,
            total_school_days,
        ),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "termId": id }))
}

fn handle_class_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let campus_id = match required_str(req, "campusId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO academic_classes(id, school_id, campus_id, name) VALUES(?, ?, ?, ?)",
        (&id, &school_id, &campus_id, &name),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classId": id }))
}

fn handle_arm_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO arms(id, class_id, name) VALUES(?, ?, ?)",
        (&id, &class_id, &name),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "armId": id }))
}

fn handle_subject_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, school_id, name) VALUES(?, ?, ?)",
        (&id, &school_id, &name),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "subjectId": id }))
}

fn handle_class_group_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO class_groups(id, school_id, name) VALUES(?, ?, ?)",
        (&id, &school_id, &name),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classGroupId": id }))
}

fn handle_group_member_set(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if let Err(e) = conn.execute(
        "INSERT INTO class_group_memberships(class_group_id, student_id, active)
         VALUES(?, ?, ?)
         ON CONFLICT(class_group_id, student_id) DO UPDATE SET active = excluded.active",
        (&class_group_id, &student_id, active as i64),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classGroupId": class_group_id, "studentId": student_id }))
}

const STUDENT_STATUSES: [&str; 5] = ["active", "withdrawn", "graduated", "expelled", "inactive"];

fn handle_student_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let campus_id = match required_str(req, "campusId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let arm_id = match required_str(req, "armId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, school_id, campus_id, class_id, arm_id, last_name, first_name, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'active')",
        (
            &id,
            &school_id,
            &campus_id,
            &class_id,
            &arm_id,
            &last_name,
            &first_name,
        ),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": id }))
}

fn handle_student_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    if !STUDENT_STATUSES.contains(&status.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("status must be one of: {}", STUDENT_STATUSES.join(", ")),
            None,
        );
    }

    let updated = match conn.execute(
        "UPDATE students SET status = ? WHERE id = ?",
        (&status, &student_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }
    ok(&req.id, json!({ "studentId": student_id, "status": status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.schoolCreate" => Some(handle_school_create(state, req)),
        "setup.campusCreate" => Some(handle_campus_create(state, req)),
        "setup.termCreate" => Some(handle_term_create(state, req)),
        "setup.classCreate" => Some(handle_class_create(state, req)),
        "setup.armCreate" => Some(handle_arm_create(state, req)),
        "setup.subjectCreate" => Some(handle_subject_create(state, req)),
        "setup.classGroupCreate" => Some(handle_class_group_create(state, req)),
        "setup.groupMemberSet" => Some(handle_group_member_set(state, req)),
        "students.create" => Some(handle_student_create(state, req)),
        "students.setStatus" => Some(handle_student_set_status(state, req)),
        _ => None,
    }
}
