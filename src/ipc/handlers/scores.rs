use super::helpers::{calc_err, db_conn, new_id, optional_str, required_str};
use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::recalc;
use rusqlite::OptionalExtension;
use serde_json::json;

/// Manual save: upserts the raw component scores and immediately derives
/// total and grade under the entry's effective scheme.
fn handle_score_save(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(components_raw) = req.params.get("components") else {
        return err(&req.id, "bad_params", "missing components", None);
    };

    let components = match grading::parse_components(components_raw) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let school_id: Option<String> = match conn
        .query_row(
            "SELECT school_id FROM academic_classes WHERE id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(school_id) = school_id else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let scheme = match grading::effective_scheme_id(conn, &school_id, &subject_id)
        .and_then(|id| grading::load_scheme(conn, &id))
    {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let total = grading::aggregate_components(&components);
    let resolution = match grading::resolve_grade(total, &scheme) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let components_json = serde_json::to_string(components_raw).unwrap_or_else(|_| "{}".to_string());
    if let Err(e) = conn.execute(
        "INSERT INTO score_entries(id, student_id, term_id, class_id, subject_id, components, total_score, grade_label)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(term_id, class_id, subject_id, student_id)
         DO UPDATE SET components = excluded.components,
                       total_score = excluded.total_score,
                       grade_label = excluded.grade_label",
        (
            new_id(),
            &student_id,
            &term_id,
            &class_id,
            &subject_id,
            &components_json,
            total,
            &resolution.label,
        ),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    let entry_id: String = match conn.query_row(
        "SELECT id FROM score_entries
         WHERE term_id = ? AND class_id = ? AND subject_id = ? AND student_id = ?",
        (&term_id, &class_id, &subject_id, &student_id),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err(e) = recalc::refresh_term_report(conn, &student_id, &term_id) {
        return calc_err(req, e);
    }

    ok(
        &req.id,
        json!({
            "entryId": entry_id,
            "totalScore": total,
            "gradeLabel": resolution.label,
            "gpa": resolution.gpa,
            "remark": resolution.remark,
            "schemeId": scheme.id,
        }),
    )
}

fn handle_comments_set(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let teacher = optional_str(req, "teacherComment");
    let principal = optional_str(req, "principalComment");

    if let Err(e) = conn.execute(
        "INSERT INTO student_term_reports(id, student_id, term_id, teacher_comment, principal_comment)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, term_id)
         DO UPDATE SET teacher_comment = COALESCE(excluded.teacher_comment, teacher_comment),
                       principal_comment = COALESCE(excluded.principal_comment, principal_comment)",
        (new_id(), &student_id, &term_id, &teacher, &principal),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": student_id, "termId": term_id }))
}

fn handle_goals_set(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    if let Some(goal_text) = optional_str(req, "goalText") {
        if let Err(e) = conn.execute(
            "INSERT INTO academic_goals(id, student_id, term_id, goal_text)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, term_id) DO UPDATE SET goal_text = excluded.goal_text",
            (new_id(), &student_id, &term_id, &goal_text),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    if let Some(analysis_text) = optional_str(req, "analysisText") {
        if let Err(e) = conn.execute(
            "INSERT INTO goal_analyses(id, student_id, term_id, analysis_text)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, term_id) DO UPDATE SET analysis_text = excluded.analysis_text",
            (new_id(), &student_id, &term_id, &analysis_text),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "studentId": student_id, "termId": term_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.save" => Some(handle_score_save(state, req)),
        "comments.set" => Some(handle_comments_set(state, req)),
        "goals.set" => Some(handle_goals_set(state, req)),
        _ => None,
    }
}
