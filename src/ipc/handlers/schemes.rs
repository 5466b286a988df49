use super::helpers::{calc_err, db_conn, new_id, required_str};
use crate::grading::{validate_rule_bands, GradingSchemeRule};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_rules(req: &Request) -> Result<Vec<GradingSchemeRule>, serde_json::Value> {
    let Some(raw) = req.params.get("rules").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing rules array", None));
    };
    let mut rules = Vec::with_capacity(raw.len());
    for (i, rule) in raw.iter().enumerate() {
        let bad = |field: &str| {
            err(
                &req.id,
                "bad_params",
                format!("rules[{}].{} missing or invalid", i, field),
                None,
            )
        };
        let min_score = rule
            .get("minScore")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| bad("minScore"))?;
        let max_score = rule
            .get("maxScore")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| bad("maxScore"))?;
        let label = rule
            .get("label")
            .and_then(|v| v.as_str())
            .ok_or_else(|| bad("label"))?
            .to_string();
        rules.push(GradingSchemeRule {
            min_score,
            max_score,
            label,
            gpa: rule.get("gpa").and_then(|v| v.as_f64()),
            remark: rule
                .get("remark")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        });
    }
    Ok(rules)
}

fn handle_scheme_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let rules = match parse_rules(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = validate_rule_bands(&rules) {
        return calc_err(req, e);
    }

    let scheme_id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO grading_schemes(id, school_id, name) VALUES(?, ?, ?)",
        (&scheme_id, &school_id, &name),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    for rule in &rules {
        if let Err(e) = conn.execute(
            "INSERT INTO grading_scheme_rules(id, scheme_id, min_score, max_score, label, gpa, remark)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                new_id(),
                &scheme_id,
                rule.min_score,
                rule.max_score,
                &rule.label,
                rule.gpa,
                &rule.remark,
            ),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "schemeId": scheme_id, "ruleCount": rules.len() }))
}

fn handle_scheme_activate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scheme_id = match required_str(req, "schemeId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let belongs: Result<i64, _> = conn.query_row(
        "SELECT COUNT(*) FROM grading_schemes WHERE id = ? AND school_id = ?",
        (&scheme_id, &school_id),
        |r| r.get(0),
    );
    match belongs {
        Ok(0) => return err(&req.id, "not_found", "scheme not found for school", None),
        Ok(_) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let updated = match conn.execute(
        "UPDATE schools SET active_scheme_id = ? WHERE id = ?",
        (&scheme_id, &school_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "school not found", None);
    }
    ok(&req.id, json!({ "schoolId": school_id, "activeSchemeId": scheme_id }))
}

fn handle_subject_override_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scheme_id = match required_str(req, "schemeId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Err(e) = conn.execute(
        "INSERT INTO subject_scheme_overrides(subject_id, scheme_id) VALUES(?, ?)
         ON CONFLICT(subject_id) DO UPDATE SET scheme_id = excluded.scheme_id",
        (&subject_id, &scheme_id),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "subjectId": subject_id, "schemeId": scheme_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schemes.create" => Some(handle_scheme_create(state, req)),
        "schemes.activate" => Some(handle_scheme_activate(state, req)),
        "schemes.subjectOverrideSet" => Some(handle_subject_override_set(state, req)),
        _ => None,
    }
}
