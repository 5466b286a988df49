use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

/// 2-decimal rounding applied to every numeric output at computation time,
/// so all consumers see identical figures.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn db(e: impl ToString) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingSchemeRule {
    pub min_score: f64,
    pub max_score: f64,
    pub label: String,
    pub gpa: Option<f64>,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScheme {
    pub id: String,
    pub name: String,
    /// Held in ascending min_score order; `load_scheme` sorts on read.
    pub rules: Vec<GradingSchemeRule>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResolution {
    pub label: String,
    pub gpa: Option<f64>,
    pub remark: Option<String>,
}

/// First rule with `min_score <= score <= max_score` wins, both bounds
/// inclusive. A score outside every band is a configuration error and is
/// surfaced, never defaulted.
pub fn resolve_grade(score: f64, scheme: &GradingScheme) -> Result<GradeResolution, CalcError> {
    for rule in &scheme.rules {
        if score >= rule.min_score && score <= rule.max_score {
            return Ok(GradeResolution {
                label: rule.label.clone(),
                gpa: rule.gpa,
                remark: rule.remark.clone(),
            });
        }
    }
    Err(CalcError::new(
        "no_matching_rule",
        format!("no grading rule covers score {}", score),
    )
    .with_details(json!({ "score": score, "schemeId": scheme.id })))
}

/// Sum of whatever component values the teacher has entered so far; a
/// missing component contributes 0, not an error.
pub fn aggregate_components(components: &HashMap<String, f64>) -> f64 {
    round2(components.values().sum())
}

/// Validates a rule set before it is persisted: bands must not overlap.
/// Gaps are allowed at write time; they surface as `no_matching_rule` when a
/// score lands in one.
pub fn validate_rule_bands(rules: &[GradingSchemeRule]) -> Result<(), CalcError> {
    let mut sorted: Vec<&GradingSchemeRule> = rules.iter().collect();
    sorted.sort_by(|a, b| {
        a.min_score
            .partial_cmp(&b.min_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for rule in &sorted {
        if rule.max_score < rule.min_score {
            return Err(CalcError::new(
                "bad_params",
                format!(
                    "rule '{}' has max_score {} below min_score {}",
                    rule.label, rule.max_score, rule.min_score
                ),
            ));
        }
    }
    for pair in sorted.windows(2) {
        if pair[1].min_score <= pair[0].max_score {
            return Err(CalcError::new(
                "bad_params",
                format!(
                    "rule bands '{}' and '{}' overlap",
                    pair[0].label, pair[1].label
                ),
            ));
        }
    }
    Ok(())
}

pub fn load_scheme(conn: &Connection, scheme_id: &str) -> Result<GradingScheme, CalcError> {
    let name: Option<String> = conn
        .query_row(
            "SELECT name FROM grading_schemes WHERE id = ?",
            [scheme_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(CalcError::db)?;
    let Some(name) = name else {
        return Err(CalcError::new("not_found", "grading scheme not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT min_score, max_score, label, gpa, remark
             FROM grading_scheme_rules
             WHERE scheme_id = ?
             ORDER BY min_score",
        )
        .map_err(CalcError::db)?;
    let rules = stmt
        .query_map([scheme_id], |r| {
            Ok(GradingSchemeRule {
                min_score: r.get(0)?,
                max_score: r.get(1)?,
                label: r.get(2)?,
                gpa: r.get(3)?,
                remark: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;

    Ok(GradingScheme {
        id: scheme_id.to_string(),
        name,
        rules,
    })
}

/// Scheme precedence for a score entry: a subject-pinned scheme wins over the
/// school-wide active one.
pub fn effective_scheme_id(
    conn: &Connection,
    school_id: &str,
    subject_id: &str,
) -> Result<String, CalcError> {
    let pinned: Option<String> = conn
        .query_row(
            "SELECT scheme_id FROM subject_scheme_overrides WHERE subject_id = ?",
            [subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(CalcError::db)?;
    if let Some(id) = pinned {
        return Ok(id);
    }

    let active: Option<Option<String>> = conn
        .query_row(
            "SELECT active_scheme_id FROM schools WHERE id = ?",
            [school_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(CalcError::db)?;
    match active {
        Some(Some(id)) => Ok(id),
        Some(None) => Err(CalcError::new(
            "not_found",
            "school has no active grading scheme",
        )),
        None => Err(CalcError::new("not_found", "school not found")),
    }
}

pub fn parse_components(raw: &serde_json::Value) -> Result<HashMap<String, f64>, CalcError> {
    let Some(obj) = raw.as_object() else {
        return Err(CalcError::new(
            "bad_params",
            "components must be an object of name -> number",
        ));
    };
    let mut out = HashMap::with_capacity(obj.len());
    for (k, v) in obj {
        let Some(n) = v.as_f64() else {
            return Err(CalcError::new(
                "bad_params",
                format!("component '{}' must be a number", k),
            ));
        };
        out.insert(k.clone(), n);
    }
    Ok(out)
}
