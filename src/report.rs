use crate::attendance::{self, AttendanceFigures};
use crate::grading::CalcError;
use crate::ranking;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub id: String,
    pub display_name: String,
    pub status: String,
    pub class_id: String,
    pub class_name: String,
    pub arm_id: String,
    pub arm_name: String,
    pub campus_id: String,
    pub campus_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermMeta {
    pub id: String,
    pub session: String,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub total_school_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolSnapshot {
    pub id: String,
    pub name: String,
    pub active_scheme_id: Option<String>,
    pub active_scheme_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub subject_id: String,
    pub subject_name: String,
    pub components: serde_json::Value,
    pub total_score: Option<f64>,
    pub grade_label: Option<String>,
    /// Dense rank for this subject within the same arm cohort.
    pub subject_rank: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub average_score: Option<f64>,
    pub total_score: Option<f64>,
    pub cohort_rank: Option<i64>,
    pub cohort_size: i64,
    pub campus_percentile: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportComments {
    pub teacher: Option<String>,
    pub principal: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    pub student: StudentIdentity,
    pub term: TermMeta,
    pub school: SchoolSnapshot,
    pub subjects: Vec<SubjectResult>,
    pub summary: ReportSummary,
    pub attendance: AttendanceFigures,
    pub comments: ReportComments,
    pub goal: Option<String>,
    pub goal_analysis: Option<String>,
}

/// Composes the full term report for one student. Read-only: every stored
/// figure (entry totals, report averages) is consumed as persisted, and the
/// cohort reads all happen on this one connection.
pub fn build_student_term_report(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<ReportPayload, CalcError> {
    let student_row: Option<(String, String, String, String, String, String)> = conn
        .query_row(
            "SELECT last_name, first_name, status, class_id, arm_id, campus_id
             FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()
        .map_err(CalcError::db)?;
    let Some((last_name, first_name, status, class_id, arm_id, campus_id)) = student_row else {
        return Err(CalcError::new("not_found", "student not found"));
    };

    let class_name: String = conn
        .query_row(
            "SELECT name FROM academic_classes WHERE id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(CalcError::db)?;
    let arm_name: String = conn
        .query_row("SELECT name FROM arms WHERE id = ?", [&arm_id], |r| {
            r.get(0)
        })
        .map_err(CalcError::db)?;
    let campus_name: String = conn
        .query_row("SELECT name FROM campuses WHERE id = ?", [&campus_id], |r| {
            r.get(0)
        })
        .map_err(CalcError::db)?;

    let term_row: Option<(String, String, String, String, String, Option<i64>)> = conn
        .query_row(
            "SELECT school_id, session, name, start_date, end_date, total_school_days
             FROM terms WHERE id = ?",
            [term_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()
        .map_err(CalcError::db)?;
    let Some((school_id, session, term_name, start_date, end_date, total_school_days)) = term_row
    else {
        return Err(CalcError::new("not_found", "term not found"));
    };

    let school_row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT name, active_scheme_id FROM schools WHERE id = ?",
            [&school_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(CalcError::db)?;
    let Some((school_name, active_scheme_id)) = school_row else {
        return Err(CalcError::new("not_found", "school not found"));
    };
    let active_scheme_name: Option<String> = match &active_scheme_id {
        Some(id) => conn
            .query_row("SELECT name FROM grading_schemes WHERE id = ?", [id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(CalcError::db)?,
        None => None,
    };

    let mut entries_stmt = conn
        .prepare(
            "SELECT e.subject_id, sub.name, e.components, e.total_score, e.grade_label
             FROM score_entries e
             JOIN subjects sub ON sub.id = e.subject_id
             WHERE e.student_id = ? AND e.term_id = ?
             ORDER BY sub.name",
        )
        .map_err(CalcError::db)?;
    let entry_rows: Vec<(String, String, String, Option<f64>, Option<String>)> = entries_stmt
        .query_map([student_id, term_id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;

    let mut subjects = Vec::with_capacity(entry_rows.len());
    for (subject_id, subject_name, components_raw, total_score, grade_label) in entry_rows {
        let ranks = ranking::subject_ranks(conn, term_id, &arm_id, &subject_id)?;
        let components: serde_json::Value =
            serde_json::from_str(&components_raw).unwrap_or_else(|_| serde_json::json!({}));
        subjects.push(SubjectResult {
            subject_rank: ranks.get(student_id).copied(),
            subject_id,
            subject_name,
            components,
            total_score,
            grade_label,
        });
    }

    let standing = ranking::cohort_standing(conn, student_id, term_id, &arm_id, &campus_id)?;

    let report_row: Option<(Option<f64>, Option<f64>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT average_score, total_score, teacher_comment, principal_comment
             FROM student_term_reports
             WHERE student_id = ? AND term_id = ?",
            [student_id, term_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(CalcError::db)?;
    let (average_score, total_score, teacher_comment, principal_comment) =
        report_row.unwrap_or((None, None, None, None));

    let attendance = attendance::resolve_for_student(conn, student_id, term_id, None)?;

    let goal: Option<String> = conn
        .query_row(
            "SELECT goal_text FROM academic_goals WHERE student_id = ? AND term_id = ?",
            [student_id, term_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(CalcError::db)?;
    let goal_analysis: Option<String> = conn
        .query_row(
            "SELECT analysis_text FROM goal_analyses WHERE student_id = ? AND term_id = ?",
            [student_id, term_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(CalcError::db)?;

    Ok(ReportPayload {
        student: StudentIdentity {
            id: student_id.to_string(),
            display_name: format!("{}, {}", last_name, first_name),
            status,
            class_id,
            class_name,
            arm_id,
            arm_name,
            campus_id,
            campus_name,
        },
        term: TermMeta {
            id: term_id.to_string(),
            session,
            name: term_name,
            start_date,
            end_date,
            total_school_days,
        },
        school: SchoolSnapshot {
            id: school_id,
            name: school_name,
            active_scheme_id,
            active_scheme_name,
        },
        subjects,
        summary: ReportSummary {
            average_score,
            total_score,
            cohort_rank: standing.rank,
            cohort_size: standing.cohort_size,
            campus_percentile: standing.campus_percentile,
        },
        attendance,
        comments: ReportComments {
            teacher: teacher_comment,
            principal: principal_comment,
        },
        goal,
        goal_analysis,
    })
}
