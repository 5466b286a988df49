use crate::grading::{self, CalcError, GradingScheme};
use crate::ranking;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcFailure {
    pub entry_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcOutcome {
    pub updated_count: i64,
    pub failures: Vec<RecalcFailure>,
}

#[derive(Debug)]
struct EntryRow {
    id: String,
    student_id: String,
    term_id: String,
    subject_id: String,
    components: String,
    total_score: Option<f64>,
    grade_label: Option<String>,
}

/// Re-grades every score entry in the scheme's school (optionally one term).
/// Each entry update autocommits on its own, so one bad row never poisons the
/// batch; failures are collected per entry instead of aborting. A second run
/// with no intervening writes updates nothing.
pub fn recalculate_all(
    conn: &Connection,
    scheme_id: &str,
    term_id: Option<&str>,
) -> Result<RecalcOutcome, CalcError> {
    let school_id: Option<String> = conn
        .query_row(
            "SELECT school_id FROM grading_schemes WHERE id = ?",
            [scheme_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(CalcError::db)?;
    let Some(school_id) = school_id else {
        return Err(CalcError::new("not_found", "grading scheme not found"));
    };

    let mut sql = String::from(
        "SELECT e.id, e.student_id, e.term_id, e.subject_id, e.components,
                e.total_score, e.grade_label
         FROM score_entries e
         JOIN academic_classes c ON c.id = e.class_id
         WHERE c.school_id = ?1",
    );
    if term_id.is_some() {
        sql.push_str(" AND e.term_id = ?2");
    }
    let mut stmt = conn.prepare(&sql).map_err(CalcError::db)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<EntryRow> {
        Ok(EntryRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
            term_id: r.get(2)?,
            subject_id: r.get(3)?,
            components: r.get(4)?,
            total_score: r.get(5)?,
            grade_label: r.get(6)?,
        })
    };
    let entries: Vec<EntryRow> = match term_id {
        Some(t) => stmt
            .query_map([&school_id, &t.to_string()], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?,
        None => stmt
            .query_map([&school_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?,
    };

    let mut pinned_stmt = conn
        .prepare("SELECT subject_id, scheme_id FROM subject_scheme_overrides")
        .map_err(CalcError::db)?;
    let pinned: HashMap<String, String> = pinned_stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(CalcError::db)?;

    let mut schemes: HashMap<String, GradingScheme> = HashMap::new();
    let mut updated_count = 0_i64;
    let mut failures: Vec<RecalcFailure> = Vec::new();
    let mut affected: HashSet<(String, String)> = HashSet::new();
    let mut affected_terms: HashSet<String> = HashSet::new();

    for entry in &entries {
        // Subject-pinned schemes keep precedence even during a school-wide
        // recalculation.
        let effective_id = pinned
            .get(&entry.subject_id)
            .map(String::as_str)
            .unwrap_or(scheme_id);
        let scheme = match schemes.entry(effective_id.to_string()) {
            std::collections::hash_map::Entry::Occupied(slot) => slot.into_mut(),
            std::collections::hash_map::Entry::Vacant(slot) => {
                match grading::load_scheme(conn, effective_id) {
                    Ok(s) => slot.insert(s),
                    Err(e) => {
                        failures.push(RecalcFailure {
                            entry_id: entry.id.clone(),
                            reason: e.message,
                        });
                        continue;
                    }
                }
            }
        };

        let components = match serde_json::from_str::<serde_json::Value>(&entry.components)
            .map_err(|e| CalcError::new("bad_params", e.to_string()))
            .and_then(|v| grading::parse_components(&v))
        {
            Ok(c) => c,
            Err(e) => {
                failures.push(RecalcFailure {
                    entry_id: entry.id.clone(),
                    reason: e.message,
                });
                continue;
            }
        };

        let total = grading::aggregate_components(&components);
        let resolution = match grading::resolve_grade(total, scheme) {
            Ok(r) => r,
            Err(e) => {
                failures.push(RecalcFailure {
                    entry_id: entry.id.clone(),
                    reason: e.message,
                });
                continue;
            }
        };

        let unchanged = entry.total_score == Some(total)
            && entry.grade_label.as_deref() == Some(resolution.label.as_str());
        if unchanged {
            continue;
        }

        conn.execute(
            "UPDATE score_entries SET total_score = ?, grade_label = ? WHERE id = ?",
            (total, &resolution.label, &entry.id),
        )
        .map_err(CalcError::db)?;
        updated_count += 1;
        affected.insert((entry.student_id.clone(), entry.term_id.clone()));
        affected_terms.insert(entry.term_id.clone());
    }

    // Settle derived report rows before replying, so any ranking read that
    // follows the response sees the whole batch.
    for (student_id, term_id) in &affected {
        refresh_term_report(conn, student_id, term_id)?;
    }
    for term_id in &affected_terms {
        refresh_cohort_standings(conn, &school_id, term_id)?;
    }

    info!(
        scheme = scheme_id,
        entries = entries.len(),
        updated = updated_count,
        failed = failures.len(),
        "grade recalculation settled"
    );

    Ok(RecalcOutcome {
        updated_count,
        failures,
    })
}

/// Rebuilds the derived average/total on a student's term report row from
/// the stored entry totals, preserving comments. Entries whose grading
/// failed (NULL total) are left out of the average.
pub fn refresh_term_report(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<(), CalcError> {
    let (sum, count): (Option<f64>, i64) = conn
        .query_row(
            "SELECT SUM(total_score), COUNT(total_score)
             FROM score_entries
             WHERE student_id = ? AND term_id = ?",
            [student_id, term_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(CalcError::db)?;

    let total = sum.map(grading::round2);
    let average = match (sum, count) {
        (Some(s), n) if n > 0 => Some(grading::round2(s / n as f64)),
        _ => None,
    };

    conn.execute(
        "INSERT INTO student_term_reports(id, student_id, term_id, average_score, total_score)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, term_id)
         DO UPDATE SET average_score = excluded.average_score,
                       total_score = excluded.total_score",
        (
            uuid::Uuid::new_v4().to_string(),
            student_id,
            term_id,
            average,
            total,
        ),
    )
    .map_err(CalcError::db)?;
    Ok(())
}

/// Persists position-in-class, cohort size and campus percentile onto the
/// term report rows of every eligible student in the school for one term.
/// Ranks come from one materialization per scope so ties resolve
/// consistently across the whole cohort.
pub fn refresh_cohort_standings(
    conn: &Connection,
    school_id: &str,
    term_id: &str,
) -> Result<(), CalcError> {
    let mut arms_stmt = conn
        .prepare(
            "SELECT DISTINCT s.arm_id, s.campus_id
             FROM students s
             WHERE s.school_id = ?",
        )
        .map_err(CalcError::db)?;
    let scopes: Vec<(String, String)> = arms_stmt
        .query_map([school_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;

    for (arm_id, campus_id) in scopes {
        let mut members_stmt = conn
            .prepare(
                "SELECT s.id FROM students s
                 WHERE s.arm_id = ?
                   AND s.status NOT IN ('withdrawn', 'graduated', 'expelled', 'inactive')",
            )
            .map_err(CalcError::db)?;
        let member_ids: Vec<String> = members_stmt
            .query_map([&arm_id], |r| r.get(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(CalcError::db)?;

        for student_id in member_ids {
            let standing =
                ranking::cohort_standing(conn, &student_id, term_id, &arm_id, &campus_id)?;
            conn.execute(
                "UPDATE student_term_reports
                 SET position_in_class = ?, cohort_size = ?, campus_percentile = ?
                 WHERE student_id = ? AND term_id = ?",
                (
                    standing.rank,
                    standing.cohort_size,
                    standing.campus_percentile,
                    &student_id,
                    term_id,
                ),
            )
            .map_err(CalcError::db)?;
        }
    }
    Ok(())
}
