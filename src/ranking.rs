use crate::grading::{round2, CalcError};
use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedMember {
    pub student_id: String,
    pub average_score: f64,
    pub rank: i64,
}

/// Dense rank over the whole materialized cohort: equal scores share a rank,
/// the next distinct score takes the immediately following integer. A NULL
/// average ranks as 0. Ties compare at the 2-decimal precision every stored
/// figure carries.
pub fn dense_rank(members: &[(String, Option<f64>)]) -> Vec<RankedMember> {
    let mut scored: Vec<(String, f64)> = members
        .iter()
        .map(|(id, avg)| (id.clone(), round2(avg.unwrap_or(0.0))))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut out = Vec::with_capacity(scored.len());
    let mut rank = 0_i64;
    let mut prev_score: Option<f64> = None;
    for (student_id, score) in scored {
        if prev_score != Some(score) {
            rank += 1;
            prev_score = Some(score);
        }
        out.push(RankedMember {
            student_id,
            average_score: score,
            rank,
        });
    }
    out
}

/// Fraction of the campus population the student outranks, 0-100.
/// None when the campus population is empty.
pub fn campus_percentile(rank: i64, population: i64) -> Option<f64> {
    if population <= 0 {
        return None;
    }
    Some(round2(
        (population - rank) as f64 / population as f64 * 100.0,
    ))
}

/// Statuses that drop a student out of every ranking population.
const EXCLUDED_STATUSES: &str = "('withdrawn', 'graduated', 'expelled', 'inactive')";

#[derive(Debug, Clone)]
pub struct CohortStanding {
    pub rank: Option<i64>,
    pub cohort_size: i64,
    pub campus_percentile: Option<f64>,
}

fn rank_of(ranked: &[RankedMember], student_id: &str) -> Option<i64> {
    ranked
        .iter()
        .find(|m| m.student_id == student_id)
        .map(|m| m.rank)
}

/// Loads eligible members of one scope with their report averages, in a
/// single query so every rank comes from the same snapshot.
fn load_scope_averages(
    conn: &Connection,
    term_id: &str,
    scope_column: &str,
    scope_id: &str,
) -> Result<Vec<(String, Option<f64>)>, CalcError> {
    let sql = format!(
        "SELECT s.id, r.average_score
         FROM students s
         LEFT JOIN student_term_reports r
           ON r.student_id = s.id AND r.term_id = ?1
         WHERE s.{} = ?2 AND s.status NOT IN {}",
        scope_column, EXCLUDED_STATUSES
    );
    let mut stmt = conn.prepare(&sql).map_err(CalcError::db)?;
    stmt.query_map([term_id, scope_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, Option<f64>>(1)?))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CalcError::db)
}

/// Computes the student's arm-level dense rank and cohort size plus the
/// campus-level percentile for a term. An empty cohort yields None ranks
/// rather than an error.
pub fn cohort_standing(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
    arm_id: &str,
    campus_id: &str,
) -> Result<CohortStanding, CalcError> {
    let arm_members = load_scope_averages(conn, term_id, "arm_id", arm_id)?;
    let arm_ranked = dense_rank(&arm_members);
    let rank = rank_of(&arm_ranked, student_id);

    let campus_members = load_scope_averages(conn, term_id, "campus_id", campus_id)?;
    let campus_population = campus_members.len() as i64;
    let campus_ranked = dense_rank(&campus_members);
    let percentile = rank_of(&campus_ranked, student_id)
        .and_then(|r| campus_percentile(r, campus_population));

    Ok(CohortStanding {
        rank,
        cohort_size: arm_members.len() as i64,
        campus_percentile: percentile,
    })
}

/// Per-subject dense ranks for one subject across an arm cohort, keyed by
/// student id. Entries without a stored total rank as 0.
pub fn subject_ranks(
    conn: &Connection,
    term_id: &str,
    arm_id: &str,
    subject_id: &str,
) -> Result<HashMap<String, i64>, CalcError> {
    let sql = format!(
        "SELECT s.id, e.total_score
         FROM students s
         LEFT JOIN score_entries e
           ON e.student_id = s.id AND e.term_id = ?1 AND e.subject_id = ?2
         WHERE s.arm_id = ?3 AND s.status NOT IN {}",
        EXCLUDED_STATUSES
    );
    let mut stmt = conn.prepare(&sql).map_err(CalcError::db)?;
    let members: Vec<(String, Option<f64>)> = stmt
        .query_map([term_id, subject_id, arm_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Option<f64>>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;

    Ok(dense_rank(&members)
        .into_iter()
        .map(|m| (m.student_id, m.rank))
        .collect())
}
