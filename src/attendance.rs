use crate::grading::{round2, CalcError};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceSource {
    Override,
    Computed,
    TermDefault,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceFigures {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub unexcused: i64,
    pub total: i64,
    pub rate: f64,
    pub source: AttendanceSource,
    /// Set when an override violated `days_present <= total_days` and was
    /// clamped instead of trusted.
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct OverrideRow {
    pub class_group_id: String,
    pub total_days: i64,
    pub days_present: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub present: i64,
    pub late: i64,
    pub excused: i64,
    pub unexcused: i64,
    pub total: i64,
}

/// Everything the cascade needs, materialized up front so the tiers stay
/// pure and their precedence stays visible in one place.
#[derive(Debug)]
pub struct ReconcileInputs<'a> {
    pub student_id: &'a str,
    pub term_id: &'a str,
    pub requested_group: Option<&'a str>,
    pub overrides: &'a [OverrideRow],
    pub active_groups: &'a HashSet<String>,
    pub counted: StatusCounts,
    pub term_total_school_days: Option<i64>,
}

fn rate_of(present: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round2(present as f64 / total as f64 * 100.0)
}

fn figures_from_override(row: &OverrideRow) -> AttendanceFigures {
    let degraded = row.days_present > row.total_days;
    let present = row.days_present.min(row.total_days);
    let total = row.total_days;
    AttendanceFigures {
        present,
        absent: total - present,
        late: 0,
        excused: 0,
        unexcused: 0,
        total,
        rate: rate_of(present, total),
        source: AttendanceSource::Override,
        degraded,
    }
}

fn exact_override(inputs: &ReconcileInputs<'_>) -> Option<AttendanceFigures> {
    let requested = inputs.requested_group?;
    inputs
        .overrides
        .iter()
        .find(|o| o.class_group_id == requested)
        .map(figures_from_override)
}

fn any_group_override(inputs: &ReconcileInputs<'_>) -> Option<AttendanceFigures> {
    let row = inputs
        .overrides
        .iter()
        .find(|o| inputs.active_groups.contains(&o.class_group_id))?;
    // The borrowed group may not be the one the report was asked about; keep
    // an audit trail of the substitution.
    warn!(
        student = inputs.student_id,
        term = inputs.term_id,
        group = row.class_group_id.as_str(),
        "attendance override taken from another group the student belongs to"
    );
    Some(figures_from_override(row))
}

fn computed(inputs: &ReconcileInputs<'_>) -> Option<AttendanceFigures> {
    let c = inputs.counted;
    if c.total == 0 {
        return None;
    }
    Some(AttendanceFigures {
        present: c.present,
        absent: c.excused + c.unexcused,
        late: c.late,
        excused: c.excused,
        unexcused: c.unexcused,
        total: c.total,
        rate: rate_of(c.present, c.total),
        source: AttendanceSource::Computed,
        degraded: false,
    })
}

fn term_default(inputs: &ReconcileInputs<'_>) -> Option<AttendanceFigures> {
    let total = inputs.term_total_school_days?;
    let c = inputs.counted;
    Some(AttendanceFigures {
        present: c.present,
        absent: c.excused + c.unexcused,
        late: c.late,
        excused: c.excused,
        unexcused: c.unexcused,
        total,
        rate: rate_of(c.present, total),
        source: AttendanceSource::TermDefault,
        degraded: false,
    })
}

/// Ordered resolution cascade; first `Some` wins. Falls through to an empty
/// computed result (total 0, rate 0) when no tier applies.
pub fn reconcile(inputs: &ReconcileInputs<'_>) -> AttendanceFigures {
    let tiers: [fn(&ReconcileInputs<'_>) -> Option<AttendanceFigures>; 4] =
        [exact_override, any_group_override, computed, term_default];
    for tier in tiers {
        if let Some(figures) = tier(inputs) {
            return figures;
        }
    }
    AttendanceFigures {
        present: 0,
        absent: 0,
        late: 0,
        excused: 0,
        unexcused: 0,
        total: 0,
        rate: 0.0,
        source: AttendanceSource::Computed,
        degraded: false,
    }
}

/// Gathers the student's override rows, active group memberships, counted
/// records inside the term window and the term default, then runs the
/// cascade.
pub fn resolve_for_student(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
    requested_group: Option<&str>,
) -> Result<AttendanceFigures, CalcError> {
    let term_row: Option<(String, String, Option<i64>)> = conn
        .query_row(
            "SELECT start_date, end_date, total_school_days FROM terms WHERE id = ?",
            [term_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(CalcError::db)?;
    let Some((start_date, end_date, term_total_school_days)) = term_row else {
        return Err(CalcError::new("not_found", "term not found"));
    };

    let mut override_stmt = conn
        .prepare(
            "SELECT class_group_id, total_days, days_present
             FROM attendance_overrides
             WHERE student_id = ? AND term_id = ?",
        )
        .map_err(CalcError::db)?;
    let overrides: Vec<OverrideRow> = override_stmt
        .query_map([student_id, term_id], |r| {
            Ok(OverrideRow {
                class_group_id: r.get(0)?,
                total_days: r.get(1)?,
                days_present: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;

    let mut groups_stmt = conn
        .prepare(
            "SELECT class_group_id FROM class_group_memberships
             WHERE student_id = ? AND active = 1",
        )
        .map_err(CalcError::db)?;
    let active_groups: HashSet<String> = groups_stmt
        .query_map([student_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(CalcError::db)?;

    let counted = conn
        .query_row(
            "SELECT
                COUNT(*),
                SUM(CASE WHEN r.status = 'present' THEN 1 ELSE 0 END),
                SUM(CASE WHEN r.status IN ('late', 'tardy') THEN 1 ELSE 0 END),
                SUM(CASE WHEN r.status = 'excused' THEN 1 ELSE 0 END),
                SUM(CASE WHEN r.status IN ('absent', 'unexcused') THEN 1 ELSE 0 END)
             FROM attendance_records r
             JOIN class_group_memberships m
               ON m.class_group_id = r.class_group_id AND m.student_id = r.student_id
             WHERE r.student_id = ?
               AND r.session_date >= ? AND r.session_date <= ?",
            (student_id, &start_date, &end_date),
            |r| {
                Ok(StatusCounts {
                    total: r.get(0)?,
                    present: r.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    late: r.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    excused: r.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    unexcused: r.get::<_, Option<i64>>(4)?.unwrap_or(0),
                })
            },
        )
        .map_err(CalcError::db)?;

    Ok(reconcile(&ReconcileInputs {
        student_id,
        term_id,
        requested_group,
        overrides: &overrides,
        active_groups: &active_groups,
        counted,
        term_total_school_days,
    }))
}
