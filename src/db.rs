use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("reportd.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            active_scheme_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS campuses(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_campuses_school ON campuses(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            session TEXT NOT NULL,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            total_school_days INTEGER,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_school ON terms(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_classes(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            campus_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(campus_id) REFERENCES campuses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_classes_campus ON academic_classes(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS arms(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES academic_classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_arms_class ON arms(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            campus_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            arm_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(campus_id) REFERENCES campuses(id),
            FOREIGN KEY(class_id) REFERENCES academic_classes(id),
            FOREIGN KEY(arm_id) REFERENCES arms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_arm ON students(arm_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_campus ON students(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_school ON subjects(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grading_schemes(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grading_schemes_school ON grading_schemes(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grading_scheme_rules(
            id TEXT PRIMARY KEY,
            scheme_id TEXT NOT NULL,
            min_score REAL NOT NULL,
            max_score REAL NOT NULL,
            label TEXT NOT NULL,
            gpa REAL,
            remark TEXT,
            FOREIGN KEY(scheme_id) REFERENCES grading_schemes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grading_scheme_rules_scheme ON grading_scheme_rules(scheme_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_scheme_overrides(
            subject_id TEXT PRIMARY KEY,
            scheme_id TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(scheme_id) REFERENCES grading_schemes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_entries(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            components TEXT NOT NULL,
            total_score REAL,
            grade_label TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(class_id) REFERENCES academic_classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(term_id, class_id, subject_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_entries_student ON score_entries(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_entries_term ON score_entries(term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_term_reports(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            average_score REAL,
            total_score REAL,
            position_in_class INTEGER,
            cohort_size INTEGER,
            campus_percentile REAL,
            teacher_comment TEXT,
            principal_comment TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(student_id, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_term_reports_term ON student_term_reports(term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_groups(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_group_memberships(
            class_group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY(class_group_id, student_id),
            FOREIGN KEY(class_group_id) REFERENCES class_groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memberships_student ON class_group_memberships(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            class_group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            session_date TEXT NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(class_group_id) REFERENCES class_groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_student ON attendance_records(student_id, session_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_group ON attendance_records(class_group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_overrides(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_group_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            total_days INTEGER NOT NULL,
            days_present INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_group_id) REFERENCES class_groups(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(student_id, class_group_id, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_overrides_student ON attendance_overrides(student_id, term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_goals(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            goal_text TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(student_id, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS goal_analyses(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            analysis_text TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(student_id, term_id)
        )",
        [],
    )?;

    // Older workspaces may predate the term-default fallback column.
    ensure_terms_total_school_days(&conn)?;

    Ok(conn)
}

fn ensure_terms_total_school_days(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "terms", "total_school_days")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE terms ADD COLUMN total_school_days INTEGER", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
