use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_reportd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn reportd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn start(workspace: &PathBuf) -> Self {
        let (child, stdin, reader) = spawn_sidecar();
        let mut s = Sidecar {
            child,
            stdin,
            reader,
            next_id: 0,
        };
        let _ = s.request_ok("workspace.select", json!({ "path": workspace.to_string_lossy() }));
        s
    }

    fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn str_of(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

struct Cohort {
    term_id: String,
    class_id: String,
    math_id: String,
    english_id: String,
    student_s: String,
}

fn seed_cohort(s: &mut Sidecar) -> Cohort {
    let school = s.request_ok("setup.schoolCreate", json!({ "name": "Hillcrest College" }));
    let school_id = str_of(&school, "schoolId");
    let campus = s.request_ok(
        "setup.campusCreate",
        json!({ "schoolId": school_id, "name": "Main Campus" }),
    );
    let campus_id = str_of(&campus, "campusId");
    let term = s.request_ok(
        "setup.termCreate",
        json!({
            "schoolId": school_id,
            "session": "2025/2026",
            "name": "First Term",
            "startDate": "2025-09-01",
            "endDate": "2025-12-12"
        }),
    );
    let term_id = str_of(&term, "termId");
    let class = s.request_ok(
        "setup.classCreate",
        json!({ "schoolId": school_id, "campusId": campus_id, "name": "JSS 2" }),
    );
    let class_id = str_of(&class, "classId");
    let arm = s.request_ok("setup.armCreate", json!({ "classId": class_id, "name": "A" }));
    let arm_id = str_of(&arm, "armId");

    let math = s.request_ok(
        "setup.subjectCreate",
        json!({ "schoolId": school_id, "name": "Mathematics" }),
    );
    let math_id = str_of(&math, "subjectId");
    let english = s.request_ok(
        "setup.subjectCreate",
        json!({ "schoolId": school_id, "name": "English" }),
    );
    let english_id = str_of(&english, "subjectId");

    let scheme = s.request_ok(
        "schemes.create",
        json!({
            "schoolId": school_id,
            "name": "Letter Grades",
            "rules": [
                { "minScore": 0.0, "maxScore": 39.99, "label": "F" },
                { "minScore": 40.0, "maxScore": 69.99, "label": "C" },
                { "minScore": 70.0, "maxScore": 79.99, "label": "B" },
                { "minScore": 80.0, "maxScore": 100.0, "label": "A" }
            ]
        }),
    );
    let scheme_id = str_of(&scheme, "schemeId");
    let _ = s.request_ok(
        "schemes.activate",
        json!({ "schoolId": school_id, "schemeId": scheme_id }),
    );

    let mut create_student = |last: &str, first: &str| -> String {
        let created = s.request_ok(
            "students.create",
            json!({
                "schoolId": school_id,
                "campusId": campus_id,
                "classId": class_id,
                "armId": arm_id,
                "lastName": last,
                "firstName": first
            }),
        );
        str_of(&created, "studentId")
    };
    let student_s = create_student("Sani", "Seyi");
    let student_w = create_student("Wade", "Wura");
    let student_x = create_student("Xu", "Xavier");
    let student_y = create_student("Yaro", "Yemi");
    let student_z = create_student("Zuma", "Zara");

    // S: Math 85, English 78 -> average 81.5. The other four average
    // 85, 85, 82 and 60 across the same two subjects.
    let mut save = |student: &str, subject: &str, value: f64| {
        let _ = s.request_ok(
            "scores.save",
            json!({
                "studentId": student,
                "termId": term_id,
                "classId": class_id,
                "subjectId": subject,
                "components": { "ca": 0.0, "exam": value }
            }),
        );
    };
    save(&student_s, &math_id, 85.0);
    save(&student_s, &english_id, 78.0);
    save(&student_w, &math_id, 85.0);
    save(&student_w, &english_id, 85.0);
    save(&student_x, &math_id, 85.0);
    save(&student_x, &english_id, 85.0);
    save(&student_y, &math_id, 82.0);
    save(&student_y, &english_id, 82.0);
    save(&student_z, &math_id, 60.0);
    save(&student_z, &english_id, 60.0);

    Cohort {
        term_id,
        class_id,
        math_id,
        english_id,
        student_s,
    }
}

#[test]
fn report_ranks_student_within_cohort_and_campus() {
    let workspace = temp_dir("reportd-e2e");
    let mut s = Sidecar::start(&workspace);
    let cohort = seed_cohort(&mut s);

    let _ = s.request_ok(
        "comments.set",
        json!({
            "studentId": cohort.student_s,
            "termId": cohort.term_id,
            "teacherComment": "Strong finish to the term.",
            "principalComment": "Keep it up."
        }),
    );
    let _ = s.request_ok(
        "goals.set",
        json!({
            "studentId": cohort.student_s,
            "termId": cohort.term_id,
            "goalText": "Average 85 next term",
            "analysisText": "Short of goal by 3.5 points."
        }),
    );

    let report = s.request_ok(
        "reports.studentTermReport",
        json!({ "studentId": cohort.student_s, "termId": cohort.term_id }),
    );

    let summary = report.get("summary").expect("summary");
    assert_eq!(
        summary.get("averageScore").and_then(|v| v.as_f64()),
        Some(81.5)
    );
    // Cohort averages sorted descending: 85, 85, 82, 81.5, 60 -> dense
    // ranks 1, 1, 2, 3, 4.
    assert_eq!(summary.get("cohortRank").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(summary.get("cohortSize").and_then(|v| v.as_i64()), Some(5));
    assert_eq!(
        summary.get("campusPercentile").and_then(|v| v.as_f64()),
        Some(40.0)
    );

    let subjects = report
        .get("subjects")
        .and_then(|v| v.as_array())
        .expect("subjects");
    assert_eq!(subjects.len(), 2);
    let by_subject = |id: &str| {
        subjects
            .iter()
            .find(|sub| sub.get("subjectId").and_then(|v| v.as_str()) == Some(id))
            .unwrap_or_else(|| panic!("subject {} missing", id))
    };
    let math = by_subject(&cohort.math_id);
    assert_eq!(math.get("gradeLabel").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(math.get("subjectRank").and_then(|v| v.as_i64()), Some(1));
    let english = by_subject(&cohort.english_id);
    assert_eq!(english.get("gradeLabel").and_then(|v| v.as_str()), Some("B"));
    // English scores 85, 85, 82, 78, 60 -> S is third.
    assert_eq!(english.get("subjectRank").and_then(|v| v.as_i64()), Some(3));

    assert_eq!(
        report
            .get("comments")
            .and_then(|c| c.get("teacher"))
            .and_then(|v| v.as_str()),
        Some("Strong finish to the term.")
    );
    assert_eq!(
        report.get("goal").and_then(|v| v.as_str()),
        Some("Average 85 next term")
    );

    // No attendance rows, no override, no term default: zero everything,
    // and no divide-by-zero.
    let attendance = report.get("attendance").expect("attendance");
    assert_eq!(attendance.get("total").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(attendance.get("rate").and_then(|v| v.as_f64()), Some(0.0));
}

#[test]
fn withdrawn_students_drop_out_of_the_population() {
    let workspace = temp_dir("reportd-e2e-withdrawn");
    let mut s = Sidecar::start(&workspace);
    let cohort = seed_cohort(&mut s);

    let report = s.request_ok(
        "reports.studentTermReport",
        json!({ "studentId": cohort.student_s, "termId": cohort.term_id }),
    );

    // Add a sixth student topping the cohort, then withdraw them; the
    // population and every rank must snap back.
    let extra = s.request_ok(
        "students.create",
        json!({
            "schoolId": report.get("school").and_then(|v| v.get("id")).and_then(|v| v.as_str()).unwrap(),
            "campusId": report.get("student").and_then(|v| v.get("campusId")).and_then(|v| v.as_str()).unwrap(),
            "classId": cohort.class_id,
            "armId": report.get("student").and_then(|v| v.get("armId")).and_then(|v| v.as_str()).unwrap(),
            "lastName": "Top",
            "firstName": "Tunde"
        }),
    );
    let extra_id = str_of(&extra, "studentId");
    let _ = s.request_ok(
        "scores.save",
        json!({
            "studentId": extra_id,
            "termId": cohort.term_id,
            "classId": cohort.class_id,
            "subjectId": cohort.math_id,
            "components": { "exam": 99.0 }
        }),
    );
    let _ = s.request_ok(
        "scores.save",
        json!({
            "studentId": extra_id,
            "termId": cohort.term_id,
            "classId": cohort.class_id,
            "subjectId": cohort.english_id,
            "components": { "exam": 99.0 }
        }),
    );

    let with_extra = s.request_ok(
        "reports.studentTermReport",
        json!({ "studentId": cohort.student_s, "termId": cohort.term_id }),
    );
    assert_eq!(
        with_extra
            .get("summary")
            .and_then(|v| v.get("cohortRank"))
            .and_then(|v| v.as_i64()),
        Some(4)
    );
    assert_eq!(
        with_extra
            .get("summary")
            .and_then(|v| v.get("cohortSize"))
            .and_then(|v| v.as_i64()),
        Some(6)
    );

    let _ = s.request_ok(
        "students.setStatus",
        json!({ "studentId": extra_id, "status": "withdrawn" }),
    );
    let after = s.request_ok(
        "reports.studentTermReport",
        json!({ "studentId": cohort.student_s, "termId": cohort.term_id }),
    );
    assert_eq!(
        after
            .get("summary")
            .and_then(|v| v.get("cohortRank"))
            .and_then(|v| v.as_i64()),
        Some(3)
    );
    assert_eq!(
        after
            .get("summary")
            .and_then(|v| v.get("cohortSize"))
            .and_then(|v| v.as_i64()),
        Some(5)
    );
}
