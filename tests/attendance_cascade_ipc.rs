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

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn start(workspace: &PathBuf) -> Self {
        let exe = env!("CARGO_BIN_EXE_reportd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn reportd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        let mut s = Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        };
        let _ = s.request("workspace.select", json!({ "path": workspace.to_string_lossy() }));
        s
    }

    fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
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
        value
    }

    fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
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

struct Seed {
    term_id: String,
    term_with_default_id: String,
    student_id: String,
    group_id: String,
}

fn seed(s: &mut Sidecar) -> Seed {
    let school = s.request_ok("setup.schoolCreate", json!({ "name": "Unity Academy" }));
    let school_id = str_of(&school, "schoolId");
    let campus = s.request_ok(
        "setup.campusCreate",
        json!({ "schoolId": school_id, "name": "Main" }),
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
    let term_with_default = s.request_ok(
        "setup.termCreate",
        json!({
            "schoolId": school_id,
            "session": "2025/2026",
            "name": "Second Term",
            "startDate": "2026-01-05",
            "endDate": "2026-04-02",
            "totalSchoolDays": 58
        }),
    );
    let term_with_default_id = str_of(&term_with_default, "termId");
    let class = s.request_ok(
        "setup.classCreate",
        json!({ "schoolId": school_id, "campusId": campus_id, "name": "JSS 3" }),
    );
    let class_id = str_of(&class, "classId");
    let arm = s.request_ok("setup.armCreate", json!({ "classId": class_id, "name": "Red" }));
    let arm_id = str_of(&arm, "armId");
    let student = s.request_ok(
        "students.create",
        json!({
            "schoolId": school_id,
            "campusId": campus_id,
            "classId": class_id,
            "armId": arm_id,
            "lastName": "Eze",
            "firstName": "Emeka"
        }),
    );
    let student_id = str_of(&student, "studentId");
    let group = s.request_ok(
        "setup.classGroupCreate",
        json!({ "schoolId": school_id, "name": "JSS 3 Red Homeroom" }),
    );
    let group_id = str_of(&group, "classGroupId");
    let _ = s.request_ok(
        "setup.groupMemberSet",
        json!({ "classGroupId": group_id, "studentId": student_id, "active": true }),
    );

    Seed {
        term_id,
        term_with_default_id,
        student_id,
        group_id,
    }
}

#[test]
fn exact_override_wins_over_computed_records() {
    let workspace = temp_dir("reportd-attendance-override");
    let mut s = Sidecar::start(&workspace);
    let seeded = seed(&mut s);

    for (date, status) in [
        ("2025-09-02", "present"),
        ("2025-09-03", "present"),
        ("2025-09-04", "absent"),
        ("2025-09-05", "late"),
    ] {
        let _ = s.request_ok(
            "attendance.record",
            json!({
                "classGroupId": seeded.group_id,
                "studentId": seeded.student_id,
                "sessionDate": date,
                "status": status
            }),
        );
    }

    // Computed figures first, while no override exists.
    let computed = s.request_ok(
        "attendance.resolve",
        json!({ "studentId": seeded.student_id, "termId": seeded.term_id }),
    );
    assert_eq!(computed.get("source").and_then(|v| v.as_str()), Some("computed"));
    assert_eq!(computed.get("present").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(computed.get("late").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(computed.get("total").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(computed.get("rate").and_then(|v| v.as_f64()), Some(50.0));

    let _ = s.request_ok(
        "attendance.overrideSet",
        json!({
            "studentId": seeded.student_id,
            "classGroupId": seeded.group_id,
            "termId": seeded.term_id,
            "totalDays": 60,
            "daysPresent": 57
        }),
    );

    let resolved = s.request_ok(
        "attendance.resolve",
        json!({
            "studentId": seeded.student_id,
            "termId": seeded.term_id,
            "classGroupId": seeded.group_id
        }),
    );
    assert_eq!(resolved.get("source").and_then(|v| v.as_str()), Some("override"));
    assert_eq!(resolved.get("present").and_then(|v| v.as_i64()), Some(57));
    assert_eq!(resolved.get("total").and_then(|v| v.as_i64()), Some(60));
    assert_eq!(resolved.get("rate").and_then(|v| v.as_f64()), Some(95.0));
    assert_eq!(resolved.get("degraded").and_then(|v| v.as_bool()), Some(false));

    // The override also wins when no group is named, through the any-group
    // tier.
    let unscoped = s.request_ok(
        "attendance.resolve",
        json!({ "studentId": seeded.student_id, "termId": seeded.term_id }),
    );
    assert_eq!(unscoped.get("source").and_then(|v| v.as_str()), Some("override"));
}

#[test]
fn invalid_override_rejected_at_write_time() {
    let workspace = temp_dir("reportd-attendance-invalid");
    let mut s = Sidecar::start(&workspace);
    let seeded = seed(&mut s);

    let rejected = s.request(
        "attendance.overrideSet",
        json!({
            "studentId": seeded.student_id,
            "classGroupId": seeded.group_id,
            "termId": seeded.term_id,
            "totalDays": 50,
            "daysPresent": 60
        }),
    );
    assert_eq!(rejected.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        rejected
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("invalid_override")
    );
}

#[test]
fn term_default_backfills_total_when_no_records_exist() {
    let workspace = temp_dir("reportd-attendance-default");
    let mut s = Sidecar::start(&workspace);
    let seeded = seed(&mut s);

    let resolved = s.request_ok(
        "attendance.resolve",
        json!({ "studentId": seeded.student_id, "termId": seeded.term_with_default_id }),
    );
    assert_eq!(
        resolved.get("source").and_then(|v| v.as_str()),
        Some("term_default")
    );
    assert_eq!(resolved.get("total").and_then(|v| v.as_i64()), Some(58));
    assert_eq!(resolved.get("present").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(resolved.get("rate").and_then(|v| v.as_f64()), Some(0.0));

    // The first term has no default either: everything stays at zero.
    let empty = s.request_ok(
        "attendance.resolve",
        json!({ "studentId": seeded.student_id, "termId": seeded.term_id }),
    );
    assert_eq!(empty.get("source").and_then(|v| v.as_str()), Some("computed"));
    assert_eq!(empty.get("total").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(empty.get("rate").and_then(|v| v.as_f64()), Some(0.0));
}
