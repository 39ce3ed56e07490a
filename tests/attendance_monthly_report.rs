mod common;

use common::{temp_dir, Sidecar};
use serde_json::json;

#[test]
fn monthly_report_has_one_cell_per_day() {
    let workspace = temp_dir("halaqa-attendance");
    let mut s = Sidecar::open(&workspace, "teacher");
    let class_id = s.create_class("Dawn", "0");
    let student_id = s.create_student("Sumayya", Some(&class_id));
    let other = s.create_student("Anas", Some(&class_id));

    s.ok(
        "attendance.save",
        json!({ "date": "2024-06-05", "statuses": { student_id.clone(): "present", other.clone(): "absent" } }),
    );
    // Outside the reported month.
    s.ok(
        "attendance.save",
        json!({ "date": "2024-07-01", "statuses": { student_id.clone(): "absent" } }),
    );

    let report = s.ok(
        "attendance.monthlyReport",
        json!({ "classId": class_id, "month": "2024-06" }),
    );
    assert_eq!(report["className"], "Dawn");
    let matrix = &report["report"];
    assert_eq!(matrix["daysInMonth"], 30);
    let rows = matrix["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);

    let row = rows
        .iter()
        .find(|r| r["studentId"] == student_id.as_str())
        .expect("row");
    let symbols: Vec<&str> = row["symbols"]
        .as_array()
        .expect("symbols")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(symbols.len(), 30);
    assert_eq!(symbols[4], "✔");
    assert!(symbols
        .iter()
        .enumerate()
        .all(|(i, sym)| i == 4 || *sym == "-"));
    assert_eq!(row["present"], 1);
    assert_eq!(row["absent"], 0);
    assert_eq!(row["cells"][4], "present");
    assert!(row["cells"][0].is_null());
}

#[test]
fn later_save_for_same_day_wins() {
    let workspace = temp_dir("halaqa-attendance-overwrite");
    {
        let mut s = Sidecar::open(&workspace, "teacher");
        let student_id = s.create_student("Idris", None);
        let other = s.create_student("Layla", None);

        s.ok(
            "attendance.save",
            json!({ "date": "2024-02-29", "statuses": { student_id.clone(): "absent", other.clone(): "present" } }),
        );
        s.ok(
            "attendance.save",
            json!({ "date": "2024-02-29", "statuses": { student_id.clone(): "present" } }),
        );

        let day = s.ok("attendance.day", json!({ "date": "2024-02-29" }));
        assert_eq!(day["present"], 2);
        assert_eq!(day["absent"], 0);
    }

    let mut s = Sidecar::open(&workspace, "teacher");
    let day = s.ok("attendance.day", json!({ "date": "2024-02-29" }));
    assert_eq!(day["present"], 2);
    let trailing = s.ok("attendance.trailing", json!({ "now": "2024-03", "months": 2 }));
    assert_eq!(trailing["series"][0]["month"], "2024-02");
    assert_eq!(trailing["series"][0]["present"], 2);
    assert_eq!(trailing["series"][1]["present"], 0);

    let dashboard = s.ok("dashboard.summary", json!({ "today": "2024-02-29" }));
    assert_eq!(dashboard["summary"]["presentToday"], 2);
    assert_eq!(dashboard["summary"]["absentToday"], 0);
}

#[test]
fn bad_dates_and_unknown_students_change_nothing() {
    let workspace = temp_dir("halaqa-attendance-invalid");
    let mut s = Sidecar::open(&workspace, "teacher");
    let student_id = s.create_student("Musa", None);

    assert_eq!(
        s.err_code(
            "attendance.save",
            json!({ "date": "2024-02-30", "statuses": { student_id.clone(): "present" } })
        ),
        "bad_params"
    );
    assert_eq!(
        s.err_code(
            "attendance.save",
            json!({ "date": "2024-02-10", "statuses": { student_id.clone(): "late" } })
        ),
        "bad_params"
    );
    assert_eq!(
        s.err_code(
            "attendance.save",
            json!({ "date": "2024-02-10", "statuses": { student_id.clone(): "present", "ghost": "absent" } })
        ),
        "not_found"
    );
    let day = s.ok("attendance.day", json!({ "date": "2024-02-10" }));
    assert_eq!(day["present"], 0);
    assert_eq!(
        s.err_code("attendance.trailing", json!({ "months": 0 })),
        "bad_params"
    );
}
