mod common;

use common::{str_at, temp_dir, Sidecar};
use serde_json::json;

#[test]
fn exam_scores_feed_the_dashboard_average() {
    let workspace = temp_dir("halaqa-exams");
    let mut s = Sidecar::open(&workspace, "admin");
    let student_id = s.create_student("Salman", None);

    let first = s.ok(
        "exams.record",
        json!({
            "studentId": student_id,
            "name": "Juz Amma",
            "unit": 30,
            "scores": { "Memorization": 45, "Tajweed": 25, "Voice": 15 }
        }),
    );
    assert_eq!(first["exam"]["totalScore"], 85);
    assert_eq!(first["exam"]["maxScore"], 100);
    s.ok(
        "exams.record",
        json!({
            "studentId": student_id,
            "name": "Tabarak",
            "unit": 29,
            "scores": { "Memorization": 30, "Tajweed": 20, "Voice": 10 }
        }),
    );

    // (85 + 60) / 200 = 72.5%, rounded half up.
    let dash = s.ok("dashboard.summary", json!({ "today": "2024-05-01" }));
    assert_eq!(dash["summary"]["averageExamPercent"], 73);
    assert_eq!(dash["summary"]["examsRecorded"], 2);

    let listed = s.ok("exams.listForStudent", json!({ "studentId": student_id }));
    let names: Vec<&str> = listed["exams"]
        .as_array()
        .expect("exams")
        .iter()
        .filter_map(|e| e["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Juz Amma", "Tabarak"]);

    for scores in [
        json!({ "Memorization": 51, "Tajweed": 30, "Voice": 20 }),
        json!({ "Memorization": 10, "Tajweed": 10 }),
        json!({ "Memorization": 10, "Tajweed": 10, "Voice": 10, "Speed": 1 }),
        json!({ "Memorization": -1, "Tajweed": 10, "Voice": 10 }),
    ] {
        assert_eq!(
            s.err_code(
                "exams.record",
                json!({ "studentId": student_id, "name": "Bad", "unit": 1, "scores": scores })
            ),
            "bad_params"
        );
    }
    let listed = s.ok("exams.listForStudent", json!({ "studentId": student_id }));
    assert_eq!(listed["exams"].as_array().map(Vec::len), Some(2));
}

#[test]
fn exam_fields_are_configurable() {
    let workspace = temp_dir("halaqa-exam-fields");
    let mut s = Sidecar::open(&workspace, "admin");
    let student_id = s.create_student("Zainab", None);

    let added = s.ok(
        "settings.examFields.add",
        json!({ "name": "Recitation", "maxMark": 10 }),
    );
    assert_eq!(added["examFields"].as_array().map(Vec::len), Some(4));
    assert_eq!(
        s.err_code(
            "settings.examFields.add",
            json!({ "name": "recitation", "maxMark": 5 })
        ),
        "bad_params"
    );

    let removed = s.ok("settings.examFields.remove", json!({ "index": 2 }));
    let names: Vec<&str> = removed["examFields"]
        .as_array()
        .expect("fields")
        .iter()
        .filter_map(|f| f["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Memorization", "Tajweed", "Recitation"]);

    let exam = s.ok(
        "exams.record",
        json!({
            "studentId": student_id,
            "name": "Quiz",
            "unit": 1,
            "scores": { "Memorization": 50, "Tajweed": 30, "Recitation": 10 }
        }),
    );
    assert_eq!(exam["exam"]["maxScore"], 90);
    assert_eq!(
        s.err_code("settings.examFields.remove", json!({ "index": 9 })),
        "bad_params"
    );
}

#[test]
fn top_students_and_class_distribution() {
    let workspace = temp_dir("halaqa-dashboard");
    let mut s = Sidecar::open(&workspace, "admin");
    let busy = s.create_class("Busy", "10");
    let empty = s.create_class("Empty", "10");
    let first = s.create_student("First", Some(&busy));
    let second = s.create_student("Second", Some(&busy));
    let third = s.create_student("Third", None);

    s.ok(
        "progress.markRange",
        json!({ "studentId": second, "unit": 30, "fromPage": 1, "toPage": 10 }),
    );
    s.ok(
        "progress.markRange",
        json!({ "studentId": third, "unit": 30, "fromPage": 1, "toPage": 4 }),
    );
    s.ok(
        "progress.markRange",
        json!({ "studentId": first, "unit": 1, "fromPage": 1, "toPage": 4 }),
    );

    let top = s.ok("dashboard.topStudents", json!({ "limit": 2 }));
    let ranked = top["students"].as_array().expect("students");
    assert_eq!(ranked.len(), 2);
    assert_eq!(str_at(&ranked[0], "studentId"), second);
    // Ties keep listing order.
    assert_eq!(str_at(&ranked[1], "studentId"), first);
    assert_eq!(ranked[1]["totalPages"], 4);

    let dist = s.ok("dashboard.classDistribution", json!({}));
    let classes = dist["classes"].as_array().expect("classes");
    let count = |id: &str| {
        classes
            .iter()
            .find(|c| c["classId"] == id)
            .map(|c| c["students"].clone())
    };
    assert_eq!(count(&busy), Some(json!(2)));
    assert_eq!(count(&empty), Some(json!(0)));
    assert_eq!(dist["unassigned"], 1);

    let dash = s.ok("dashboard.summary", json!({ "today": "2024-05-01" }));
    assert_eq!(dash["summary"]["totalStudents"], 3);
    assert_eq!(dash["summary"]["totalClasses"], 2);
    assert_eq!(dash["summary"]["totalPages"], 18);
    assert!(dash["unreadNotifications"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn notifications_can_be_marked_read() {
    let workspace = temp_dir("halaqa-notifications");
    let mut s = Sidecar::open(&workspace, "teacher");
    s.create_student("Ibrahim", None);
    s.create_student("Sara", None);

    let listed = s.ok("notifications.list", json!({}));
    let items = listed["notifications"].as_array().expect("notifications");
    assert_eq!(items.len(), 2);
    assert_eq!(listed["unread"], 2);

    let newest = str_at(&items[0], "id");
    let after_one = s.ok("notifications.markRead", json!({ "id": newest }));
    assert_eq!(after_one["unread"], 1);
    assert_eq!(
        s.err_code("notifications.markRead", json!({ "id": "missing" })),
        "not_found"
    );
    let after_all = s.ok("notifications.markAllRead", json!({}));
    assert_eq!(after_all["marked"], 1);
    assert_eq!(after_all["unread"], 0);

    let cleared = s.ok("notifications.clear", json!({}));
    assert_eq!(cleared["cleared"], 2);
    let listed = s.ok("notifications.list", json!({}));
    assert_eq!(listed["notifications"].as_array().map(Vec::len), Some(0));
}
