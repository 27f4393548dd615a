use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

const CALENDAR: &str = r#"{
    "settings": { "timezone": "UTC", "buffer_minutes": 15, "slot_step_minutes": 15 },
    "services": [
        { "id": 1, "name": "Massage", "duration_minutes": 60, "required_room_types": ["massage"] }
    ],
    "specialists": [
        { "id": 1, "full_name": "Mira", "services": [1],
          "hours": [ { "weekday": "Mon", "start": "09:00:00", "end": "11:00:00" } ] }
    ],
    "rooms": [
        { "id": 1, "name": "Blue", "room_type": "massage" },
        { "id": 2, "name": "Gym", "room_type": "fitness" }
    ]
}"#;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn booking() -> Command {
    Command::cargo_bin("booking").unwrap()
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_slots_lists_grid_inside_hours() {
    let calendar = write_temp(CALENDAR);
    let slots = json_stdout(booking().args([
        "slots",
        "--calendar",
        calendar.path().to_str().unwrap(),
        "--date",
        "2026-03-16",
        "--service",
        "1",
    ]));
    let starts: Vec<&str> = slots
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["start"].as_str().unwrap())
        .collect();
    // 09:00-11:00 with 75 reserved minutes: 09:00 .. 09:45.
    assert_eq!(
        starts,
        [
            "2026-03-16T09:00:00Z",
            "2026-03-16T09:15:00Z",
            "2026-03-16T09:30:00Z",
            "2026-03-16T09:45:00Z"
        ]
    );
    assert_eq!(slots[0]["room_ids"], serde_json::json!([1]));
}

#[test]
fn test_slots_skip_booked_time() {
    let calendar = write_temp(CALENDAR);
    let bookings = write_temp(
        r#"[ { "guest": { "name": "Anna" }, "service_id": 1, "specialist_id": 1,
               "room_id": 1, "start": "2026-03-16T09:00:00Z", "status": "confirmed" } ]"#,
    );
    let slots = json_stdout(booking().args([
        "slots",
        "-c",
        calendar.path().to_str().unwrap(),
        "-b",
        bookings.path().to_str().unwrap(),
        "-d",
        "2026-03-16",
        "-s",
        "1",
    ]));
    assert_eq!(slots, serde_json::json!([]));
}

#[test]
fn test_slots_empty_on_day_off() {
    let calendar = write_temp(CALENDAR);
    booking()
        .args(["slots", "-c", calendar.path().to_str().unwrap(), "-d", "2026-03-17", "-s", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_rooms_filters_by_type() {
    let calendar = write_temp(CALENDAR);
    let rooms = json_stdout(booking().args([
        "rooms",
        "-c",
        calendar.path().to_str().unwrap(),
        "-s",
        "1",
    ]));
    assert_eq!(rooms.as_array().unwrap().len(), 1);
    assert_eq!(rooms[0]["name"], "Blue");
}

#[test]
fn test_check_reports_conflicts() {
    let calendar = write_temp(CALENDAR);
    let bookings = write_temp(
        r#"[ { "guest": { "name": "Anna" }, "service_id": 1, "specialist_id": 1,
               "room_id": 1, "start": "2026-03-16T09:00:00Z" } ]"#,
    );
    let report = json_stdout(booking().args([
        "check",
        "-c",
        calendar.path().to_str().unwrap(),
        "-b",
        bookings.path().to_str().unwrap(),
        "--start",
        "2026-03-16T09:30:00Z",
        "--service",
        "1",
        "--specialist",
        "1",
        "--room",
        "1",
    ]));
    assert_eq!(report["clear"], false);
    assert_eq!(report["reasons"], serde_json::json!(["specialist busy", "room busy"]));
}

#[test]
fn test_check_clear_placement() {
    let calendar = write_temp(CALENDAR);
    let report = json_stdout(booking().args([
        "check",
        "-c",
        calendar.path().to_str().unwrap(),
        "--start",
        "2026-03-16 09:00",
        "--service",
        "1",
        "--specialist",
        "1",
        "--room",
        "1",
    ]));
    assert_eq!(report["clear"], true);
}

#[test]
fn test_check_unknown_room_fails() {
    let calendar = write_temp(CALENDAR);
    booking()
        .args([
            "check",
            "-c",
            calendar.path().to_str().unwrap(),
            "--start",
            "2026-03-16T09:00:00Z",
            "--service",
            "1",
            "--specialist",
            "1",
            "--room",
            "99",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("room"));
}

#[test]
fn test_occurrences_weekly_subset() {
    let out = json_stdout(booking().args([
        "occurrences",
        "--rule",
        r#"{ "frequency": "weekly", "interval": 1, "termination": { "count": 4 }, "weekdays": ["Mon", "Wed"] }"#,
        "--anchor",
        "2026-03-16T10:00",
        "--timezone",
        "Europe/Berlin",
    ]));
    assert_eq!(
        out,
        serde_json::json!([
            "2026-03-16T09:00:00Z",
            "2026-03-18T09:00:00Z",
            "2026-03-23T09:00:00Z",
            "2026-03-25T09:00:00Z"
        ])
    );
}

#[test]
fn test_occurrences_reads_rule_file() {
    let rule = write_temp(r#"{ "frequency": "daily", "termination": { "count": 3 } }"#);
    let arg = format!("@{}", rule.path().display());
    let out =
        json_stdout(booking().args(["occurrences", "-r", &arg, "-a", "2026-03-16T10:00:00Z"]));
    assert_eq!(out.as_array().unwrap().len(), 3);
}

#[test]
fn test_occurrences_rejects_bad_rule() {
    booking()
        .args(["occurrences", "-r", "{ not json", "-a", "2026-03-16T10:00:00Z"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid recurrence rule"));
}

#[test]
fn test_ical_prints_rrule() {
    booking()
        .args([
            "ical",
            "-r",
            r#"{ "frequency": "daily", "termination": { "count": 3 } }"#,
            "-a",
            "2026-03-16T10:00:00Z",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("RRULE:FREQ=DAILY"))
        .stdout(predicate::str::contains("DTSTART"));
}

#[test]
fn test_missing_calendar_file() {
    booking()
        .args(["slots", "-c", "/nonexistent/calendar.json", "-d", "2026-03-16", "-s", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read calendar"));
}
