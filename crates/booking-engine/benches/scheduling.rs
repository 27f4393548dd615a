//! Slot search and recurrence expansion benchmarks.
//!
//! Run with: `cargo bench --bench scheduling -p booking-engine`

use std::hint::black_box;

use booking_engine::{
    generate_occurrences, ActionContext, Actor, BookingEngine, CalendarConfig, CreateReservation,
    Frequency, Guest, InMemoryStore, RecurrenceRule, ReservationDraft, ReservationStatus, RoomId,
    ServiceId, SpecialistId, Termination,
};
use chrono::{Duration, NaiveDate, TimeZone, Utc, Weekday};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

/// A calendar with `specialists` people and `rooms` massage rooms, all
/// working Monday 08:00-20:00.
fn calendar(specialists: u64, rooms: u64) -> CalendarConfig {
    let specialists: Vec<String> = (1..=specialists)
        .map(|id| {
            format!(
                r#"{{ "id": {id}, "full_name": "Specialist {id}", "services": [1],
                     "hours": [ {{ "weekday": "Mon", "start": "08:00:00", "end": "20:00:00" }} ] }}"#
            )
        })
        .collect();
    let rooms: Vec<String> = (1..=rooms)
        .map(|id| format!(r#"{{ "id": {id}, "name": "Room {id}", "room_type": "massage" }}"#))
        .collect();
    let json = format!(
        r#"{{
            "services": [ {{ "id": 1, "name": "Massage", "duration_minutes": 60, "required_room_types": ["massage"] }} ],
            "specialists": [ {} ],
            "rooms": [ {} ]
        }}"#,
        specialists.join(","),
        rooms.join(",")
    );
    CalendarConfig::from_json_str(&json).expect("bench calendar is valid")
}

/// An engine with every other hour booked for each specialist.
fn busy_engine(specialists: u64, rooms: u64) -> BookingEngine<InMemoryStore> {
    let engine = BookingEngine::new(
        InMemoryStore::new(calendar(specialists, rooms)).expect("bench store builds"),
    );
    let ctx = ActionContext::new(
        Actor::new("bench"),
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
    );
    let day = Utc.with_ymd_and_hms(2026, 3, 16, 8, 0, 0).unwrap();
    for specialist in 1..=specialists {
        for slot in (0..12).step_by(2) {
            let draft = ReservationDraft {
                guest: Guest::new("Guest"),
                service_id: ServiceId(1),
                specialist_id: SpecialistId(specialist),
                room_id: RoomId(1 + (specialist - 1) % rooms),
                start: day + Duration::hours(slot),
                status: ReservationStatus::Confirmed,
            };
            engine
                .create_reservation(CreateReservation::quick(draft), &ctx)
                .expect("bench booking succeeds");
        }
    }
    engine
}

// -----------------------------------------------------------------------------
// Slot search
// -----------------------------------------------------------------------------

fn bench_slot_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_search");
    let monday = NaiveDate::from_ymd_opt(2026, 3, 16).unwrap();

    for (specialists, rooms) in [(2u64, 2u64), (10, 5), (40, 20)] {
        let engine = busy_engine(specialists, rooms);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{specialists}x{rooms}")),
            &engine,
            |b, engine| {
                b.iter(|| engine.find_available_slots(black_box(monday), ServiceId(1)));
            },
        );
    }
    group.finish();
}

// -----------------------------------------------------------------------------
// Recurrence expansion
// -----------------------------------------------------------------------------

fn bench_expansion(c: &mut Criterion) {
    let mut group = c.benchmark_group("recurrence_expansion");
    let anchor = NaiveDate::from_ymd_opt(2026, 1, 31)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap();

    let rules = [
        ("daily_200", RecurrenceRule::new(Frequency::Daily, 1, Termination::Count(200))),
        (
            "weekly_mon_wed_fri",
            RecurrenceRule::new(Frequency::Weekly, 1, Termination::Count(150))
                .with_weekdays([Weekday::Mon, Weekday::Wed, Weekday::Fri]),
        ),
        ("monthly_clamped", RecurrenceRule::new(Frequency::Monthly, 1, Termination::Count(120))),
    ];
    for (name, rule) in rules {
        group.bench_with_input(BenchmarkId::from_parameter(name), &rule, |b, rule| {
            b.iter(|| generate_occurrences(black_box(rule), anchor));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_slot_search, bench_expansion);
criterion_main!(benches);
