//! Calendar reference data: services, specialists with weekly hours, rooms,
//! schedule templates, and global settings.
//!
//! This is the input every scheduling component reads. It is loaded from
//! JSON and validated once; invalid configs never reach the engine.

use std::collections::{BTreeSet, HashSet};

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::{RoomId, ServiceId, SpecialistId, TemplateId};

const DEFAULT_BUFFER_MINUTES: u32 = 15;
const DEFAULT_SLOT_STEP_MINUTES: u32 = 15;

/// Deployment-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Timezone in which working hours and wall-clock input are interpreted.
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    /// Minutes appended after every service before its resources are free.
    #[serde(default = "default_buffer_minutes")]
    pub buffer_minutes: u32,
    /// Resolution of the slot search grid. Unrelated to service length.
    #[serde(default = "default_slot_step_minutes")]
    pub slot_step_minutes: u32,
}

fn default_timezone() -> Tz {
    Tz::UTC
}

fn default_buffer_minutes() -> u32 {
    DEFAULT_BUFFER_MINUTES
}

fn default_slot_step_minutes() -> u32 {
    DEFAULT_SLOT_STEP_MINUTES
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            buffer_minutes: DEFAULT_BUFFER_MINUTES,
            slot_step_minutes: DEFAULT_SLOT_STEP_MINUTES,
        }
    }
}

/// A bookable service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: ServiceId,
    pub name: String,
    pub duration_minutes: u32,
    /// Room type tags; a room matching any of them can host the service.
    pub required_room_types: BTreeSet<String>,
    #[serde(default)]
    pub price_cents: u64,
}

impl ServiceDefinition {
    pub fn accepts_room_type(&self, room: &Room) -> bool {
        self.required_room_types.contains(&room.room_type)
    }

    /// An active room of a compatible type.
    pub fn can_use(&self, room: &Room) -> bool {
        room.active && self.accepts_room_type(room)
    }
}

/// A cabinet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub room_type: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// One working range within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkingHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::Validation(format!(
                "working hours must start before they end ({start} >= {end})"
            )));
        }
        Ok(Self { start, end })
    }
}

/// Serialized form of one weekday entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// At most one [`WorkingHours`] per weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<DayHours>", into = "Vec<DayHours>")]
pub struct WeeklyHours {
    days: [Option<WorkingHours>; 7],
}

impl WeeklyHours {
    pub fn on(&self, weekday: Weekday) -> Option<WorkingHours> {
        self.days[weekday.num_days_from_monday() as usize]
    }

    pub fn set(&mut self, weekday: Weekday, hours: WorkingHours) {
        self.days[weekday.num_days_from_monday() as usize] = Some(hours);
    }

    pub fn clear(&mut self, weekday: Weekday) {
        self.days[weekday.num_days_from_monday() as usize] = None;
    }

    /// Working days in Monday-first order.
    pub fn iter(&self) -> impl Iterator<Item = (Weekday, WorkingHours)> + '_ {
        self.days.iter().enumerate().filter_map(|(i, hours)| {
            hours.map(|h| (weekday_from_index(i), h))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Option::is_none)
    }
}

fn weekday_from_index(i: usize) -> Weekday {
    match i {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

impl TryFrom<Vec<DayHours>> for WeeklyHours {
    type Error = String;

    fn try_from(entries: Vec<DayHours>) -> Result<Self, Self::Error> {
        let mut week = WeeklyHours::default();
        for entry in entries {
            if week.on(entry.weekday).is_some() {
                return Err(format!("duplicate hours for {}", entry.weekday));
            }
            let hours = WorkingHours::new(entry.start, entry.end).map_err(|e| e.to_string())?;
            week.set(entry.weekday, hours);
        }
        Ok(week)
    }
}

impl From<WeeklyHours> for Vec<DayHours> {
    fn from(week: WeeklyHours) -> Self {
        week.iter()
            .map(|(weekday, h)| DayHours {
                weekday,
                start: h.start,
                end: h.end,
            })
            .collect()
    }
}

/// A staff member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialist {
    pub id: SpecialistId,
    pub full_name: String,
    pub services: BTreeSet<ServiceId>,
    #[serde(default)]
    pub hours: WeeklyHours,
}

impl Specialist {
    pub fn can_perform(&self, service: ServiceId) -> bool {
        self.services.contains(&service)
    }
}

/// Named weekly hours that can be stamped onto a specialist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTemplate {
    pub id: TemplateId,
    pub name: String,
    pub days: WeeklyHours,
}

/// Everything the calendar provider supplies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
    #[serde(default)]
    pub specialists: Vec<Specialist>,
    /// Room types declared ahead of any room that carries them.
    #[serde(default)]
    pub room_types: BTreeSet<String>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub templates: Vec<ScheduleTemplate>,
}

impl CalendarConfig {
    /// Parse and validate a JSON calendar.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: CalendarConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-references and invariants serde cannot express.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.settings.slot_step_minutes == 0 {
            return Err(EngineError::InvalidConfig(
                "slot_step_minutes must be positive".to_string(),
            ));
        }

        ensure_unique("service", self.services.iter().map(|s| s.id.0))?;
        ensure_unique("specialist", self.specialists.iter().map(|s| s.id.0))?;
        ensure_unique("room", self.rooms.iter().map(|r| r.id.0))?;
        ensure_unique("template", self.templates.iter().map(|t| t.id.0))?;

        let room_types: HashSet<&str> = self
            .room_types
            .iter()
            .map(String::as_str)
            .chain(self.rooms.iter().map(|r| r.room_type.as_str()))
            .collect();

        for service in &self.services {
            if service.duration_minutes == 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "service {} has zero duration",
                    service.id
                )));
            }
            if service.required_room_types.is_empty() {
                return Err(EngineError::InvalidConfig(format!(
                    "service {} requires no room type",
                    service.id
                )));
            }
            if let Some(unknown) = service
                .required_room_types
                .iter()
                .find(|t| !room_types.contains(t.as_str()))
            {
                return Err(EngineError::InvalidConfig(format!(
                    "service {} requires unknown room type '{}'",
                    service.id, unknown
                )));
            }
        }

        let known: HashSet<ServiceId> = self.services.iter().map(|s| s.id).collect();
        for specialist in &self.specialists {
            if let Some(unknown) = specialist.services.iter().find(|s| !known.contains(s)) {
                return Err(EngineError::InvalidConfig(format!(
                    "specialist {} references unknown service {}",
                    specialist.id, unknown
                )));
            }
        }
        Ok(())
    }
}

fn ensure_unique(entity: &str, ids: impl Iterator<Item = u64>) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(EngineError::InvalidConfig(format!("duplicate {entity} id {id}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "settings": { "timezone": "Europe/Berlin", "buffer_minutes": 10 },
        "services": [
            { "id": 1, "name": "Thai massage 60", "duration_minutes": 60,
              "required_room_types": ["massage"], "price_cents": 450000 }
        ],
        "specialists": [
            { "id": 7, "full_name": "Mira", "services": [1],
              "hours": [ { "weekday": "Mon", "start": "09:00:00", "end": "18:00:00" } ] }
        ],
        "rooms": [ { "id": 3, "name": "Cabinet 3", "room_type": "massage" } ]
    }"#;

    #[test]
    fn test_load_config_with_defaults() {
        let config = CalendarConfig::from_json_str(CONFIG).unwrap();
        assert_eq!(config.settings.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.settings.buffer_minutes, 10);
        assert_eq!(config.settings.slot_step_minutes, 15);
        assert!(config.rooms[0].active);
        let hours = config.specialists[0].hours.on(Weekday::Mon).unwrap();
        assert_eq!(hours.start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert!(config.specialists[0].hours.on(Weekday::Tue).is_none());
    }

    #[test]
    fn test_reject_inverted_hours() {
        let bad = CONFIG.replace("\"start\": \"09:00:00\"", "\"start\": \"19:00:00\"");
        let err = CalendarConfig::from_json_str(&bad).unwrap_err().to_string();
        assert!(err.contains("must start before"), "got: {err}");
    }

    #[test]
    fn test_reject_duplicate_weekday() {
        let bad = CONFIG.replace(
            "\"hours\": [",
            "\"hours\": [ { \"weekday\": \"Monday\", \"start\": \"08:00:00\", \"end\": \"12:00:00\" },",
        );
        let err = CalendarConfig::from_json_str(&bad).unwrap_err().to_string();
        assert!(err.contains("duplicate hours"), "got: {err}");
    }

    #[test]
    fn test_reject_unknown_service_reference() {
        let bad = CONFIG.replace("\"services\": [1]", "\"services\": [1, 9]");
        let err = CalendarConfig::from_json_str(&bad).unwrap_err().to_string();
        assert!(err.contains("unknown service"), "got: {err}");
    }

    #[test]
    fn test_reject_unknown_room_type() {
        let bad = CONFIG.replace(
            "\"required_room_types\": [\"massage\"]",
            "\"required_room_types\": [\"masage\"]",
        );
        let err = CalendarConfig::from_json_str(&bad).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert!(err.to_string().contains("unknown room type 'masage'"), "got: {err}");
    }

    #[test]
    fn test_declared_room_type_without_rooms_is_known() {
        let json = CONFIG
            .replace(
                "\"required_room_types\": [\"massage\"]",
                "\"required_room_types\": [\"massage\", \"sauna\"]",
            )
            .replace("\"rooms\": [", "\"room_types\": [\"sauna\"], \"rooms\": [");
        let config = CalendarConfig::from_json_str(&json).unwrap();
        assert!(config.room_types.contains("sauna"));
        assert!(config.rooms.iter().all(|r| r.room_type != "sauna"));
    }

    #[test]
    fn test_room_compatibility() {
        let config = CalendarConfig::from_json_str(CONFIG).unwrap();
        let service = &config.services[0];
        let mut room = config.rooms[0].clone();
        assert!(service.can_use(&room));
        room.active = false;
        assert!(!service.can_use(&room));
        assert!(service.accepts_room_type(&room));
        room.room_type = "cosmetology".to_string();
        assert!(!service.accepts_room_type(&room));
    }

    #[test]
    fn test_weekly_hours_round_trip_keeps_monday_first_order() {
        let mut week = WeeklyHours::default();
        let h = WorkingHours::new(
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        )
        .unwrap();
        week.set(Weekday::Fri, h);
        week.set(Weekday::Tue, h);
        let days: Vec<Weekday> = week.iter().map(|(d, _)| d).collect();
        assert_eq!(days, vec![Weekday::Tue, Weekday::Fri]);
    }
}
