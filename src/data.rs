use chrono::{TimeZone, Utc};

use crate::structs::*;

/// (id, start stop, departure, arrival at college)
const ROUTES: [(&str, &str, &str, &str); 10] = [
    ("R01", "Ennore", "5:50 am", "6:50 am"),
    ("R01A", "Tondiarpet", "6:17 am", "7:15 am"),
    ("R02", "Triplicane", "6:00 am", "7:00 am"),
    ("R03", "Choolai", "6:00 am", "7:00 am"),
    ("R03A", "Collector Nagar", "6:50 am", "7:45 am"),
    ("R03B", "Water Tank", "6:40 am", "7:35 am"),
    ("R04", "East Mugappair", "6:30 am", "7:30 am"),
    ("R05", "CIT Nagar", "6:10 am", "7:10 am"),
    ("R05A", "Loyola College", "6:40 am", "7:35 am"),
    ("R06", "Chinmayanagar", "6:10 am", "7:10 am"),
];

pub fn bus_routes() -> Vec<Route> {
    ROUTES
        .iter()
        .map(|&(id, name, start, arrive)| Route {
            id: id.to_string(),
            route_no: id.to_string(),
            name: name.to_string(),
            start_time: start.to_string(),
            stops: vec![
                Stop {
                    id: format!("{}-1", id),
                    name: name.to_string(),
                    time: start.to_string(),
                },
                Stop {
                    id: format!("{}-2", id),
                    name: "College".to_string(),
                    time: arrive.to_string(),
                },
            ],
        })
        .collect()
}

/// Static route reference data.
#[derive(Debug, Clone)]
pub struct RouteCatalog {
    routes: Vec<Route>,
}

impl RouteCatalog {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn get(&self, id: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn all(&self) -> &[Route] {
        &self.routes
    }

    /// "R01 - Ennore", or "Unknown Route" for a dangling id.
    pub fn label(&self, id: &str) -> String {
        self.get(id).map(Route::label).unwrap_or_else(|| "Unknown Route".to_string())
    }
}

impl Default for RouteCatalog {
    fn default() -> Self {
        Self::new(bus_routes())
    }
}

pub fn seed_feedback() -> Vec<FeedbackItem> {
    let at = |day: u32| Utc.with_ymd_and_hms(2023, 5, day, 9, 0, 0).single().unwrap_or_default();
    let item = |id: &str, author: &str, route: &str, kind, title: &str, description: &str, status, created, updated| {
        FeedbackItem {
            id: id.to_string(),
            author_id: author.to_string(),
            route_id: route.to_string(),
            kind,
            title: title.to_string(),
            description: description.to_string(),
            status,
            created_at: at(created),
            updated_at: at(updated),
        }
    };

    vec![
        item(
            "1",
            "student1",
            "R01",
            FeedbackKind::Complaint,
            "Bus arrived late",
            "The bus was 15 minutes late today at Ennore. This has been happening regularly for the past week.",
            FeedbackStatus::Pending,
            15,
            15,
        ),
        item(
            "2",
            "student2",
            "R02",
            FeedbackKind::Complaint,
            "AC not working",
            "The air conditioner in the bus on the Triplicane route is not functioning properly. It gets very uncomfortable in the afternoon.",
            FeedbackStatus::Reviewing,
            14,
            16,
        ),
        item(
            "3",
            "student3",
            "R03",
            FeedbackKind::Feedback,
            "Great service",
            "I wanted to appreciate the punctuality of the bus service from Choolai. The driver is always on time and very courteous.",
            FeedbackStatus::Resolved,
            12,
            13,
        ),
        item(
            "4",
            "student4",
            "R01",
            FeedbackKind::Complaint,
            "Overcrowded bus",
            "The morning bus at 5:50 AM is always overcrowded. Can we have an additional bus or a larger vehicle for this route?",
            FeedbackStatus::Pending,
            16,
            16,
        ),
        item(
            "5",
            "student5",
            "R02",
            FeedbackKind::Complaint,
            "Bus skipped stop",
            "The bus did not stop at Triplicane today even though students were waiting. The driver seemed to be in a hurry.",
            FeedbackStatus::Pending,
            16,
            16,
        ),
    ]
}
