use std::{str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};

use crate::data::RouteCatalog;
use crate::error::{Error, Result};
use crate::structs::*;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Which status changes the admin editor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Any status to any other status.
    Unrestricted,
    /// pending -> reviewing -> resolved, skipping allowed, never backwards.
    Forward,
}

impl TransitionPolicy {
    pub fn allows(self, from: FeedbackStatus, to: FeedbackStatus) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Forward => to >= from,
        }
    }
}

impl FromStr for TransitionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "unrestricted" | "any" => Ok(Self::Unrestricted),
            "forward" => Ok(Self::Forward),
            other => Err(Error::Config(format!("unknown status policy {other:?}"))),
        }
    }
}

/// Conjunctive filter; `None` or an empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub route_id: Option<String>,
    pub status: Option<FeedbackStatus>,
    pub query: Option<String>,
}

impl Filter {
    pub fn matches(&self, item: &FeedbackItem) -> bool {
        let route = self.route_id.as_ref().map_or(true, |r| &item.route_id == r);
        let status = self.status.map_or(true, |s| item.status == s);
        let text = match self.query.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(q) => {
                let q = q.to_lowercase();
                item.title.to_lowercase().contains(&q) || item.description.to_lowercase().contains(&q)
            }
        };
        route && status && text
    }

    /// Parses admin arguments such as `route:R01 status:pending late bus`.
    /// Words without a prefix form the text query.
    pub fn parse(args: &str) -> Result<Self> {
        let mut filter = Filter::default();
        let mut words = vec![];

        for word in args.split_whitespace() {
            if let Some(route) = word.strip_prefix("route:") {
                filter.route_id = Some(route.to_string());
            } else if let Some(status) = word.strip_prefix("status:") {
                let status = FeedbackStatus::parse(status)
                    .ok_or_else(|| Error::Validation(format!("Unknown status {:?}", status)))?;
                filter.status = Some(status);
            } else {
                words.push(word);
            }
        }
        if !words.is_empty() {
            filter.query = Some(words.join(" "));
        }
        Ok(filter)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub pending: usize,
    pub reviewing: usize,
    pub resolved: usize,
}

/// Per-route line of the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStats {
    pub route_id: String,
    pub label: String,
    pub total: usize,
    pub pending: usize,
}

impl RouteStats {
    pub fn needs_attention(&self) -> bool {
        self.pending > 0
    }
}

pub struct FeedbackBoard {
    items: Vec<FeedbackItem>,
    routes: Arc<RouteCatalog>,
    policy: TransitionPolicy,
}

impl FeedbackBoard {
    pub fn new(routes: Arc<RouteCatalog>, policy: TransitionPolicy) -> Self {
        Self {
            items: vec![],
            routes,
            policy,
        }
    }

    /// Loads pre-existing items, rejecting any that name an unknown route.
    pub fn with_items(mut self, items: Vec<FeedbackItem>) -> Result<Self> {
        for item in items {
            self.check_route(&item.route_id)?;
            self.items.push(item);
        }
        Ok(self)
    }

    fn check_route(&self, route_id: &str) -> Result<()> {
        if self.routes.contains(route_id) {
            Ok(())
        } else {
            Err(Error::UnknownRoute(route_id.to_string()))
        }
    }

    pub fn submit(&mut self, author: &Identity, draft: FeedbackDraft, now: DateTime<Utc>) -> Result<&FeedbackItem> {
        let title = draft.title.trim();
        let description = draft.description.trim();
        if draft.route_id.is_empty() || title.is_empty() || description.is_empty() {
            return Err(Error::Validation("Please fill in all fields".to_string()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(Error::Validation(format!("Title must be at most {} characters", MAX_TITLE_LEN)));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(Error::Validation(format!(
                "Description must be at most {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }
        self.check_route(&draft.route_id)?;

        let item = FeedbackItem {
            id: format!("feedback-{}", uuid::Uuid::new_v4().simple()),
            author_id: author.id.clone(),
            route_id: draft.route_id,
            kind: draft.kind,
            title: title.to_string(),
            description: description.to_string(),
            status: FeedbackStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        log::info!("{} submitted {} {} on {}", author.email, item.kind, item.id, item.route_id);
        self.items.push(item);

        Ok(&self.items[self.items.len() - 1])
    }

    pub fn get(&self, id: &str) -> Option<&FeedbackItem> {
        self.items.iter().find(|f| f.id == id)
    }

    pub fn filter(&self, filter: &Filter) -> Vec<&FeedbackItem> {
        self.items.iter().filter(|f| filter.matches(f)).collect()
    }

    /// Items by one author, newest first.
    pub fn by_author(&self, author_id: &str) -> Vec<&FeedbackItem> {
        let mut items: Vec<&FeedbackItem> = self.items.iter().filter(|f| f.author_id == author_id).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    /// Stamps `updated_at`; no history is kept.
    pub fn set_status(&mut self, id: &str, status: FeedbackStatus, now: DateTime<Utc>) -> Result<&FeedbackItem> {
        let policy = self.policy;
        let item = self
            .items
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::NotFound(format!("feedback {}", id)))?;

        if !policy.allows(item.status, status) {
            return Err(Error::Transition {
                from: item.status.to_string(),
                to: status.to_string(),
            });
        }

        log::info!("Feedback {} moved {} -> {}", item.id, item.status, status);
        item.status = status;
        item.updated_at = now;
        Ok(&*item)
    }

    /// One row per catalog route, in catalog order, including routes with no items.
    pub fn stats_by_route(&self) -> Vec<RouteStats> {
        self.routes
            .all()
            .iter()
            .map(|route| {
                let items = self.items.iter().filter(|f| f.route_id == route.id);
                let (total, pending) = items.fold((0, 0), |(total, pending), f| {
                    (total + 1, pending + usize::from(f.status == FeedbackStatus::Pending))
                });
                RouteStats {
                    route_id: route.id.clone(),
                    label: route.label(),
                    total,
                    pending,
                }
            })
            .collect()
    }

    pub fn stats(&self) -> Stats {
        self.items.iter().fold(
            Stats {
                total: self.items.len(),
                ..Stats::default()
            },
            |mut stats, item| {
                match item.status {
                    FeedbackStatus::Pending => stats.pending += 1,
                    FeedbackStatus::Reviewing => stats.reviewing += 1,
                    FeedbackStatus::Resolved => stats.resolved += 1,
                }
                stats
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::seed_feedback;
    use chrono::Duration;

    fn board(policy: TransitionPolicy) -> FeedbackBoard {
        FeedbackBoard::new(Arc::new(RouteCatalog::default()), policy)
            .with_items(seed_feedback())
            .unwrap()
    }

    fn student() -> Identity {
        Identity {
            id: "ana@college.edu".into(),
            name: "ana".into(),
            email: "ana@college.edu".into(),
            role: Role::Student,
        }
    }

    fn ids(items: Vec<&FeedbackItem>) -> Vec<&str> {
        items.into_iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn route_filter_returns_exact_subset() {
        let board = board(TransitionPolicy::Unrestricted);
        let filter = Filter {
            route_id: Some("R01".into()),
            ..Filter::default()
        };
        assert_eq!(ids(board.filter(&filter)), vec!["1", "4"]);
        assert_eq!(board.filter(&Filter::default()).len(), 5);
    }

    #[test]
    fn combined_filters_intersect() {
        let board = board(TransitionPolicy::Unrestricted);
        let filter = Filter {
            route_id: Some("R02".into()),
            status: Some(FeedbackStatus::Pending),
            query: Some("STOP".into()),
        };
        assert_eq!(ids(board.filter(&filter)), vec!["5"]);

        let filter = Filter {
            query: Some("driver".into()),
            ..Filter::default()
        };
        assert_eq!(ids(board.filter(&filter)), vec!["3", "5"]);
    }

    #[test]
    fn parse_admin_filter() {
        let filter = Filter::parse("route:R01 status:Pending  late bus").unwrap();
        assert_eq!(filter.route_id.as_deref(), Some("R01"));
        assert_eq!(filter.status, Some(FeedbackStatus::Pending));
        assert_eq!(filter.query.as_deref(), Some("late bus"));
        assert!(Filter::parse("status:closed").is_err());
        assert_eq!(Filter::parse("").unwrap(), Filter::default());
    }

    #[test]
    fn set_status_touches_only_target() {
        let mut board = board(TransitionPolicy::Unrestricted);
        let before: Vec<FeedbackItem> = board.filter(&Filter::default()).into_iter().cloned().collect();
        let now = Utc::now();

        board.set_status("2", FeedbackStatus::Resolved, now).unwrap();

        for old in &before {
            let new = board.get(&old.id).unwrap();
            if old.id == "2" {
                assert_eq!(new.status, FeedbackStatus::Resolved);
                assert_eq!(new.updated_at, now);
                assert_eq!(
                    FeedbackItem {
                        status: old.status,
                        updated_at: old.updated_at,
                        ..new.clone()
                    },
                    *old
                );
            } else {
                assert_eq!(new, old);
            }
        }
    }

    #[test]
    fn forward_policy_rejects_going_back() {
        let mut board = board(TransitionPolicy::Forward);
        let now = Utc::now();
        assert!(matches!(
            board.set_status("2", FeedbackStatus::Pending, now),
            Err(Error::Transition { .. })
        ));
        assert!(board.set_status("1", FeedbackStatus::Resolved, now).is_ok());

        let mut open = self::board(TransitionPolicy::Unrestricted);
        assert!(open.set_status("3", FeedbackStatus::Pending, now).is_ok());
    }

    #[test]
    fn unknown_item_is_not_found() {
        let mut board = board(TransitionPolicy::Unrestricted);
        assert!(matches!(
            board.set_status("nope", FeedbackStatus::Resolved, Utc::now()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn submit_validates_and_starts_pending() {
        let mut board = board(TransitionPolicy::Unrestricted);
        let now = Utc::now();

        let missing = FeedbackDraft {
            route_id: "R01".into(),
            ..FeedbackDraft::default()
        };
        assert_eq!(
            board.submit(&student(), missing, now).unwrap_err().user_message(),
            "Please fill in all fields"
        );

        let dangling = FeedbackDraft {
            kind: FeedbackKind::Complaint,
            route_id: "route1".into(),
            title: "Late".into(),
            description: "Again".into(),
        };
        assert!(matches!(board.submit(&student(), dangling, now), Err(Error::UnknownRoute(_))));

        let long = FeedbackDraft {
            route_id: "R01".into(),
            title: "x".repeat(MAX_TITLE_LEN + 1),
            description: "d".into(),
            ..FeedbackDraft::default()
        };
        assert!(board.submit(&student(), long, now).is_err());

        let draft = FeedbackDraft {
            kind: FeedbackKind::Complaint,
            route_id: "R03A".into(),
            title: " Broken seat ".into(),
            description: "Row 4".into(),
        };
        let item = board.submit(&student(), draft, now).unwrap().clone();
        assert_eq!(item.status, FeedbackStatus::Pending);
        assert_eq!(item.title, "Broken seat");
        assert_eq!(item.created_at, item.updated_at);
        assert_eq!(board.stats().total, 6);
    }

    #[test]
    fn by_author_is_newest_first() {
        let mut board = board(TransitionPolicy::Unrestricted);
        let t0 = Utc::now();
        for (i, title) in ["first", "second"].iter().enumerate() {
            let draft = FeedbackDraft {
                route_id: "R01".into(),
                title: title.to_string(),
                description: "d".into(),
                ..FeedbackDraft::default()
            };
            board.submit(&student(), draft, t0 + Duration::minutes(i as i64)).unwrap();
        }
        let titles: Vec<&str> = board.by_author(&student().id).iter().map(|f| f.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);
    }

    #[test]
    fn stats_count_by_status() {
        let board = board(TransitionPolicy::Unrestricted);
        assert_eq!(
            board.stats(),
            Stats {
                total: 5,
                pending: 3,
                reviewing: 1,
                resolved: 1,
            }
        );
    }

    #[test]
    fn route_stats_cover_every_route() {
        let mut board = board(TransitionPolicy::Unrestricted);
        let rows = board.stats_by_route();
        assert_eq!(rows.len(), RouteCatalog::default().all().len());

        let r01 = &rows[0];
        assert_eq!((r01.label.as_str(), r01.total, r01.pending), ("R01 - Ennore", 2, 2));
        assert!(r01.needs_attention());

        let r03 = rows.iter().find(|r| r.route_id == "R03").unwrap();
        assert_eq!((r03.total, r03.pending), (1, 0));
        assert!(!r03.needs_attention());

        let r06 = rows.iter().find(|r| r.route_id == "R06").unwrap();
        assert_eq!((r06.total, r06.pending), (0, 0));

        board.set_status("1", FeedbackStatus::Resolved, Utc::now()).unwrap();
        board.set_status("4", FeedbackStatus::Reviewing, Utc::now()).unwrap();
        assert!(!board.stats_by_route()[0].needs_attention());
    }

    #[test]
    fn with_items_rejects_dangling_routes() {
        let mut items = seed_feedback();
        items[0].route_id = "route1".into();
        let result = FeedbackBoard::new(Arc::new(RouteCatalog::default()), TransitionPolicy::Unrestricted).with_items(items);
        assert!(matches!(result, Err(Error::UnknownRoute(_))));
    }
}
