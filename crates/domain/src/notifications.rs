use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;
use crate::events::{
    NotificationEvent, NotificationHub, CHANNEL_NOTIFICATIONS, CHANNEL_NOTIFICATION_COUNT,
};
use crate::ports::notifications::{NotificationListQuery, NotificationRepository};
use crate::util::{now_ms, uuid_v7_without_dashes};
use crate::DomainResult;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Program,
    Application,
    Milestone,
    Payout,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Created,
    Submitted,
    Accepted,
    Rejected,
    Completed,
    Invited,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Named composite predicates over type/action/metadata. Closed set: an
/// unknown tab is rejected at the API boundary instead of silently adding
/// no predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationTab {
    All,
    Reclaim,
    InvestmentCondition,
    Progress,
}

impl NotificationTab {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(NotificationTab::All),
            "reclaim" => Some(NotificationTab::Reclaim),
            "investment_condition" => Some(NotificationTab::InvestmentCondition),
            "progress" => Some(NotificationTab::Progress),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationFilter {
    Tab(NotificationTab),
    Unread(bool),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub recipient_id: String,
    pub notification_type: NotificationType,
    pub action: NotificationAction,
    pub title: String,
    pub content: String,
    pub entity_id: Option<String>,
    pub metadata: Option<Value>,
    pub read_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct NotificationCreate {
    pub recipient_id: String,
    pub notification_type: NotificationType,
    pub action: NotificationAction,
    pub title: String,
    pub content: String,
    pub entity_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Clone, Debug)]
pub struct NotificationPage {
    pub limit: usize,
    pub offset: usize,
    pub sort: SortOrder,
    pub filters: Vec<NotificationFilter>,
}

impl Default for NotificationPage {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            sort: SortOrder::Desc,
            filters: Vec::new(),
        }
    }
}

/// One page of notifications plus the total match count under the same
/// filter set, independent of limit/offset.
#[derive(Clone, Debug, Serialize)]
pub struct NotificationList {
    pub data: Vec<Notification>,
    pub count: u64,
}

/// Evaluates the filter conjunction against a single row. The mandatory
/// recipient predicate is applied by the repository, not here.
pub fn filter_matches(notification: &Notification, filters: &[NotificationFilter]) -> bool {
    filters.iter().all(|filter| match filter {
        NotificationFilter::Tab(NotificationTab::All) => true,
        NotificationFilter::Tab(NotificationTab::Reclaim) => {
            matches!(
                notification.notification_type,
                NotificationType::Program
                    | NotificationType::Milestone
                    | NotificationType::Application
            ) && notification.action == NotificationAction::Completed
                && metadata_str(notification, "reason") == Some("deadline_passed")
        }
        NotificationFilter::Tab(NotificationTab::InvestmentCondition) => {
            notification.notification_type == NotificationType::Program
                && notification.action == NotificationAction::Invited
                && metadata_present(notification, "tier")
        }
        NotificationFilter::Tab(NotificationTab::Progress) => {
            match notification.notification_type {
                NotificationType::Program => matches!(
                    notification.action,
                    NotificationAction::Accepted | NotificationAction::Rejected
                ),
                NotificationType::Application => matches!(
                    notification.action,
                    NotificationAction::Accepted
                        | NotificationAction::Rejected
                        | NotificationAction::Submitted
                        | NotificationAction::Created
                ),
                NotificationType::Milestone => matches!(
                    notification.action,
                    NotificationAction::Accepted
                        | NotificationAction::Submitted
                        | NotificationAction::Created
                ),
                _ => false,
            }
        }
        NotificationFilter::Unread(true) => notification.read_at_ms.is_none(),
        NotificationFilter::Unread(false) => true,
    })
}

fn metadata_str<'a>(notification: &'a Notification, key: &str) -> Option<&'a str> {
    notification
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get(key))
        .and_then(Value::as_str)
}

fn metadata_present(notification: &Notification, key: &str) -> bool {
    notification
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get(key))
        .is_some_and(|value| !value.is_null())
}

/// Persistence plus fan-out for user-directed notifications. The contract is
/// two-phase: `record` writes the durable row with no publish, `broadcast`
/// signals the live channels, and `notify` runs both in that order.
#[derive(Clone)]
pub struct NotificationService {
    repository: Arc<dyn NotificationRepository>,
    hub: Arc<NotificationHub>,
}

impl NotificationService {
    pub fn new(repository: Arc<dyn NotificationRepository>, hub: Arc<NotificationHub>) -> Self {
        Self { repository, hub }
    }

    pub async fn record(&self, input: NotificationCreate) -> DomainResult<Notification> {
        validate_create(&input)?;
        let notification = Notification {
            notification_id: uuid_v7_without_dashes(),
            recipient_id: input.recipient_id,
            notification_type: input.notification_type,
            action: input.action,
            title: input.title,
            content: input.content,
            entity_id: input.entity_id,
            metadata: input.metadata,
            read_at_ms: None,
            created_at_ms: now_ms(),
        };
        self.repository.create_notification(&notification).await
    }

    /// One event on each logical channel; subscribers re-query.
    pub async fn broadcast(&self, recipient_id: &str, notification_id: Option<&str>) {
        for channel in [CHANNEL_NOTIFICATIONS, CHANNEL_NOTIFICATION_COUNT] {
            self.hub
                .publish(NotificationEvent::new(
                    channel,
                    recipient_id,
                    notification_id.map(str::to_string),
                ))
                .await;
        }
    }

    pub async fn notify(&self, input: NotificationCreate) -> DomainResult<Notification> {
        let notification = self.record(input).await?;
        self.broadcast(
            &notification.recipient_id,
            Some(&notification.notification_id),
        )
        .await;
        Ok(notification)
    }

    pub async fn list(
        &self,
        recipient_id: &str,
        page: NotificationPage,
    ) -> DomainResult<NotificationList> {
        if page.limit == 0 || page.limit > MAX_LIMIT {
            return Err(DomainError::Validation(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        let query = NotificationListQuery {
            recipient_id: recipient_id.to_string(),
            filters: page.filters,
            limit: page.limit,
            offset: page.offset,
            sort: page.sort,
        };
        let data = self.repository.list_notifications(&query).await?;
        let count = self.repository.count_notifications(&query).await?;
        Ok(NotificationList { data, count })
    }

    pub async fn unread_count(&self, recipient_id: &str) -> DomainResult<u64> {
        self.repository.unread_count(recipient_id).await
    }

    /// Idempotent: an already-read notification is returned unchanged and no
    /// event is published. A row owned by another recipient is reported as
    /// missing, never as forbidden.
    pub async fn mark_read(
        &self,
        recipient_id: &str,
        notification_id: &str,
    ) -> DomainResult<Notification> {
        let existing = self
            .repository
            .get_notification(recipient_id, notification_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("notification".to_string()))?;
        if existing.read_at_ms.is_some() {
            return Ok(existing);
        }

        let updated = self
            .repository
            .mark_read(recipient_id, notification_id, now_ms())
            .await?;
        self.broadcast(recipient_id, Some(notification_id)).await;
        Ok(updated)
    }

    /// Returns how many rows transitioned; publishes once per channel only
    /// when at least one did.
    pub async fn mark_all_read(&self, recipient_id: &str) -> DomainResult<u64> {
        let updated = self.repository.mark_all_read(recipient_id, now_ms()).await?;
        if updated > 0 {
            self.broadcast(recipient_id, None).await;
        }
        Ok(updated)
    }
}

fn validate_create(input: &NotificationCreate) -> DomainResult<()> {
    if input.recipient_id.trim().is_empty() {
        return Err(DomainError::Validation("recipient_id is required".into()));
    }
    if input.title.trim().is_empty() {
        return Err(DomainError::Validation("title is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notification(
        notification_type: NotificationType,
        action: NotificationAction,
        metadata: Option<Value>,
        read_at_ms: Option<i64>,
    ) -> Notification {
        Notification {
            notification_id: "n-1".into(),
            recipient_id: "u-1".into(),
            notification_type,
            action,
            title: "title".into(),
            content: "content".into(),
            entity_id: None,
            metadata,
            read_at_ms,
            created_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn reclaim_tab_requires_completed_action_and_deadline_reason() {
        let filters = [NotificationFilter::Tab(NotificationTab::Reclaim)];
        let hit = notification(
            NotificationType::Milestone,
            NotificationAction::Completed,
            Some(json!({"reason": "deadline_passed"})),
            None,
        );
        assert!(filter_matches(&hit, &filters));

        let wrong_reason = notification(
            NotificationType::Milestone,
            NotificationAction::Completed,
            Some(json!({"reason": "finished"})),
            None,
        );
        assert!(!filter_matches(&wrong_reason, &filters));

        let wrong_action = notification(
            NotificationType::Milestone,
            NotificationAction::Accepted,
            Some(json!({"reason": "deadline_passed"})),
            None,
        );
        assert!(!filter_matches(&wrong_action, &filters));
    }

    #[test]
    fn investment_condition_tab_requires_a_present_tier() {
        let filters = [NotificationFilter::Tab(NotificationTab::InvestmentCondition)];
        let with_tier = notification(
            NotificationType::Program,
            NotificationAction::Invited,
            Some(json!({"tier": "gold"})),
            None,
        );
        assert!(filter_matches(&with_tier, &filters));

        let null_tier = notification(
            NotificationType::Program,
            NotificationAction::Invited,
            Some(json!({"tier": null})),
            None,
        );
        assert!(!filter_matches(&null_tier, &filters));

        let no_metadata =
            notification(NotificationType::Program, NotificationAction::Invited, None, None);
        assert!(!filter_matches(&no_metadata, &filters));
    }

    #[test]
    fn progress_tab_uses_type_specific_action_sets() {
        let filters = [NotificationFilter::Tab(NotificationTab::Progress)];
        let milestone_submitted = notification(
            NotificationType::Milestone,
            NotificationAction::Submitted,
            None,
            None,
        );
        assert!(filter_matches(&milestone_submitted, &filters));

        // Rejected is in the application set but not the milestone set.
        let milestone_rejected = notification(
            NotificationType::Milestone,
            NotificationAction::Rejected,
            None,
            None,
        );
        assert!(!filter_matches(&milestone_rejected, &filters));

        let application_rejected = notification(
            NotificationType::Application,
            NotificationAction::Rejected,
            None,
            None,
        );
        assert!(filter_matches(&application_rejected, &filters));

        let payout = notification(
            NotificationType::Payout,
            NotificationAction::Accepted,
            None,
            None,
        );
        assert!(!filter_matches(&payout, &filters));
    }

    #[test]
    fn unread_filter_only_binds_when_true() {
        let read = notification(
            NotificationType::System,
            NotificationAction::Created,
            None,
            Some(1_700_000_001_000),
        );
        assert!(!filter_matches(&read, &[NotificationFilter::Unread(true)]));
        assert!(filter_matches(&read, &[NotificationFilter::Unread(false)]));
    }

    #[test]
    fn unknown_tab_values_do_not_parse() {
        assert!(NotificationTab::parse("progress").is_some());
        assert!(NotificationTab::parse("payouts").is_none());
        assert!(NotificationTab::parse("").is_none());
    }
}
