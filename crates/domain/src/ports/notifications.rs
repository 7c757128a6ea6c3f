use crate::notifications::{Notification, NotificationFilter, SortOrder};
use crate::DomainResult;

use super::BoxFuture;

/// Query shape shared by `list` and `count`; `count` ignores `limit` and
/// `offset` so the total always reflects the full filtered set.
#[derive(Clone, Debug)]
pub struct NotificationListQuery {
    pub recipient_id: String,
    pub filters: Vec<NotificationFilter>,
    pub limit: usize,
    pub offset: usize,
    pub sort: SortOrder,
}

pub trait NotificationRepository: Send + Sync {
    fn create_notification(
        &self,
        notification: &Notification,
    ) -> BoxFuture<'_, DomainResult<Notification>>;

    /// Scoped to the recipient: another tenant's row is indistinguishable
    /// from a missing one.
    fn get_notification(
        &self,
        recipient_id: &str,
        notification_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Notification>>>;

    fn list_notifications(
        &self,
        query: &NotificationListQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<Notification>>>;

    fn count_notifications(
        &self,
        query: &NotificationListQuery,
    ) -> BoxFuture<'_, DomainResult<u64>>;

    fn mark_read(
        &self,
        recipient_id: &str,
        notification_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Notification>>;

    fn mark_all_read(
        &self,
        recipient_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<u64>>;

    fn unread_count(&self, recipient_id: &str) -> BoxFuture<'_, DomainResult<u64>>;
}
