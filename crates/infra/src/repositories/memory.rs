use std::collections::HashMap;
use std::sync::Arc;

use ludium_domain::applications::{Application, ApplicationStatus};
use ludium_domain::error::DomainError;
use ludium_domain::milestones::{Milestone, MilestoneStatus};
use ludium_domain::notifications::{filter_matches, Notification, SortOrder};
use ludium_domain::ports::applications::{ApplicationChain, ApplicationRepository};
use ludium_domain::ports::milestones::{MilestoneChain, MilestoneRepository};
use ludium_domain::ports::notifications::{NotificationListQuery, NotificationRepository};
use ludium_domain::ports::programs::ProgramRepository;
use ludium_domain::ports::BoxFuture;
use ludium_domain::programs::{Program, RoleAssignment};
use ludium_domain::DomainResult;
use tokio::sync::RwLock;

/// Single-process backend. One store owns every table so chain lookups can
/// read all of them under one pass, mirroring the single-snapshot contract
/// of the persistent backend.
#[derive(Default)]
pub struct InMemoryStore {
    programs: Arc<RwLock<HashMap<String, Program>>>,
    roles: Arc<RwLock<HashMap<String, RoleAssignment>>>,
    applications: Arc<RwLock<HashMap<String, Application>>>,
    milestones: Arc<RwLock<HashMap<String, Milestone>>>,
    notifications: Arc<RwLock<HashMap<String, Notification>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn role_key(assignment: &RoleAssignment) -> String {
        format!(
            "{}:{}:{}",
            assignment.program_id,
            assignment.user_id,
            assignment.role.as_str()
        )
    }
}

impl ProgramRepository for InMemoryStore {
    fn create_program(&self, program: &Program) -> BoxFuture<'_, DomainResult<Program>> {
        let program = program.clone();
        let programs = self.programs.clone();
        Box::pin(async move {
            let mut programs = programs.write().await;
            if programs.contains_key(&program.program_id) {
                return Err(DomainError::Conflict);
            }
            programs.insert(program.program_id.clone(), program.clone());
            Ok(program)
        })
    }

    fn get_program(&self, program_id: &str) -> BoxFuture<'_, DomainResult<Option<Program>>> {
        let program_id = program_id.to_string();
        let programs = self.programs.clone();
        Box::pin(async move { Ok(programs.read().await.get(&program_id).cloned()) })
    }

    fn assign_role(
        &self,
        assignment: &RoleAssignment,
    ) -> BoxFuture<'_, DomainResult<RoleAssignment>> {
        let assignment = assignment.clone();
        let roles = self.roles.clone();
        Box::pin(async move {
            let key = Self::role_key(&assignment);
            let mut roles = roles.write().await;
            if roles.contains_key(&key) {
                return Err(DomainError::Conflict);
            }
            roles.insert(key, assignment.clone());
            Ok(assignment)
        })
    }

    fn list_roles(
        &self,
        program_id: &str,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<RoleAssignment>>> {
        let program_id = program_id.to_string();
        let user_id = user_id.to_string();
        let roles = self.roles.clone();
        Box::pin(async move {
            let roles = roles.read().await;
            let mut matching: Vec<_> = roles
                .values()
                .filter(|role| role.program_id == program_id && role.user_id == user_id)
                .cloned()
                .collect();
            matching.sort_by(|left, right| left.created_at_ms.cmp(&right.created_at_ms));
            Ok(matching)
        })
    }
}

impl ApplicationRepository for InMemoryStore {
    fn create_application(
        &self,
        application: &Application,
    ) -> BoxFuture<'_, DomainResult<Application>> {
        let application = application.clone();
        let applications = self.applications.clone();
        Box::pin(async move {
            let mut applications = applications.write().await;
            let duplicate = applications.values().any(|existing| {
                existing.program_id == application.program_id
                    && existing.applicant_id == application.applicant_id
            });
            if duplicate || applications.contains_key(&application.application_id) {
                return Err(DomainError::Conflict);
            }
            applications.insert(application.application_id.clone(), application.clone());
            Ok(application)
        })
    }

    fn get_application(
        &self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Application>>> {
        let application_id = application_id.to_string();
        let applications = self.applications.clone();
        Box::pin(async move { Ok(applications.read().await.get(&application_id).cloned()) })
    }

    fn get_with_program(
        &self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ApplicationChain>>> {
        let application_id = application_id.to_string();
        let applications = self.applications.clone();
        let programs = self.programs.clone();
        Box::pin(async move {
            let applications = applications.read().await;
            let Some(application) = applications.get(&application_id).cloned() else {
                return Ok(None);
            };
            let program = programs.read().await.get(&application.program_id).cloned();
            Ok(Some(ApplicationChain {
                application,
                program,
            }))
        })
    }

    fn update_application_status(
        &self,
        application_id: &str,
        status: ApplicationStatus,
        updated_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Application>> {
        let application_id = application_id.to_string();
        let applications = self.applications.clone();
        Box::pin(async move {
            let mut applications = applications.write().await;
            let application = applications
                .get_mut(&application_id)
                .ok_or_else(|| DomainError::NotFound("application".to_string()))?;
            application.status = status;
            application.updated_at_ms = updated_at_ms;
            Ok(application.clone())
        })
    }
}

impl MilestoneRepository for InMemoryStore {
    fn create_milestone(&self, milestone: &Milestone) -> BoxFuture<'_, DomainResult<Milestone>> {
        let milestone = milestone.clone();
        let milestones = self.milestones.clone();
        Box::pin(async move {
            let mut milestones = milestones.write().await;
            if milestones.contains_key(&milestone.milestone_id) {
                return Err(DomainError::Conflict);
            }
            milestones.insert(milestone.milestone_id.clone(), milestone.clone());
            Ok(milestone)
        })
    }

    fn get_chain(
        &self,
        milestone_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<MilestoneChain>>> {
        let milestone_id = milestone_id.to_string();
        let milestones = self.milestones.clone();
        let applications = self.applications.clone();
        let programs = self.programs.clone();
        Box::pin(async move {
            let milestones = milestones.read().await;
            let Some(milestone) = milestones.get(&milestone_id).cloned() else {
                return Ok(None);
            };
            let application = applications
                .read()
                .await
                .get(&milestone.application_id)
                .cloned();
            let program = match &application {
                Some(application) => {
                    programs.read().await.get(&application.program_id).cloned()
                }
                None => None,
            };
            Ok(Some(MilestoneChain {
                milestone,
                application,
                program,
            }))
        })
    }

    fn update_milestone_status(
        &self,
        milestone_id: &str,
        status: MilestoneStatus,
        updated_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Milestone>> {
        let milestone_id = milestone_id.to_string();
        let milestones = self.milestones.clone();
        Box::pin(async move {
            let mut milestones = milestones.write().await;
            let milestone = milestones
                .get_mut(&milestone_id)
                .ok_or_else(|| DomainError::NotFound("milestone".to_string()))?;
            milestone.status = status;
            milestone.updated_at_ms = updated_at_ms;
            Ok(milestone.clone())
        })
    }
}

fn sort_page(rows: &mut [Notification], sort: SortOrder) {
    rows.sort_by(|left, right| {
        let ordering = left
            .created_at_ms
            .cmp(&right.created_at_ms)
            .then_with(|| left.notification_id.cmp(&right.notification_id));
        match sort {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

impl NotificationRepository for InMemoryStore {
    fn create_notification(
        &self,
        notification: &Notification,
    ) -> BoxFuture<'_, DomainResult<Notification>> {
        let notification = notification.clone();
        let notifications = self.notifications.clone();
        Box::pin(async move {
            let mut notifications = notifications.write().await;
            if notifications.contains_key(&notification.notification_id) {
                return Err(DomainError::Conflict);
            }
            notifications.insert(notification.notification_id.clone(), notification.clone());
            Ok(notification)
        })
    }

    fn get_notification(
        &self,
        recipient_id: &str,
        notification_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Notification>>> {
        let recipient_id = recipient_id.to_string();
        let notification_id = notification_id.to_string();
        let notifications = self.notifications.clone();
        Box::pin(async move {
            let notifications = notifications.read().await;
            Ok(notifications
                .get(&notification_id)
                .filter(|notification| notification.recipient_id == recipient_id)
                .cloned())
        })
    }

    fn list_notifications(
        &self,
        query: &NotificationListQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<Notification>>> {
        let query = query.clone();
        let notifications = self.notifications.clone();
        Box::pin(async move {
            let notifications = notifications.read().await;
            let mut rows: Vec<_> = notifications
                .values()
                .filter(|notification| notification.recipient_id == query.recipient_id)
                .filter(|notification| filter_matches(notification, &query.filters))
                .cloned()
                .collect();
            sort_page(&mut rows, query.sort);
            Ok(rows
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .collect())
        })
    }

    fn count_notifications(
        &self,
        query: &NotificationListQuery,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let query = query.clone();
        let notifications = self.notifications.clone();
        Box::pin(async move {
            let notifications = notifications.read().await;
            let count = notifications
                .values()
                .filter(|notification| notification.recipient_id == query.recipient_id)
                .filter(|notification| filter_matches(notification, &query.filters))
                .count();
            Ok(count as u64)
        })
    }

    fn mark_read(
        &self,
        recipient_id: &str,
        notification_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Notification>> {
        let recipient_id = recipient_id.to_string();
        let notification_id = notification_id.to_string();
        let notifications = self.notifications.clone();
        Box::pin(async move {
            let mut notifications = notifications.write().await;
            let notification = notifications
                .get_mut(&notification_id)
                .filter(|notification| notification.recipient_id == recipient_id)
                .ok_or_else(|| DomainError::NotFound("notification".to_string()))?;
            if notification.read_at_ms.is_none() {
                notification.read_at_ms = Some(read_at_ms);
            }
            Ok(notification.clone())
        })
    }

    fn mark_all_read(
        &self,
        recipient_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let recipient_id = recipient_id.to_string();
        let notifications = self.notifications.clone();
        Box::pin(async move {
            let mut notifications = notifications.write().await;
            let mut updated = 0u64;
            for notification in notifications.values_mut() {
                if notification.recipient_id == recipient_id
                    && notification.read_at_ms.is_none()
                {
                    notification.read_at_ms = Some(read_at_ms);
                    updated += 1;
                }
            }
            Ok(updated)
        })
    }

    fn unread_count(&self, recipient_id: &str) -> BoxFuture<'_, DomainResult<u64>> {
        let recipient_id = recipient_id.to_string();
        let notifications = self.notifications.clone();
        Box::pin(async move {
            let notifications = notifications.read().await;
            let count = notifications
                .values()
                .filter(|notification| {
                    notification.recipient_id == recipient_id
                        && notification.read_at_ms.is_none()
                })
                .count();
            Ok(count as u64)
        })
    }
}
