use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::applications::{ApplicationStatus, ReviewDecision};
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::notifications::{
    NotificationAction, NotificationCreate, NotificationService, NotificationType,
};
use crate::ports::applications::ApplicationRepository;
use crate::ports::milestones::{MilestoneChain, MilestoneRepository};
use crate::scope::{AccessScope, ScopeService};
use crate::util::{now_ms, uuid_v7_without_dashes};
use crate::DomainResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    Submitted,
    Accepted,
    Rejected,
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Milestone {
    pub milestone_id: String,
    pub application_id: String,
    pub title: String,
    pub amount: Option<String>,
    pub deadline_ms: Option<i64>,
    pub status: MilestoneStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct MilestoneCreate {
    pub title: String,
    pub amount: Option<String>,
    pub deadline_ms: Option<i64>,
}

#[derive(Clone)]
pub struct MilestoneService {
    milestones: Arc<dyn MilestoneRepository>,
    applications: Arc<dyn ApplicationRepository>,
    scope: ScopeService,
    notifications: NotificationService,
}

impl MilestoneService {
    pub fn new(
        milestones: Arc<dyn MilestoneRepository>,
        applications: Arc<dyn ApplicationRepository>,
        scope: ScopeService,
        notifications: NotificationService,
    ) -> Self {
        Self {
            milestones,
            applications,
            scope,
            notifications,
        }
    }

    /// Builder-only; milestones can only be attached to an accepted
    /// application.
    pub async fn create(
        &self,
        actor: ActorIdentity,
        application_id: &str,
        input: MilestoneCreate,
    ) -> DomainResult<Milestone> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(DomainError::Validation("title is required".into()));
        }
        self.scope
            .check(AccessScope::ApplicationBuilder, &actor.user_id, application_id)
            .await?
            .require("only the applicant can add milestones")?;

        let application = self
            .applications
            .get_application(application_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("application".to_string()))?;
        if application.status != ApplicationStatus::Accepted {
            return Err(DomainError::Validation(
                "milestones require an accepted application".into(),
            ));
        }

        let now = now_ms();
        let milestone = Milestone {
            milestone_id: uuid_v7_without_dashes(),
            application_id: application_id.to_string(),
            title,
            amount: input.amount,
            deadline_ms: input.deadline_ms,
            status: MilestoneStatus::Pending,
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.milestones.create_milestone(&milestone).await
    }

    /// Builder submits work for review; the program validator (when one is
    /// assigned) is notified.
    pub async fn submit(&self, actor: ActorIdentity, milestone_id: &str) -> DomainResult<Milestone> {
        self.scope
            .check(AccessScope::MilestoneBuilder, &actor.user_id, milestone_id)
            .await?
            .require("only the applicant can submit this milestone")?;

        let chain = self.chain(milestone_id).await?;
        if !matches!(
            chain.milestone.status,
            MilestoneStatus::Pending | MilestoneStatus::Rejected
        ) {
            return Err(DomainError::Validation(
                "milestone is not awaiting submission".into(),
            ));
        }

        let updated = self
            .milestones
            .update_milestone_status(milestone_id, MilestoneStatus::Submitted, now_ms())
            .await?;

        if let Some(validator_id) = chain.program.and_then(|program| program.validator_id) {
            self.notifications
                .notify(NotificationCreate {
                    recipient_id: validator_id,
                    notification_type: NotificationType::Milestone,
                    action: NotificationAction::Submitted,
                    title: format!("Milestone submitted: {}", updated.title),
                    content: "A milestone is awaiting your review".to_string(),
                    entity_id: Some(milestone_id.to_string()),
                    metadata: None,
                })
                .await?;
        }

        Ok(updated)
    }

    /// Validator-only; only submitted milestones can be reviewed. The
    /// builder is notified of the outcome.
    pub async fn review(
        &self,
        actor: ActorIdentity,
        milestone_id: &str,
        decision: ReviewDecision,
    ) -> DomainResult<Milestone> {
        self.scope
            .check(AccessScope::MilestoneValidator, &actor.user_id, milestone_id)
            .await?
            .require("only the program validator can review milestones")?;

        let chain = self.chain(milestone_id).await?;
        if chain.milestone.status != MilestoneStatus::Submitted {
            return Err(DomainError::Validation(
                "only submitted milestones can be reviewed".into(),
            ));
        }

        let (status, action, verdict) = match decision {
            ReviewDecision::Accept => {
                (MilestoneStatus::Accepted, NotificationAction::Accepted, "accepted")
            }
            ReviewDecision::Reject => {
                (MilestoneStatus::Rejected, NotificationAction::Rejected, "rejected")
            }
        };
        let updated = self
            .milestones
            .update_milestone_status(milestone_id, status, now_ms())
            .await?;

        if let Some(application) = chain.application {
            self.notifications
                .notify(NotificationCreate {
                    recipient_id: application.applicant_id,
                    notification_type: NotificationType::Milestone,
                    action,
                    title: format!("Milestone {verdict}: {}", updated.title),
                    content: format!("Your milestone was {verdict}"),
                    entity_id: Some(milestone_id.to_string()),
                    metadata: None,
                })
                .await?;
        }

        Ok(updated)
    }

    /// Program-creator-only recovery path for overdue milestones: once the
    /// deadline has passed and the work was never accepted, the milestone is
    /// closed as completed with a deadline marker the reclaim tab filters on.
    pub async fn reclaim_expired(
        &self,
        actor: ActorIdentity,
        milestone_id: &str,
    ) -> DomainResult<Milestone> {
        let chain = self.chain(milestone_id).await?;
        let Some(application) = chain.application.clone() else {
            return Err(DomainError::NotFound("application".to_string()));
        };
        let Some(program) = chain.program else {
            return Err(DomainError::NotFound("program".to_string()));
        };
        if program.creator_id != actor.user_id {
            return Err(DomainError::Forbidden(
                "only the program creator can reclaim a milestone".into(),
            ));
        }

        let deadline_passed = chain
            .milestone
            .deadline_ms
            .is_some_and(|deadline| deadline < now_ms());
        if !deadline_passed {
            return Err(DomainError::Validation(
                "milestone deadline has not passed".into(),
            ));
        }
        if matches!(
            chain.milestone.status,
            MilestoneStatus::Accepted | MilestoneStatus::Completed
        ) {
            return Err(DomainError::Validation("milestone is not reclaimable".into()));
        }

        let updated = self
            .milestones
            .update_milestone_status(milestone_id, MilestoneStatus::Completed, now_ms())
            .await?;

        self.notifications
            .notify(NotificationCreate {
                recipient_id: application.applicant_id,
                notification_type: NotificationType::Milestone,
                action: NotificationAction::Completed,
                title: format!("Milestone reclaimed: {}", updated.title),
                content: "The milestone deadline passed and the sponsor reclaimed it"
                    .to_string(),
                entity_id: Some(milestone_id.to_string()),
                metadata: Some(json!({ "reason": "deadline_passed" })),
            })
            .await?;

        Ok(updated)
    }

    async fn chain(&self, milestone_id: &str) -> DomainResult<MilestoneChain> {
        self.milestones
            .get_chain(milestone_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("milestone".to_string()))
    }
}
