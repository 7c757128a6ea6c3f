use crate::applications::Application;
use crate::milestones::{Milestone, MilestoneStatus};
use crate::programs::Program;
use crate::DomainResult;

use super::BoxFuture;

/// Milestone plus its parent application and program, resolved from a single
/// snapshot. A missing link is `None`, never an error.
#[derive(Clone, Debug)]
pub struct MilestoneChain {
    pub milestone: Milestone,
    pub application: Option<Application>,
    pub program: Option<Program>,
}

pub trait MilestoneRepository: Send + Sync {
    fn create_milestone(&self, milestone: &Milestone) -> BoxFuture<'_, DomainResult<Milestone>>;

    fn get_chain(
        &self,
        milestone_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<MilestoneChain>>>;

    fn update_milestone_status(
        &self,
        milestone_id: &str,
        status: MilestoneStatus,
        updated_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Milestone>>;
}
