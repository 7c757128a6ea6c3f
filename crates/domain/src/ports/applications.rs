use crate::applications::{Application, ApplicationStatus};
use crate::programs::Program;
use crate::DomainResult;

use super::BoxFuture;

/// Application plus its parent program, resolved from a single snapshot so
/// scope checks cannot observe a half-updated chain.
#[derive(Clone, Debug)]
pub struct ApplicationChain {
    pub application: Application,
    pub program: Option<Program>,
}

pub trait ApplicationRepository: Send + Sync {
    /// Fails with `Conflict` when the applicant already has an application
    /// for the program.
    fn create_application(
        &self,
        application: &Application,
    ) -> BoxFuture<'_, DomainResult<Application>>;

    fn get_application(
        &self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Application>>>;

    fn get_with_program(
        &self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ApplicationChain>>>;

    fn update_application_status(
        &self,
        application_id: &str,
        status: ApplicationStatus,
        updated_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Application>>;
}
