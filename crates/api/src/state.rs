use std::sync::Arc;

use ludium_domain::applications::ApplicationService;
use ludium_domain::events::NotificationHub;
use ludium_domain::milestones::MilestoneService;
use ludium_domain::notifications::NotificationService;
use ludium_domain::ports::applications::ApplicationRepository;
use ludium_domain::ports::db::DbAdapter;
use ludium_domain::ports::milestones::MilestoneRepository;
use ludium_domain::ports::notifications::NotificationRepository;
use ludium_domain::ports::programs::ProgramRepository;
use ludium_domain::programs::ProgramService;
use ludium_domain::scope::ScopeService;
use ludium_domain::visibility::VisibilityPolicy;
use ludium_infra::config::AppConfig;
use ludium_infra::db::{self, DbConfig, SurrealAdapter};
use ludium_infra::repositories::{InMemoryStore, SurrealStore};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub hub: Arc<NotificationHub>,
    pub db_adapter: Option<Arc<dyn DbAdapter>>,
    program_repo: Arc<dyn ProgramRepository>,
    application_repo: Arc<dyn ApplicationRepository>,
    milestone_repo: Arc<dyn MilestoneRepository>,
    notification_repo: Arc<dyn NotificationRepository>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        if config.data_backend.eq_ignore_ascii_case("surreal") {
            let db_config = DbConfig::from_app_config(&config);
            let client = db::connect(&db_config).await?;
            let adapter: Arc<dyn DbAdapter> = Arc::new(SurrealAdapter::new(db_config));
            let store = Arc::new(SurrealStore::with_client(client));
            Ok(Self::with_store(config, store, Some(adapter)))
        } else {
            Ok(Self::in_memory(config))
        }
    }

    pub fn in_memory(config: AppConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()), None)
    }

    fn with_store<S>(config: AppConfig, store: Arc<S>, db_adapter: Option<Arc<dyn DbAdapter>>) -> Self
    where
        S: ProgramRepository
            + ApplicationRepository
            + MilestoneRepository
            + NotificationRepository
            + 'static,
    {
        Self {
            config,
            hub: Arc::new(NotificationHub::default()),
            db_adapter,
            program_repo: store.clone(),
            application_repo: store.clone(),
            milestone_repo: store.clone(),
            notification_repo: store,
        }
    }

    pub fn scope_service(&self) -> ScopeService {
        ScopeService::new(
            self.program_repo.clone(),
            self.application_repo.clone(),
            self.milestone_repo.clone(),
        )
    }

    pub fn visibility_policy(&self) -> VisibilityPolicy {
        VisibilityPolicy::new(self.program_repo.clone())
    }

    pub fn notification_service(&self) -> NotificationService {
        NotificationService::new(self.notification_repo.clone(), self.hub.clone())
    }

    pub fn program_service(&self) -> ProgramService {
        ProgramService::new(
            self.program_repo.clone(),
            self.scope_service(),
            self.visibility_policy(),
            self.notification_service(),
        )
    }

    pub fn application_service(&self) -> ApplicationService {
        ApplicationService::new(
            self.application_repo.clone(),
            self.program_repo.clone(),
            self.scope_service(),
            self.visibility_policy(),
            self.notification_service(),
        )
    }

    pub fn milestone_service(&self) -> MilestoneService {
        MilestoneService::new(
            self.milestone_repo.clone(),
            self.application_repo.clone(),
            self.scope_service(),
            self.notification_service(),
        )
    }
}
