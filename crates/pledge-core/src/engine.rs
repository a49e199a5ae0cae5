use crate::accounts::{RegistrationConfig, RegistrationService, VerificationMailer};
use crate::channels::ChannelRegistry;
use crate::dispatch::{DispatchConfig, MessageDispatcher};
use crate::error::PledgeResult;
use crate::events::EventService;
use crate::pledges::PledgeService;
use crate::reminders::ReminderService;
use crate::stats::StatsService;
use crate::store::{open_store, PledgeStore, StorageConfig};
use crate::templates::TemplateService;
use crate::types::DEFAULT_PER_PAGE;
use std::sync::Arc;
use tracing::info;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct PledgeEngineConfig {
    pub storage: StorageConfig,
    pub dispatch: DispatchConfig,
    pub registration: RegistrationConfig,
    pub per_page: usize,
}

impl Default for PledgeEngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Memory,
            dispatch: DispatchConfig::default(),
            registration: RegistrationConfig::default(),
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Every service wired over one store, one channel registry and one mailer.
#[derive(Clone)]
pub struct PledgeEngine {
    store: Arc<dyn PledgeStore>,
    events: EventService,
    pledges: PledgeService,
    templates: TemplateService,
    dispatcher: MessageDispatcher,
    reminders: ReminderService,
    accounts: RegistrationService,
    stats: StatsService,
    per_page: usize,
}

impl PledgeEngine {
    /// Open the configured store and wire the services over it.
    pub async fn bootstrap(
        config: PledgeEngineConfig,
        channels: ChannelRegistry,
        mailer: Arc<dyn VerificationMailer>,
    ) -> PledgeResult<Self> {
        let store = open_store(&config.storage).await?;
        let engine = Self::with_store(store, channels, mailer, config);
        info!(
            backend = engine.store.backend_label(),
            channels = ?engine.dispatcher.channels().methods(),
            "Pledge engine ready"
        );
        Ok(engine)
    }

    /// Wire the services over an already opened store. `config.storage` is ignored.
    pub fn with_store(
        store: Arc<dyn PledgeStore>,
        channels: ChannelRegistry,
        mailer: Arc<dyn VerificationMailer>,
        config: PledgeEngineConfig,
    ) -> Self {
        let templates = TemplateService::new(store.clone());
        let dispatcher = MessageDispatcher::new(store.clone(), Arc::new(channels), config.dispatch);
        let reminders = ReminderService::new(store.clone(), templates.clone(), dispatcher.clone());
        Self {
            events: EventService::new(store.clone()),
            pledges: PledgeService::new(store.clone()),
            accounts: RegistrationService::new(store.clone(), mailer, config.registration),
            stats: StatsService::new(store.clone()),
            templates,
            dispatcher,
            reminders,
            per_page: config.per_page.max(1),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn PledgeStore> {
        &self.store
    }

    pub fn events(&self) -> &EventService {
        &self.events
    }

    pub fn pledges(&self) -> &PledgeService {
        &self.pledges
    }

    pub fn templates(&self) -> &TemplateService {
        &self.templates
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub fn reminders(&self) -> &ReminderService {
        &self.reminders
    }

    pub fn accounts(&self) -> &RegistrationService {
        &self.accounts
    }

    pub fn stats(&self) -> &StatsService {
        &self.stats
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }
}
