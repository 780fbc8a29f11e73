//! Adapter selection and orchestrator wiring.
//!
//! With `USE_PERSISTENT_STORES=true` the store, lookups, invoices and channel
//! directory are Postgres-backed; otherwise everything is in memory and
//! [`InMemoryBackends`] hands out the seeding handles. The LMS client and the
//! notification sender are chosen independently from their own settings.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use campus_events::{EventEnvelope, InMemoryEventBus};
use campus_infra::{
    config::Settings,
    directory::{InMemoryReferences, References},
    lms::{HttpLmsClient, InMemoryLms, LmsClient},
    messaging::{
        InMemoryChannelDirectory, MessagingChannelDirectory, NotificationSender,
        PostgresChannelDirectory, WebhookNotificationSender,
    },
    orchestrator::{EnrollmentOrchestrator, OrchestratorPorts, TriggerPipeline},
    payments::{InMemoryInvoices, PaymentGate, PostgresPaymentGate},
    store::{EnrollmentStore, InMemoryEnrollmentStore, PostgresEnrollmentStore},
};

pub type EnrollmentBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

const MAX_DB_CONNECTIONS: u32 = 10;

pub struct AppServices {
    pub orchestrator: EnrollmentOrchestrator<EnrollmentBus>,
}

/// Seeding handles for the in-memory adapters (dev and tests).
#[derive(Clone)]
pub struct InMemoryBackends {
    pub references: InMemoryReferences,
    pub invoices: Arc<InMemoryInvoices>,
    pub channels: Arc<InMemoryChannelDirectory>,
    /// Only wired in when no LMS endpoint is configured.
    pub lms: Arc<InMemoryLms>,
}

pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    match &settings.database_url {
        Some(url) => build_persistent_services(settings, url).await,
        None => {
            warn!("USE_PERSISTENT_STORES not set; enrollments are kept in memory");
            Ok(build_in_memory_services(settings).0)
        }
    }
}

pub fn build_in_memory_services(settings: &Settings) -> (AppServices, InMemoryBackends) {
    let (references, seeds) = References::in_memory();
    let invoices = Arc::new(InMemoryInvoices::new());
    let channels = Arc::new(InMemoryChannelDirectory::new());
    let fallback_lms = Arc::new(InMemoryLms::new());

    let store: Arc<dyn EnrollmentStore> = Arc::new(InMemoryEnrollmentStore::new(invoices.clone()));

    let services = assemble(
        settings,
        store,
        references,
        invoices.clone(),
        channels.clone(),
        fallback_lms.clone(),
    );

    let backends = InMemoryBackends {
        references: seeds,
        invoices,
        channels,
        lms: fallback_lms,
    };
    (services, backends)
}

async fn build_persistent_services(settings: &Settings, url: &str) -> anyhow::Result<AppServices> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_DB_CONNECTIONS)
        .connect(url)
        .await
        .context("failed to connect to DATABASE_URL")?;

    let store = PostgresEnrollmentStore::new(pool.clone());
    store
        .ensure_schema()
        .await
        .context("failed to apply enrollment schema")?;
    info!("using Postgres-backed enrollment stores");

    Ok(assemble(
        settings,
        Arc::new(store),
        References::postgres(pool.clone()),
        Arc::new(PostgresPaymentGate::new(pool.clone())),
        Arc::new(PostgresChannelDirectory::new(pool)),
        Arc::new(InMemoryLms::new()),
    ))
}

fn assemble(
    settings: &Settings,
    store: Arc<dyn EnrollmentStore>,
    references: References,
    payments: Arc<dyn PaymentGate>,
    channels: Arc<dyn MessagingChannelDirectory>,
    fallback_lms: Arc<InMemoryLms>,
) -> AppServices {
    let lms: Arc<dyn LmsClient> = match &settings.lms {
        Some(lms) => Arc::new(HttpLmsClient::new(lms)),
        None => {
            warn!("LMS_BASE_URL not set; using the in-memory LMS");
            fallback_lms
        }
    };

    let sender = Arc::new(WebhookNotificationSender::new(&settings.notifier));
    if !sender.is_configured() {
        warn!("NOTIFY_WEBHOOK_URL/NOTIFY_API_KEY not set; invitations will be skipped");
    }

    let bus: EnrollmentBus = Arc::new(InMemoryEventBus::new());
    let orchestrator = EnrollmentOrchestrator::new(
        OrchestratorPorts {
            store,
            references,
            payments,
            lms: lms.clone(),
            triggers: TriggerPipeline::standard(lms, channels, sender),
        },
        bus,
        settings.orchestrator,
    );

    AppServices { orchestrator }
}
