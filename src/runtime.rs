//! Runtime composition and bootstrap.
//!
//! [`Runtime::setup`] is idempotent: directories, the system brain
//! (read-merge-write so newly added default keys land), the active user
//! brain, bundled presets, and command registrations are all ensured in
//! dependency order. REST stays disabled until `api enable` is invoked
//! with at least one non-bootstrap key present.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde_json::Value;
use tracing::{debug, error, info};

use aavion_auth::AuthManager;
use aavion_cache::CacheStore;
use aavion_dispatch::{CommandRequest, Dispatcher, Response};
use aavion_events::EventBus;
use aavion_export::ExportEngine;
use aavion_preset::PresetRegistry;
use aavion_security::{SecurityManager, SecuritySettings};
use aavion_store::BrainStore;
use aavion_utils::error::AavionError;
use aavion_utils::{Paths, Scope, logging};

/// Default bootstrap token; implicit on CLI/embedded paths, always
/// rejected over REST.
pub const DEFAULT_BOOTSTRAP_TOKEN: &str = "admin";

/// Bootstrap options.
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    /// Root directory override; defaults to `AAVIONDB_HOME` / `.aaviondb`.
    pub root: Option<Utf8PathBuf>,
    /// Config keys merged into the system brain on every setup.
    pub config_overrides: BTreeMap<String, Value>,
    /// Bootstrap token override (stored hashed).
    pub bootstrap_token: Option<String>,
    /// Skip tracing initialization (embedders with their own subscriber).
    pub skip_tracing: bool,
}

/// Everything a handler or entry point needs, composed once.
pub struct Runtime {
    pub paths: Paths,
    pub bus: EventBus,
    pub store: Arc<BrainStore>,
    pub cache: Arc<CacheStore>,
    pub auth: Arc<AuthManager>,
    pub security: Arc<SecurityManager>,
    pub presets: Arc<PresetRegistry>,
    pub export: Arc<ExportEngine>,
    pub dispatcher: Dispatcher,
}

impl Runtime {
    /// Compose and initialize all core services.
    pub fn setup(options: SetupOptions) -> Result<Arc<Self>, AavionError> {
        let paths = options
            .root
            .clone()
            .map_or_else(Paths::from_env, Paths::new);
        paths.ensure_default_directories()?;

        let bus = EventBus::new();
        let store = Arc::new(BrainStore::new(paths.clone(), bus.clone()));
        store.ensure_system_brain(Some(&options.config_overrides))?;
        store.ensure_active_brain()?;

        if !options.skip_tracing {
            let level = store.config_string("log_level", "info");
            // A second setup in the same process already installed a
            // subscriber; that is fine.
            let _ = logging::init_tracing(Some(&level));
        }

        // Bootstrap token: seed the default hash once, honor overrides.
        let bootstrap = options
            .bootstrap_token
            .clone()
            .or_else(|| std::env::var("AAVIONDB_BOOTSTRAP_TOKEN").ok());
        store.with_system(|brain| {
            let auth = brain.auth.get_or_insert_with(Default::default);
            match &bootstrap {
                Some(token) => auth.bootstrap_key = AuthManager::hash_token(token),
                None if auth.bootstrap_key.is_empty() => {
                    auth.bootstrap_key = AuthManager::hash_token(DEFAULT_BOOTSTRAP_TOKEN);
                }
                None => {}
            }
            Ok(())
        })?;

        let cache = Arc::new(CacheStore::new(paths.cache_dir())?);
        cache.set_enabled(store.config_bool("cache.active", true));
        let ttl = store.config_u64("cache.ttl", 300);
        if ttl > 0 {
            cache.set_ttl(ttl)?;
        }

        let auth = Arc::new(AuthManager::new(Arc::clone(&store)));
        let security = Arc::new(SecurityManager::new(
            Arc::clone(&cache),
            security_settings(&store),
        ));

        let presets = Arc::new(PresetRegistry::new(Arc::clone(&store)));
        presets.seed_bundled()?;

        let export = Arc::new(ExportEngine::new(Arc::clone(&store)));

        let dispatcher = Dispatcher::new(bus.clone());
        let runtime = Arc::new(Self {
            paths,
            bus,
            store,
            cache,
            auth,
            security,
            presets,
            export,
            dispatcher,
        });

        crate::commands::register_all(&runtime)?;
        runtime.wire_diagnostics();
        info!(root = %runtime.paths.root(), "aaviondb ready");
        Ok(runtime)
    }

    /// Refresh security tunables after a config change.
    pub fn reload_security_settings(&self) {
        self.security.update_settings(security_settings(&self.store));
    }

    /// Execute one statement under a scope; the CLI/embedded entry.
    pub fn execute_statement(&self, statement: &str, scope: Scope) -> Response {
        self.dispatcher.execute_statement(statement, scope)
    }

    /// Programmatic dispatch entry.
    pub fn dispatch(&self, request: CommandRequest) -> Response {
        self.dispatcher.dispatch(request)
    }

    fn wire_diagnostics(&self) {
        self.bus.subscribe("**", |event| {
            debug!(event = %event.name, "event");
            Ok(())
        });
        self.bus.subscribe("brain.write.integrity_failed", |event| {
            error!(data = %event.data, "write integrity failure");
            Ok(())
        });
    }
}

/// Read the `security.*` config keys into tunables.
fn security_settings(store: &BrainStore) -> SecuritySettings {
    let defaults = SecuritySettings::default();
    SecuritySettings {
        active: store.config_bool("security.active", defaults.active),
        rate_limit: store.config_u64("security.rate_limit", defaults.rate_limit),
        global_limit: store.config_u64("security.global_limit", defaults.global_limit),
        block_duration: store.config_u64("security.block_duration", defaults.block_duration),
        ddos_lockdown: store.config_u64("security.ddos_lockdown", defaults.ddos_lockdown),
        failed_limit: store.config_u64("security.failed_limit", defaults.failed_limit),
        failed_block: store.config_u64("security.failed_block", defaults.failed_block),
    }
}
