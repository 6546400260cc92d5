//! Service wiring: stores, file storage, asset jobs, and the directory
//! services, built from [`AppConfig`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info};

use userdir_auth::{Argon2Hasher, CredentialVerifier, PasswordHasher, SigningKey, TokenService};
use userdir_core::{Clock, SystemClock};
use userdir_directory::ProfileDraft;
use userdir_infra::avatar::DEFAULT_STORAGE_PATH;
use userdir_infra::files::{FileStore, LocalFileStore};
use userdir_infra::jobs::{AssetJobRunner, JobRunnerConfig, RetryPolicy};
use userdir_infra::store::{self, InMemoryDirectoryStore, PostgresDirectoryStore};
use userdir_infra::{AppConfig, AvatarManager, DirectoryCredentials, RoleRegistry, UserDirectory};

const DB_MAX_CONNECTIONS: u32 = 10;

pub struct AppServices {
    pub users: Arc<UserDirectory>,
    pub roles: Arc<RoleRegistry>,
    pub avatars: Arc<AvatarManager>,
    pub verifier: CredentialVerifier<DirectoryCredentials>,
    pub tokens: Arc<TokenService>,
    pub jobs: Arc<AssetJobRunner>,
    /// Storage path for files uploaded through `/api/files/upload`.
    pub upload_path: String,
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    build_services_with(config, Arc::new(Argon2Hasher::new()), Arc::new(SystemClock)).await
}

/// Like [`build_services`] with an explicit hasher and clock.
pub async fn build_services_with(
    config: &AppConfig,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<AppServices> {
    let (users_store, roles_store) = match &config.database_url {
        Some(url) => {
            let store = PostgresDirectoryStore::connect(url, DB_MAX_CONNECTIONS)
                .await
                .context("connecting to DATABASE_URL")?;
            store.migrate().await.context("running migrations")?;
            info!("using postgres directory store");
            store::shared(store)
        }
        None => store::shared(InMemoryDirectoryStore::new()),
    };

    let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(&config.avatar_dir));
    let jobs = Arc::new(AssetJobRunner::new(
        files.clone(),
        JobRunnerConfig::default()
            .with_retry(RetryPolicy::exponential(
                config.asset_job_max_attempts,
                Duration::from_millis(200),
                Duration::from_secs(10),
            ))
            .with_attempt_timeout(config.asset_job_timeout),
    ));
    let avatars = Arc::new(AvatarManager::new(files, jobs.clone(), &config.public_base_url));

    let roles = Arc::new(RoleRegistry::new(roles_store.clone(), clock.clone()));
    roles.ensure_defaults().await.context("seeding default roles")?;

    let users = Arc::new(
        UserDirectory::new(
            users_store.clone(),
            roles.clone(),
            avatars.clone(),
            hasher.clone(),
            clock.clone(),
        )
        .with_default_role(&config.default_role)
        .with_avatar_path(DEFAULT_STORAGE_PATH),
    );

    if let Some(admin) = &config.bootstrap_admin {
        let profile = ProfileDraft::new("Administrator", &admin.username, &admin.email, None, None)
            .context("BOOTSTRAP_ADMIN_USERNAME/BOOTSTRAP_ADMIN_EMAIL")?;
        match users
            .ensure_admin(profile, admin.password.clone())
            .await
            .context("creating bootstrap admin")?
        {
            Some(user) => info!(user_id = %user.id, username = %user.username, "bootstrap admin created"),
            None => debug!(username = %admin.username, "bootstrap admin already exists"),
        }
    }

    let validity = chrono::Duration::try_days(config.token_ttl_days)
        .with_context(|| format!("token validity of {} days is out of range", config.token_ttl_days))?;
    // Fresh key per process: restarting invalidates every outstanding token.
    let tokens = Arc::new(TokenService::new(&SigningKey::generate(), clock).with_validity(validity));
    let verifier = CredentialVerifier::new(DirectoryCredentials::new(users_store, roles_store), hasher);

    Ok(AppServices {
        users,
        roles,
        avatars,
        verifier,
        tokens,
        jobs,
        upload_path: "uploads".to_owned(),
    })
}
