//! End-to-end tests over the in-memory collaborators.
//!
//! Flow: Credential Verifier → Token Service → Authorization Guard →
//! User Directory / Role Registry → stores + asset jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use userdir_auth::{
    authorize_operation, Argon2Hasher, AuthzError, CredentialError, CredentialVerifier, Identity, Operation,
    PasswordHasher, Role, SigningKey, TokenError, TokenService,
};
use userdir_core::{ManualClock, PageRequest, RoleId, SortDirection, UserId};
use userdir_directory::{ProfileDraft, RoleDraft, User, UserSortField, UserStatus};

use crate::avatar::AvatarManager;
use crate::credentials::DirectoryCredentials;
use crate::error::DirectoryError;
use crate::files::{FileStore, FileStoreError, InMemoryFileStore};
use crate::jobs::{AssetJobRunner, JobRunnerConfig, RetryPolicy};
use crate::roles::RoleRegistry;
use crate::store::{self, InMemoryDirectoryStore, UserStore};
use crate::users::{AvatarUpload, CreateUser, UpdateUser, UserDirectory};

struct World {
    clock: Arc<ManualClock>,
    users_store: Arc<dyn UserStore>,
    files: Arc<InMemoryFileStore>,
    runner: Arc<AssetJobRunner>,
    roles: Arc<RoleRegistry>,
    users: UserDirectory,
    tokens: TokenService,
    verifier: CredentialVerifier<DirectoryCredentials>,
}

async fn world() -> World {
    world_with(None).await
}

/// `files_override` replaces the file store the runner writes through.
async fn world_with(files_override: Option<Arc<dyn FileStore>>) -> World {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
    let (users_store, roles_store) = store::shared(InMemoryDirectoryStore::new());
    let files = Arc::new(InMemoryFileStore::new());
    let backing: Arc<dyn FileStore> = files_override.unwrap_or_else(|| files.clone());

    let runner = Arc::new(AssetJobRunner::new(
        backing.clone(),
        JobRunnerConfig::default()
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)))
            .with_attempt_timeout(Duration::from_millis(200)),
    ));
    let avatars = Arc::new(AvatarManager::new(backing, runner.clone(), "http://localhost:8080"));
    let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::with_params(8, 1, 1).unwrap());

    let roles = Arc::new(RoleRegistry::new(roles_store.clone(), clock.clone()));
    roles.ensure_defaults().await.unwrap();

    let users = UserDirectory::new(users_store.clone(), roles.clone(), avatars, hasher.clone(), clock.clone());
    let tokens = TokenService::new(&SigningKey::generate(), clock.clone());
    let verifier = CredentialVerifier::new(DirectoryCredentials::new(users_store.clone(), roles_store), hasher);

    World {
        clock,
        users_store,
        files,
        runner,
        roles,
        users,
        tokens,
        verifier,
    }
}

fn profile(name: &str, username: &str, email: &str) -> ProfileDraft {
    ProfileDraft::new(name, username, email, None, None).unwrap()
}

fn create(name: &str, username: &str, email: &str) -> CreateUser {
    CreateUser {
        profile: profile(name, username, email),
        password: "secret123".into(),
        role_id: None,
    }
}

fn image(name: &str, bytes: &[u8]) -> Option<AvatarUpload> {
    Some(AvatarUpload {
        original_name: name.into(),
        bytes: bytes.to_vec(),
    })
}

async fn seed_three(w: &World) -> Vec<User> {
    let mut out = Vec::new();
    for (name, username, email) in [
        ("John Doe", "johndoe", "john@example.com"),
        ("Jane Smith", "janesmith", "jane@example.com"),
        ("Mary Major", "marym", "Mary.Johnson@example.com"),
    ] {
        out.push(w.users.create(create(name, username, email), None).await.unwrap());
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Authentication and tokens
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn login_round_trip_recovers_username_and_role() {
    let w = world().await;
    let user = w
        .users
        .register(profile("John Doe", "johndoe", "john@example.com"), "secret123".into())
        .await
        .unwrap();

    let identity = w.verifier.authenticate("johndoe", "secret123").await.unwrap();
    let issued = w.tokens.issue(&identity).unwrap();
    let validated = w.tokens.validate(&issued.token).unwrap();

    assert_eq!(validated, Identity::new(user.id, "johndoe", "USER"));
}

#[tokio::test]
async fn token_expires_after_validity_window() {
    let w = world().await;
    w.users.create(create("John Doe", "johndoe", "john@example.com"), None).await.unwrap();
    let identity = w.verifier.authenticate("johndoe", "secret123").await.unwrap();
    let issued = w.tokens.issue(&identity).unwrap();

    w.clock.advance(chrono::Duration::days(30));

    assert_eq!(w.tokens.validate(&issued.token), Err(TokenError::Expired));
}

#[tokio::test]
async fn wrong_password_unknown_user_and_inactive_user_look_the_same() {
    let w = world().await;
    let user = w.users.create(create("John Doe", "johndoe", "john@example.com"), None).await.unwrap();

    let wrong = w.verifier.authenticate("johndoe", "nope-nope").await.unwrap_err();
    let unknown = w.verifier.authenticate("nobody", "secret123").await.unwrap_err();
    w.users.deactivate(user.id).await.unwrap();
    let inactive = w.verifier.authenticate("johndoe", "secret123").await.unwrap_err();

    assert_eq!(wrong, CredentialError::InvalidCredentials);
    assert_eq!(unknown, CredentialError::InvalidCredentials);
    assert_eq!(inactive, CredentialError::InvalidCredentials);
}

#[tokio::test]
async fn role_claim_is_stale_until_expiry() {
    let w = world().await;
    w.users.create(create("John Doe", "johndoe", "john@example.com"), None).await.unwrap();
    let identity = w.verifier.authenticate("johndoe", "secret123").await.unwrap();
    let token = w.tokens.issue(&identity).unwrap().token;

    let role = w.roles.get_by_name("USER").await.unwrap();
    w.roles.update(role.id, RoleDraft::new("MEMBER", None).unwrap()).await.unwrap();

    assert_eq!(w.tokens.validate(&token).unwrap().role, "USER");
    let fresh = w.verifier.authenticate("johndoe", "secret123").await.unwrap();
    assert_eq!(fresh.role, "MEMBER");
}

#[tokio::test]
async fn user_role_never_passes_admin_operations() {
    let w = world().await;
    let user = w.users.create(create("John Doe", "johndoe", "john@example.com"), None).await.unwrap();
    let identity = w.verifier.authenticate("johndoe", "secret123").await.unwrap();

    for target in [Some(user.id), Some(UserId::new(9_999)), None] {
        assert_eq!(
            authorize_operation(Some(&identity), Operation::DeactivateUser, target),
            Err(AuthzError::InsufficientRole { required: Role::Admin })
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_duplicate_usernames_yield_one_user() {
    let w = world().await;

    let (a, b) = tokio::join!(
        w.users.create(create("John Doe", "johndoe", "a@example.com"), None),
        w.users.create(create("John Doe", "johndoe", "b@example.com"), None),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(DirectoryError::DuplicateUsername))));

    let everyone = w
        .users
        .list(PageRequest::default(), UserSortField::Id, SortDirection::Asc)
        .await
        .unwrap();
    assert_eq!(everyone.total_items, 1);
}

#[tokio::test]
async fn duplicate_email_is_reported_as_such() {
    let w = world().await;
    w.users.create(create("John Doe", "johndoe", "john@example.com"), None).await.unwrap();

    let err = w
        .users
        .create(create("Johnny", "johnny", "JOHN@example.com"), None)
        .await
        .unwrap_err();
    assert_eq!(err, DirectoryError::DuplicateEmail);
}

#[tokio::test]
async fn deactivate_is_idempotent() {
    let w = world().await;
    let user = w.users.create(create("John Doe", "johndoe", "john@example.com"), None).await.unwrap();

    let first = w.users.deactivate(user.id).await.unwrap();
    w.clock.advance(chrono::Duration::minutes(5));
    let second = w.users.deactivate(user.id).await.unwrap();

    assert_eq!(second.status, UserStatus::Inactive);
    assert!(second.is_deleted);
    assert_eq!(first.deleted_at, second.deleted_at);

    let active = w.users.activate(user.id).await.unwrap();
    assert_eq!(active.status, UserStatus::Active);
    assert_eq!(active.deleted_at, None);

    assert_eq!(
        w.users.deactivate(UserId::new(404)).await.unwrap_err(),
        DirectoryError::UserNotFound(UserId::new(404))
    );
}

#[tokio::test]
async fn search_matches_username_email_or_name_case_insensitively() {
    let w = world().await;
    let seeded = seed_three(&w).await;

    let page = w
        .users
        .search(Some("JOHN"), PageRequest::new(0, 10), UserSortField::Id, SortDirection::Asc)
        .await
        .unwrap();

    let ids: Vec<UserId> = page.items.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![seeded[0].id, seeded[2].id]);
    assert_eq!(page.total_items, 2);

    let all = w
        .users
        .search(Some("   "), PageRequest::new(0, 10), UserSortField::Id, SortDirection::Asc)
        .await
        .unwrap();
    assert_eq!(all.total_items, 3);
}

#[tokio::test]
async fn out_of_range_page_is_empty() {
    let w = world().await;
    seed_three(&w).await;

    let page = w
        .users
        .list(PageRequest::new(5, 10), UserSortField::Id, SortDirection::Asc)
        .await
        .unwrap();

    assert!(page.is_empty());
    assert_eq!(page.total_items, 3);
}

#[tokio::test]
async fn list_sorts_by_requested_field() {
    let w = world().await;
    seed_three(&w).await;

    let page = w
        .users
        .list(PageRequest::new(0, 2), UserSortField::Username, SortDirection::Desc)
        .await
        .unwrap();

    let names: Vec<&str> = page.items.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["marym", "johndoe"]);
}

#[tokio::test]
async fn missing_default_role_is_a_configuration_error() {
    let w = world().await;
    let users = UserDirectory::new(
        w.users_store.clone(),
        w.roles.clone(),
        w.users.avatars().clone(),
        Arc::new(Argon2Hasher::with_params(8, 1, 1).unwrap()),
        w.clock.clone(),
    )
    .with_default_role("CUSTOMER");

    let err = users.create(create("John Doe", "johndoe", "john@example.com"), None).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Configuration(_)));

    let mut explicit = create("John Doe", "johndoe", "john@example.com");
    explicit.role_id = Some(RoleId::new(77));
    let err = w.users.create(explicit, None).await.unwrap_err();
    assert_eq!(err, DirectoryError::RoleNotFound("77".into()));
}

#[tokio::test]
async fn role_in_use_cannot_be_deleted() {
    let w = world().await;
    let user = w.users.create(create("John Doe", "johndoe", "john@example.com"), None).await.unwrap();

    assert_eq!(w.roles.delete(user.role_id).await, Err(DirectoryError::RoleInUse(user.role_id)));
    assert_eq!(w.users.get(user.id).await.unwrap().role_id, user.role_id);

    // Once nobody references it the role can go.
    let guest = w.roles.get_by_name("GUEST").await.unwrap();
    let updated = w
        .users
        .update(
            user.id,
            UpdateUser {
                profile: profile("John Doe", "johndoe", "john@example.com"),
                role_id: Some(guest.id),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(updated.role_id, guest.id);
    w.roles.delete(user.role_id).await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Avatars
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn replacing_an_avatar_removes_the_old_asset() {
    let w = world().await;
    let user = w
        .users
        .create(create("John Doe", "johndoe", "john@example.com"), image("first.png", b"one"))
        .await
        .unwrap();
    assert_eq!(user.avatar.as_ref().unwrap().storage_key, "avatars/first.png");

    let updated = w
        .users
        .update(
            user.id,
            UpdateUser {
                profile: profile("John Doe", "johndoe", "john@example.com"),
                role_id: None,
            },
            image("second.png", b"two"),
        )
        .await
        .unwrap();

    let avatar = updated.avatar.unwrap();
    assert_eq!(avatar.storage_key, "avatars/second.png");
    assert_eq!(avatar.public_url, "http://localhost:8080/api/files/avatars/second.png");
    assert_eq!(w.users.avatar(user.id).await.unwrap(), avatar);

    w.runner.drain().await;
    assert_eq!(w.files.keys(), vec!["avatars/second.png".to_string()]);
}

#[tokio::test]
async fn colliding_avatar_is_rejected_without_a_record() {
    let w = world().await;
    w.users
        .create(create("John Doe", "johndoe", "john@example.com"), image("me.png", b"john"))
        .await
        .unwrap();

    let err = w
        .users
        .create(create("Jane Smith", "janesmith", "jane@example.com"), image("me.png", b"jane"))
        .await
        .unwrap_err();

    assert_eq!(err, DirectoryError::AssetAlreadyExists("avatars/me.png".into()));
    assert!(w.users_store.find_user_by_username("janesmith").await.unwrap().is_none());
    assert_eq!(w.files.read("avatars/me.png").await.unwrap(), b"john".to_vec());
}

/// File store whose writes always fail.
struct BrokenDisk(InMemoryFileStore);

#[async_trait]
impl FileStore for BrokenDisk {
    async fn exists(&self, key: &str) -> Result<bool, FileStoreError> {
        self.0.exists(key).await
    }

    async fn write(&self, _key: &str, _bytes: &[u8]) -> Result<(), FileStoreError> {
        Err(FileStoreError::Io("no space left on device".into()))
    }

    async fn delete(&self, key: &str) -> Result<(), FileStoreError> {
        self.0.delete(key).await
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, FileStoreError> {
        self.0.read(key).await
    }
}

#[tokio::test]
async fn failed_upload_leaves_no_record() {
    let w = world_with(Some(Arc::new(BrokenDisk(InMemoryFileStore::new())))).await;

    let err = w
        .users
        .create(create("John Doe", "johndoe", "john@example.com"), image("me.png", b"x"))
        .await
        .unwrap_err();

    assert!(matches!(err, DirectoryError::UploadFailure(_)));
    assert!(w.users_store.find_user_by_username("johndoe").await.unwrap().is_none());
    assert_eq!(w.runner.dead_letters().len(), 1);
}

#[tokio::test]
async fn losing_a_create_race_cleans_up_its_avatar() {
    let w = world().await;

    let (a, b) = tokio::join!(
        w.users
            .create(create("John Doe", "johndoe", "a@example.com"), image("a.png", b"a")),
        w.users
            .create(create("John Doe", "johndoe", "b@example.com"), image("b.png", b"b")),
    );
    let winner = match (a, b) {
        (Ok(user), Err(DirectoryError::DuplicateUsername)) | (Err(DirectoryError::DuplicateUsername), Ok(user)) => user,
        other => panic!("expected exactly one winner, got {other:?}"),
    };

    w.runner.drain().await;
    assert_eq!(w.files.keys(), vec![winner.avatar.unwrap().storage_key]);
}

#[tokio::test]
async fn racing_avatar_replacements_leave_no_orphan() {
    let w = world().await;
    let user = w
        .users
        .create(create("John Doe", "johndoe", "john@example.com"), image("a.png", b"a"))
        .await
        .unwrap();
    let same_profile = || UpdateUser {
        profile: profile("John Doe", "johndoe", "john@example.com"),
        role_id: None,
    };

    let (b, c) = tokio::join!(
        w.users.update(user.id, same_profile(), image("b.png", b"b")),
        w.users.update(user.id, same_profile(), image("c.png", b"c")),
    );
    b.unwrap();
    c.unwrap();

    w.runner.drain().await;
    let referenced = w.users.avatar(user.id).await.unwrap().storage_key;
    assert!(referenced == "avatars/b.png" || referenced == "avatars/c.png");
    assert_eq!(w.files.keys(), vec![referenced]);
}

#[tokio::test]
async fn profile_only_update_keeps_a_newer_avatar() {
    let w = world().await;
    let user = w
        .users
        .create(create("John Doe", "johndoe", "john@example.com"), image("a.png", b"a"))
        .await
        .unwrap();

    w.users
        .update(
            user.id,
            UpdateUser {
                profile: profile("John Doe", "johndoe", "john@example.com"),
                role_id: None,
            },
            image("b.png", b"b"),
        )
        .await
        .unwrap();
    let renamed = w
        .users
        .update(
            user.id,
            UpdateUser {
                profile: profile("Johnny Doe", "johndoe", "john@example.com"),
                role_id: None,
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(renamed.name, "Johnny Doe");
    assert_eq!(renamed.avatar.unwrap().storage_key, "avatars/b.png");
    w.runner.drain().await;
    assert_eq!(w.files.keys(), vec!["avatars/b.png".to_string()]);
}
