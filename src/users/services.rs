use std::{future::Future, sync::Arc, time::Duration};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{claims::Identity, jwt::TokenService, password::PasswordHasher},
    error::{Error, Result},
    users::{
        model::{
            AuthResponse, LoginRequest, Page, RegisterRequest, Role, UpdateProfileRequest,
            UpdateUserRequest, User, UserId, UserView,
        },
        repo::UserRepository,
    },
};

const MIN_NAME_CHARS: usize = 2;
const MIN_PASSWORD_CHARS: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("name", "is required"));
    }
    if name.chars().count() < MIN_NAME_CHARS {
        return Err(Error::validation("name", "must be at least 2 characters"));
    }
    Ok(name.to_owned())
}

/// Account business rules on top of the repository contract. Every public
/// operation runs under the configured request deadline; when it elapses the
/// in-flight backend call is dropped and `Cancelled` is returned.
pub struct UserService {
    repo: Arc<dyn UserRepository>,
    tokens: Arc<TokenService>,
    hasher: Arc<dyn PasswordHasher>,
    timeout: Duration,
}

impl UserService {
    pub fn new(
        repo: Arc<dyn UserRepository>,
        tokens: Arc<TokenService>,
        hasher: Arc<dyn PasswordHasher>,
        timeout: Duration,
    ) -> Self {
        Self {
            repo,
            tokens,
            hasher,
            timeout,
        }
    }

    #[instrument(skip(self, req))]
    pub async fn register(&self, req: RegisterRequest) -> Result<UserView> {
        self.bounded("register", async {
            let email = normalize_email(&req.email);
            if email.is_empty() {
                return Err(Error::validation("email", "is required"));
            }
            if !is_valid_email(&email) {
                return Err(Error::validation("email", "is not a valid address"));
            }
            let name = normalize_name(&req.name)?;
            if req.password.chars().count() < MIN_PASSWORD_CHARS {
                return Err(Error::validation("password", "must be at least 8 characters"));
            }
            let role = match req.role.as_deref().map(str::trim) {
                Some("admin") => Role::Admin,
                _ => Role::User,
            };

            match self.repo.get_by_email(&email).await {
                Ok(_) => {
                    warn!("email already registered");
                    return Err(Error::AlreadyExists("user"));
                }
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }

            let hash = self.hash_password(req.password).await?;
            let mut user = User::new(email, hash, name, role);
            self.repo.create(&mut user).await?;

            info!(user_id = user.id, role = %user.role, "user registered");
            Ok(user.view())
        })
        .await
    }

    /// Unknown email and wrong password are reported identically. A
    /// deactivated account is refused before its password is checked.
    #[instrument(skip(self, req))]
    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse> {
        self.bounded("login", async {
            let email = normalize_email(&req.email);
            if email.is_empty() {
                return Err(Error::validation("email", "is required"));
            }
            if req.password.is_empty() {
                return Err(Error::validation("password", "is required"));
            }

            let user = match self.repo.get_by_email(&email).await {
                Ok(user) => user,
                Err(Error::NotFound(_)) => {
                    warn!("login for unknown email");
                    return Err(Error::InvalidPassword);
                }
                Err(e) => return Err(e),
            };

            if !user.active {
                warn!(user_id = user.id, "login to deactivated account");
                return Err(Error::Forbidden("account is deactivated".into()));
            }
            if !self
                .verify_password(req.password, user.password_hash.clone())
                .await?
            {
                warn!(user_id = user.id, "login with wrong password");
                return Err(Error::InvalidPassword);
            }

            let token = self.tokens.issue(&user)?;
            info!(user_id = user.id, "user logged in");
            Ok(AuthResponse {
                token,
                user: user.view(),
            })
        })
        .await
    }

    pub fn refresh(&self, token: &str) -> Result<String> {
        self.tokens.refresh(token)
    }

    /// Looked up by email so it works on backends without id lookup.
    #[instrument(skip(self, identity), fields(user_id = identity.user_id))]
    pub async fn get_profile(&self, identity: &Identity) -> Result<UserView> {
        self.bounded("get_profile", async {
            Ok(self.repo.get_by_email(&identity.email).await?.view())
        })
        .await
    }

    #[instrument(skip(self, identity, req), fields(user_id = identity.user_id))]
    pub async fn update_profile(
        &self,
        identity: &Identity,
        req: UpdateProfileRequest,
    ) -> Result<UserView> {
        self.bounded("update_profile", async {
            let mut user = self.repo.get_by_email(&identity.email).await?;
            if let Some(name) = req.name.as_deref() {
                user.name = normalize_name(name)?;
            }
            self.repo.update(&mut user).await?;
            Ok(user.view())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: UserId) -> Result<UserView> {
        self.bounded("get_user", async { Ok(self.repo.get_by_id(id).await?.view()) })
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self, offset: u64, limit: u64) -> Result<Page<UserView>> {
        self.bounded("list_users", async {
            Ok(self.repo.list(offset, limit).await?.map(|u| u.view()))
        })
        .await
    }

    /// A blank query lists everything.
    #[instrument(skip(self))]
    pub async fn search_users(&self, query: &str, offset: u64, limit: u64) -> Result<Page<UserView>> {
        let query = query.trim();
        if query.is_empty() {
            return self.list_users(offset, limit).await;
        }
        self.bounded("search_users", async {
            Ok(self.repo.search(query, offset, limit).await?.map(|u| u.view()))
        })
        .await
    }

    #[instrument(skip(self, req))]
    pub async fn update_user(&self, id: UserId, req: UpdateUserRequest) -> Result<UserView> {
        self.bounded("update_user", async {
            let mut user = self.repo.get_by_id(id).await?;
            if let Some(name) = req.name.as_deref() {
                user.name = normalize_name(name)?;
            }
            if let Some(role) = req.role.as_deref() {
                user.role = role.trim().parse()?;
            }
            if let Some(active) = req.active {
                user.active = active;
            }
            self.repo.update(&mut user).await?;
            info!(user_id = id, role = %user.role, active = user.active, "user updated");
            Ok(user.view())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: UserId) -> Result<()> {
        self.bounded("delete_user", async {
            self.repo.delete(id).await?;
            info!(user_id = id, "user deleted");
            Ok(())
        })
        .await
    }

    async fn bounded<T>(&self, op: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            warn!(op, timeout_ms = self.timeout.as_millis() as u64, "deadline elapsed");
            Error::Cancelled(op)
        })?
    }

    async fn hash_password(&self, plain: String) -> Result<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(|e| Error::Internal(format!("hashing task failed: {e}")))?
    }

    async fn verify_password(&self, plain: String, digest: String) -> Result<bool> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&plain, &digest))
            .await
            .map_err(|e| Error::Internal(format!("verify task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::password::Argon2Hasher,
        config::JwtConfig,
        db::memory_connection,
        migration::{migrations::CreateUsersTable, Migration},
        users::repo::build_repository,
    };
    use async_trait::async_trait;

    fn tokens() -> Arc<TokenService> {
        Arc::new(TokenService::new(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            expiration_minutes: 24 * 60,
        }))
    }

    async fn service() -> UserService {
        let conn = memory_connection("fx_").await;
        CreateUsersTable.up(&conn).await.expect("create users table");
        UserService::new(
            build_repository(&conn),
            tokens(),
            Arc::new(Argon2Hasher::default()),
            Duration::from_secs(10),
        )
    }

    fn register_req(email: &str, password: &str, name: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            name: name.into(),
            role: None,
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn account_lifecycle() {
        let svc = service().await;

        let alice = svc
            .register(register_req("alice@example.com", "password123", "Alice A"))
            .await
            .expect("register");
        assert_eq!(alice.role, Role::User);
        assert!(alice.active);
        assert!(!serde_json::to_string(&alice).unwrap().contains("password"));

        let dup = svc
            .register(register_req("ALICE@example.com", "password123", "Alice B"))
            .await
            .unwrap_err();
        assert!(matches!(dup, Error::AlreadyExists(_)));

        let wrong = svc
            .login(login_req("alice@example.com", "wrong-password"))
            .await
            .unwrap_err();
        assert!(matches!(wrong, Error::InvalidPassword));

        let ok = svc
            .login(login_req("alice@example.com", "password123"))
            .await
            .expect("login");
        assert!(!ok.token.is_empty());
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json["user"].get("password").is_none());
        assert!(json["user"].get("password_hash").is_none());

        let update = UpdateUserRequest {
            active: Some(false),
            ..Default::default()
        };
        let updated = svc.update_user(alice.id, update).await.expect("deactivate");
        assert!(!updated.active);

        let denied = svc
            .login(login_req("alice@example.com", "password123"))
            .await
            .unwrap_err();
        assert!(matches!(denied, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn deactivated_account_is_forbidden_whatever_the_password() {
        let svc = service().await;
        let dora = svc
            .register(register_req("dora@example.com", "password123", "Dora"))
            .await
            .unwrap();
        let update = UpdateUserRequest {
            active: Some(false),
            ..Default::default()
        };
        svc.update_user(dora.id, update).await.unwrap();

        for password in ["password123", "not-her-password"] {
            let err = svc
                .login(login_req("dora@example.com", password))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Forbidden(_)), "{password}: got {err:?}");
        }
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let svc = service().await;
        svc.register(register_req("bob@example.com", "password123", "Bob"))
            .await
            .unwrap();

        let unknown = svc
            .login(login_req("nobody@example.com", "password123"))
            .await
            .unwrap_err();
        let wrong = svc
            .login(login_req("bob@example.com", "password124"))
            .await
            .unwrap_err();
        assert_eq!(unknown.code(), wrong.code());
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn registration_normalizes_and_is_visible_by_email() {
        let svc = service().await;
        let view = svc
            .register(register_req("  Carol@Example.COM ", "password123", "  Carol C  "))
            .await
            .unwrap();
        assert_eq!(view.email, "carol@example.com");
        assert_eq!(view.name, "Carol C");

        let again = svc
            .register(register_req("carol@example.com", "password123", "Carol"))
            .await
            .unwrap_err();
        assert!(matches!(again, Error::AlreadyExists(_)));

        let login = svc
            .login(login_req(" CAROL@example.com", "password123"))
            .await
            .expect("normalized login");
        assert_eq!(login.user.id, view.id);
    }

    #[tokio::test]
    async fn registration_validation() {
        let svc = service().await;
        let cases = [
            (register_req("   ", "password123", "Al"), "email"),
            (register_req("not-an-email", "password123", "Al"), "email"),
            (register_req("a@b.co", "password123", " "), "name"),
            (register_req("a@b.co", "password123", "A"), "name"),
            (register_req("a@b.co", "short", "Al"), "password"),
        ];
        for (req, expected) in cases {
            match svc.register(req).await {
                Err(Error::Validation { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected validation error on {expected}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn role_defaults_to_user_unless_admin_is_requested() {
        let svc = service().await;
        let mut req = register_req("root@example.com", "password123", "Root");
        req.role = Some("admin".into());
        assert_eq!(svc.register(req).await.unwrap().role, Role::Admin);

        let mut req = register_req("odd@example.com", "password123", "Odd");
        req.role = Some("superuser".into());
        assert_eq!(svc.register(req).await.unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let svc = service().await;
        let err = svc.login(login_req("", "password123")).await.unwrap_err();
        assert!(matches!(err, Error::Validation { field: "email", .. }));
        let err = svc.login(login_req("a@b.co", "")).await.unwrap_err();
        assert!(matches!(err, Error::Validation { field: "password", .. }));
    }

    #[tokio::test]
    async fn fresh_token_cannot_be_refreshed() {
        let svc = service().await;
        svc.register(register_req("dave@example.com", "password123", "Dave"))
            .await
            .unwrap();
        let auth = svc
            .login(login_req("dave@example.com", "password123"))
            .await
            .unwrap();
        let err = svc.refresh(&auth.token).unwrap_err();
        assert!(matches!(err, Error::Validation { field: "token", .. }));
    }

    #[tokio::test]
    async fn profile_name_only() {
        let svc = service().await;
        let view = svc
            .register(register_req("erin@example.com", "password123", "Erin"))
            .await
            .unwrap();
        let identity = Identity {
            user_id: view.id,
            email: view.email.clone(),
            role: view.role,
        };

        let updated = svc
            .update_profile(
                &identity,
                UpdateProfileRequest {
                    name: Some("  Erin E ".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Erin E");
        assert_eq!(svc.get_profile(&identity).await.unwrap().name, "Erin E");

        let err = svc
            .update_profile(&identity, UpdateProfileRequest { name: Some("E".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "name", .. }));
    }

    #[tokio::test]
    async fn admin_update_validates_role() {
        let svc = service().await;
        let view = svc
            .register(register_req("fay@example.com", "password123", "Fay"))
            .await
            .unwrap();

        let err = svc
            .update_user(
                view.id,
                UpdateUserRequest {
                    role: Some("moderator".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "role", .. }));

        let promoted = svc
            .update_user(
                view.id,
                UpdateUserRequest {
                    role: Some("admin".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(promoted.role, Role::Admin);
        assert!(promoted.active);

        let missing = svc
            .update_user(9999, UpdateUserRequest::default())
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn admin_get_and_delete() {
        let svc = service().await;
        let view = svc
            .register(register_req("gus@example.com", "password123", "Gus"))
            .await
            .unwrap();
        assert_eq!(svc.get_user(view.id).await.unwrap().email, "gus@example.com");

        svc.delete_user(view.id).await.unwrap();
        assert!(svc.get_user(view.id).await.unwrap_err().is_not_found());
        assert!(svc.delete_user(view.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn blank_search_matches_listing() {
        let svc = service().await;
        for (email, name) in [
            ("h1@example.com", "Hank"),
            ("h2@example.com", "Hilda"),
            ("i1@corp.test", "Ivy"),
        ] {
            svc.register(register_req(email, "password123", name))
                .await
                .unwrap();
        }

        let listed = svc.list_users(1, 2).await.unwrap();
        let searched = svc.search_users("   ", 1, 2).await.unwrap();
        assert_eq!(listed, searched);
        assert_eq!(listed.total, 3);
        assert!(listed.items.len() <= 2);

        let found = svc.search_users("EXAMPLE", 0, 10).await.unwrap();
        assert_eq!(found.total, 2);
    }

    struct StalledRepository;

    #[async_trait]
    impl UserRepository for StalledRepository {
        async fn create(&self, _user: &mut User) -> Result<()> {
            std::future::pending().await
        }
        async fn get_by_id(&self, _id: UserId) -> Result<User> {
            std::future::pending().await
        }
        async fn get_by_email(&self, _email: &str) -> Result<User> {
            std::future::pending().await
        }
        async fn update(&self, _user: &mut User) -> Result<()> {
            std::future::pending().await
        }
        async fn delete(&self, _id: UserId) -> Result<()> {
            std::future::pending().await
        }
        async fn list(&self, _offset: u64, _limit: u64) -> Result<Page<User>> {
            std::future::pending().await
        }
        async fn search(&self, _query: &str, _offset: u64, _limit: u64) -> Result<Page<User>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_backend_surfaces_cancelled() {
        let svc = UserService::new(
            Arc::new(StalledRepository),
            tokens(),
            Arc::new(Argon2Hasher::default()),
            Duration::from_millis(20),
        );
        let err = svc
            .login(login_req("alice@example.com", "password123"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled("login")));
        assert_eq!(err.code(), "CANCELLED");

        let err = svc.list_users(0, 10).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled("list_users")));
    }
}
