use crate::error::{CertificateError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

/// Administrative area a user signs into. Each module keeps its own profile
/// table; an account without a profile there cannot use the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserModule {
    #[serde(rename = "academico")]
    Academic,
    #[serde(rename = "financeiro")]
    Financial,
}

impl UserModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserModule::Academic => "academico",
            UserModule::Financial => "financeiro",
        }
    }

    pub fn profile_table(&self) -> &'static str {
        match self {
            UserModule::Academic => "users_academico",
            UserModule::Financial => "users_financeiro",
        }
    }
}

impl FromStr for UserModule {
    type Err = CertificateError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "academico" => Ok(UserModule::Academic),
            "financeiro" => Ok(UserModule::Financial),
            other => Err(CertificateError::Auth(format!("unknown module: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
}

/// Hosted authentication service.
pub trait AuthBackend: Send + Sync {
    fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthUser>;
    /// `Ok(None)` when the service accepted the request but returned no user.
    fn sign_up(&self, email: &str, password: &str) -> Result<Option<AuthUser>>;
    fn sign_out(&self) -> Result<()>;
}

/// Per-module profile tables.
pub trait ProfileStore: Send + Sync {
    fn find_profile(&self, module: UserModule, user_id: Uuid) -> Result<Option<UserProfile>>;
    fn insert_profile(&self, module: UserModule, profile: UserProfile) -> Result<()>;
}

/// An authenticated user bound to one module. Created by sign-in or sign-up
/// and consumed by sign-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    user: AuthUser,
    module: UserModule,
    started_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn user(&self) -> &AuthUser {
        &self.user
    }

    pub fn module(&self) -> UserModule {
        self.module
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

pub struct SessionManager<A, P> {
    auth: A,
    profiles: P,
}

impl<A: AuthBackend, P: ProfileStore> SessionManager<A, P> {
    pub fn new(auth: A, profiles: P) -> Self {
        Self { auth, profiles }
    }

    pub fn auth(&self) -> &A {
        &self.auth
    }

    pub fn profiles(&self) -> &P {
        &self.profiles
    }

    pub fn sign_in(
        &self,
        email: &str,
        password: &str,
        module: UserModule,
    ) -> Result<SessionContext> {
        let user = self.auth.sign_in_with_password(email, password)?;
        if self.profiles.find_profile(module, user.id)?.is_none() {
            tracing::warn!(
                user_id = %user.id,
                table = module.profile_table(),
                "user has no profile in module, signing out"
            );
            self.auth.sign_out()?;
            return Err(CertificateError::NotRegisteredInModule);
        }
        tracing::info!(user_id = %user.id, module = module.as_str(), "signed in");
        Ok(SessionContext {
            user,
            module,
            started_at: Utc::now(),
        })
    }

    pub fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        module: UserModule,
    ) -> Result<SessionContext> {
        let user = self
            .auth
            .sign_up(email, password)?
            .ok_or(CertificateError::SignUpWithoutUser)?;
        self.profiles.insert_profile(
            module,
            UserProfile {
                id: user.id,
                email: email.to_string(),
                full_name: full_name.to_string(),
            },
        )?;
        tracing::info!(user_id = %user.id, module = module.as_str(), "signed up");
        Ok(SessionContext {
            user,
            module,
            started_at: Utc::now(),
        })
    }

    pub fn sign_out(&self, session: SessionContext) -> Result<()> {
        self.auth.sign_out()?;
        tracing::info!(user_id = %session.user.id, module = session.module.as_str(), "signed out");
        Ok(())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn password_digest(email: &str, password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn lock_err<T>(_: T) -> CertificateError {
    CertificateError::Store("lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct MemoryAuthBackend {
    users: Mutex<HashMap<String, (AuthUser, [u8; 32])>>,
    current: Mutex<Option<Uuid>>,
}

impl MemoryAuthBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_user(&self) -> Option<Uuid> {
        self.current.lock().ok().and_then(|current| *current)
    }
}

impl AuthBackend for MemoryAuthBackend {
    fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthUser> {
        let email = normalize_email(email);
        let users = self.users.lock().map_err(lock_err)?;
        let user = match users.get(&email) {
            Some((user, digest)) if *digest == password_digest(&email, password) => user.clone(),
            _ => return Err(CertificateError::Auth("Invalid login credentials".to_string())),
        };
        *self.current.lock().map_err(lock_err)? = Some(user.id);
        Ok(user)
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<Option<AuthUser>> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(CertificateError::Auth(format!("invalid email: {email}")));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(CertificateError::Auth(format!(
                "Password should be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let mut users = self.users.lock().map_err(lock_err)?;
        if users.contains_key(&email) {
            return Err(CertificateError::Auth("User already registered".to_string()));
        }
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: email.clone(),
        };
        let digest = password_digest(&email, password);
        users.insert(email, (user.clone(), digest));
        *self.current.lock().map_err(lock_err)? = Some(user.id);
        Ok(Some(user))
    }

    fn sign_out(&self) -> Result<()> {
        *self.current.lock().map_err(lock_err)? = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    rows: Mutex<HashMap<(UserModule, Uuid), UserProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStore for MemoryProfileStore {
    fn find_profile(&self, module: UserModule, user_id: Uuid) -> Result<Option<UserProfile>> {
        let rows = self.rows.lock().map_err(lock_err)?;
        Ok(rows.get(&(module, user_id)).cloned())
    }

    fn insert_profile(&self, module: UserModule, profile: UserProfile) -> Result<()> {
        let mut rows = self.rows.lock().map_err(lock_err)?;
        let key = (module, profile.id);
        if rows.contains_key(&key) {
            return Err(CertificateError::Store(format!(
                "duplicate key in {}: {}",
                module.profile_table(),
                profile.id
            )));
        }
        rows.insert(key, profile);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager<MemoryAuthBackend, MemoryProfileStore> {
        SessionManager::new(MemoryAuthBackend::new(), MemoryProfileStore::new())
    }

    #[test]
    fn module_names_and_tables() {
        assert_eq!(UserModule::Academic.profile_table(), "users_academico");
        assert_eq!(UserModule::Financial.profile_table(), "users_financeiro");
        assert_eq!("financeiro".parse::<UserModule>().unwrap(), UserModule::Financial);
        assert!("rh".parse::<UserModule>().is_err());
        assert_eq!(
            serde_json::to_string(&UserModule::Academic).unwrap(),
            "\"academico\""
        );
    }

    #[test]
    fn sign_up_then_sign_in_same_module() {
        let sessions = manager();
        let created = sessions
            .sign_up("Ana@IDHS.org", "segredo1", "Ana Lima", UserModule::Academic)
            .unwrap();
        let profile = sessions
            .profiles()
            .find_profile(UserModule::Academic, created.user().id)
            .unwrap()
            .unwrap();
        assert_eq!(profile.full_name, "Ana Lima");

        let session = sessions
            .sign_in("ana@idhs.org", "segredo1", UserModule::Academic)
            .unwrap();
        assert_eq!(session.module(), UserModule::Academic);
        assert_eq!(session.user().id, created.user().id);
        assert_eq!(sessions.auth().current_user(), Some(session.user().id));
    }

    #[test]
    fn sign_in_without_module_profile_fails_and_signs_out() {
        let sessions = manager();
        sessions
            .sign_up("bia@idhs.org", "segredo1", "Bia", UserModule::Academic)
            .unwrap();
        let err = sessions
            .sign_in("bia@idhs.org", "segredo1", UserModule::Financial)
            .unwrap_err();
        assert!(matches!(err, CertificateError::NotRegisteredInModule));
        assert_eq!(err.to_string(), "Usuário não registrado neste módulo");
        assert_eq!(sessions.auth().current_user(), None);
    }

    #[test]
    fn wrong_password_is_rejected() {
        let sessions = manager();
        sessions
            .sign_up("caio@idhs.org", "segredo1", "Caio", UserModule::Financial)
            .unwrap();
        let err = sessions
            .sign_in("caio@idhs.org", "errado!", UserModule::Financial)
            .unwrap_err();
        assert!(matches!(err, CertificateError::Auth(_)));
    }

    #[test]
    fn duplicate_and_weak_sign_ups_fail() {
        let sessions = manager();
        sessions
            .sign_up("dani@idhs.org", "segredo1", "Dani", UserModule::Academic)
            .unwrap();
        assert!(sessions
            .sign_up("dani@idhs.org", "outra123", "Dani", UserModule::Academic)
            .is_err());
        assert!(sessions
            .sign_up("eva@idhs.org", "123", "Eva", UserModule::Academic)
            .is_err());
    }

    struct NoUserBackend;

    impl AuthBackend for NoUserBackend {
        fn sign_in_with_password(&self, _: &str, _: &str) -> Result<AuthUser> {
            Err(CertificateError::Auth("unused".to_string()))
        }
        fn sign_up(&self, _: &str, _: &str) -> Result<Option<AuthUser>> {
            Ok(None)
        }
        fn sign_out(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sign_up_without_returned_user_is_an_error() {
        let sessions = SessionManager::new(NoUserBackend, MemoryProfileStore::new());
        let err = sessions
            .sign_up("f@idhs.org", "segredo1", "F", UserModule::Academic)
            .unwrap_err();
        assert!(matches!(err, CertificateError::SignUpWithoutUser));
        assert_eq!(err.to_string(), "Erro ao criar usuário");
    }

    #[test]
    fn sign_out_ends_backend_session() {
        let sessions = manager();
        let session = sessions
            .sign_up("gil@idhs.org", "segredo1", "Gil", UserModule::Financial)
            .unwrap();
        assert!(sessions.auth().current_user().is_some());
        sessions.sign_out(session).unwrap();
        assert_eq!(sessions.auth().current_user(), None);
    }
}
