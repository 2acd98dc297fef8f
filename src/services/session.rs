// 会话服务模块
// 浏览器 sessionStorage 的文件版：存储键 "user" 对应一个 JSON 快照
// 会话缓存是唯一的持久共享状态，只有登录/登出两个写入方

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use regex::Regex;

use crate::models::{AuthState, RegisterDraft, Role, Session, UserRecord};
use crate::services::api::{ApiError, EduSyncApi};
use crate::utils::get_app_data_dir;

/// 会话缓存的存储键（文件名即 <key>.json）
pub const SESSION_STORAGE_KEY: &str = "user";

/// 本地会话缓存
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            path: get_app_data_dir()?.join(format!("{}.json", SESSION_STORAGE_KEY)),
        })
    }

    /// 指定存储位置，测试用
    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// 读取会话缓存
    /// 缺失按未登录处理；无法解析的缓存视为无效，清掉后按未登录处理
    pub fn load(&self) -> AuthState {
        if !self.path.exists() {
            return AuthState::Unauthenticated;
        }

        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                log::error!("error reading session cache: {}", err);
                return AuthState::Unauthenticated;
            }
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => AuthState::Authenticated(session),
            Err(err) => {
                log::error!("error parsing session cache, clearing it: {}", err);
                if let Err(err) = self.clear() {
                    log::error!("error clearing invalid session cache: {}", err);
                }
                AuthState::Unauthenticated
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// 登录表单校验，返回所有未通过项的提示
pub fn validate_login_form(email: &str, password: &str) -> Vec<String> {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    let email_re = EMAIL_RE.get_or_init(|| Regex::new(r"\S+@\S+\.\S+").expect("valid email regex"));

    let mut errors = Vec::new();
    if email.trim().is_empty() {
        errors.push("Email is required".to_string());
    } else if !email_re.is_match(email) {
        errors.push("Email address is invalid".to_string());
    }
    if password.is_empty() {
        errors.push("Password is required".to_string());
    }
    errors
}

/// 认证服务：登录、登出、注册与角色判断
/// 登录成功后把响应快照写入会话缓存并安装 Bearer Token
pub struct AuthService {
    api: Arc<EduSyncApi>,
    store: SessionStore,
}

impl AuthService {
    pub fn new(api: Arc<EduSyncApi>, store: SessionStore) -> Self {
        Self { api, store }
    }

    /// 启动时从持久化会话恢复登录态
    pub fn restore(&self) -> AuthState {
        let state = self.store.load();
        if let AuthState::Authenticated(session) = &state {
            self.api.set_token(Some(session.token.clone()));
            log::info!("restored session for {} ({})", session.name, session.role.as_str());
        }
        state
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let session = self.api.login(email, password).await?;
        if let Err(err) = self.store.save(&session) {
            // 保存失败不阻塞登录，只是刷新后需要重新登录
            log::error!("error saving session cache: {}", err);
        }
        self.api.set_token(Some(session.token.clone()));
        log::info!("user {} logged in as {}", session.user_id, session.role.as_str());
        Ok(session)
    }

    pub fn logout(&self) {
        if let Err(err) = self.store.clear() {
            log::error!("error clearing session cache: {}", err);
        }
        self.api.set_token(None);
        log::info!("user logged out");
    }

    pub async fn register(&self, draft: &RegisterDraft) -> Result<UserRecord, ApiError> {
        self.api.register(draft).await
    }

    pub fn state(&self) -> AuthState {
        self.store.load()
    }

    pub fn current_user(&self) -> Option<Session> {
        match self.store.load() {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_instructor(&self) -> bool {
        self.current_user()
            .map(|s| s.role == Role::Instructor)
            .unwrap_or(false)
    }

    pub fn is_student(&self) -> bool {
        self.current_user()
            .map(|s| s.role == Role::Student)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_store() -> SessionStore {
        let path = std::env::temp_dir().join(format!("edusync-session-{}.json", Uuid::new_v4()));
        SessionStore::at_path(path)
    }

    fn sample_session() -> Session {
        Session {
            user_id: "7".to_string(),
            name: "Ada".to_string(),
            role: Role::Student,
            token: "tok".to_string(),
        }
    }

    #[test]
    fn test_missing_blob_is_unauthenticated() {
        let store = temp_store();
        assert_eq!(store.load(), AuthState::Unauthenticated);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let store = temp_store();
        store.save(&sample_session()).unwrap();

        match store.load() {
            AuthState::Authenticated(session) => assert_eq!(session.name, "Ada"),
            other => panic!("expected authenticated state, got {:?}", other),
        }

        store.clear().unwrap();
        assert_eq!(store.load(), AuthState::Unauthenticated);
    }

    #[test]
    fn test_corrupt_blob_fails_closed_and_clears() {
        let store = temp_store();
        fs::write(&store.path, "{not valid json").unwrap();

        assert_eq!(store.load(), AuthState::Unauthenticated);
        // 脏缓存被清理，下次读取不再反复解析失败
        assert!(!store.path.exists());
    }

    #[test]
    fn test_partial_blob_fails_closed() {
        let store = temp_store();
        fs::write(&store.path, r#"{"userId":"7","name":"Ada"}"#).unwrap();
        assert_eq!(store.load(), AuthState::Unauthenticated);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = temp_store();
        store.clear().unwrap();
        store.clear().unwrap();
    }

    #[test]
    fn test_login_form_validation() {
        assert!(validate_login_form("ada@example.com", "pw").is_empty());
        assert_eq!(validate_login_form("", "pw"), vec!["Email is required"]);
        assert_eq!(
            validate_login_form("not-an-email", "pw"),
            vec!["Email address is invalid"]
        );
        assert_eq!(validate_login_form("a@b.co", ""), vec!["Password is required"]);
        assert_eq!(validate_login_form("", "").len(), 2);
    }
}
