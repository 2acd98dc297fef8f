// 服务模块
// 提供核心业务逻辑服务

pub mod api;
pub mod assessment;
pub mod guard;
pub mod progress;
pub mod session;

pub use api::{backoff_delay, ApiConfig, ApiError, EduSyncApi};

pub use assessment::{score_attempt, AssessmentEngine, AttemptState, EngineError};

pub use guard::{decide, evaluate, find_screen, AccessDecision, ScreenSpec, SCREENS};

pub use progress::{
    filter_rows, instructor_rows, student_results, ProgressRow, ProgressService,
    ProgressSnapshot, ResultStats, StudentResultRow, CACHE_EXPIRATION,
};

pub use session::{
    validate_login_form, AuthService, SessionStore, SESSION_STORAGE_KEY,
};
