// EduSync REST 服务模块
// 所有持久化操作都委托给远端后端，这里是唯一的网络边界
// 字段大小写的归一化在 models 的反序列化层完成，这里只负责传输

use std::sync::Mutex;
use std::time::Duration;

use futures::future::try_join_all;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::models::{
    Assessment, AssessmentDraft, AssessmentRecord, CourseRecord, RegisterDraft, ResultDraft,
    ResultRecord, Session, UserRecord,
};

/// API 配置，启动时构造一次，之后只读
/// 通过构造函数显式传入，不使用全局可变状态
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// 每个请求的超时时间（秒）
    pub timeout_secs: u64,
    /// 读路径退避重试的最大次数
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:7278".to_string(),
            timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl ApiConfig {
    /// 从环境变量读取部署配置
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("EDUSYNC_API_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = url.trim().to_string();
            }
        }
        if let Ok(secs) = std::env::var("EDUSYNC_API_TIMEOUT_SECS") {
            if let Ok(value) = secs.parse() {
                config.timeout_secs = value;
            }
        }
        config
    }

    /// REST 根路径
    fn api_root(&self) -> String {
        format!("{}/api", self.base_url.trim_end_matches('/'))
    }
}

/// 后端调用的错误分类
#[derive(Debug, Error)]
pub enum ApiError {
    /// 引用的资源在服务端不存在
    #[error("not found: {0}")]
    NotFound(String),
    /// 登录被拒绝
    #[error("invalid email or password")]
    Unauthorized,
    /// 网络传输失败或超时
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// 服务端返回了非成功状态码
    #[error("server returned {0}")]
    Status(StatusCode),
    /// 响应体无法按预期结构解析
    #[error("unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// 只有传输层失败值得自动重试，4xx/5xx 交给用户手动重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}

/// 第 attempt 次重试前的退避间隔：1s、2s、4s
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(1000 * 2u64.pow(attempt.saturating_sub(1)))
}

/// EduSync 后端客户端
pub struct EduSyncApi {
    http: reqwest::Client,
    config: ApiConfig,
    /// 登录后安装、登出时清除的 Bearer Token
    token: Mutex<Option<String>>,
}

impl EduSyncApi {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.lock().unwrap() = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_root(), path)
    }

    /// 已登录时给请求附加 Authorization 头
    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.lock().unwrap().as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        path: &str,
    ) -> Result<T, ApiError> {
        match response.status() {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(path.to_string())),
            status if !status.is_success() => Err(ApiError::Status(status)),
            _ => Ok(response.json::<T>().await?),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.authed(self.http.get(self.url(path))).send().await?;
        Self::decode(response, path).await
    }

    /// 读路径的退避重试封装，仅聚合视图使用；写操作永远不自动重试
    pub async fn get_json_with_retry<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let mut attempt = 0u32;
        loop {
            match self.get_json(path).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(attempt);
                    log::warn!(
                        "GET {} failed ({}), retry {}/{} after {:?}",
                        path,
                        err,
                        attempt,
                        self.config.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let response = self
            .authed(self.http.post(self.url(path)).json(body))
            .send()
            .await?;
        Self::decode(response, path).await
    }

    async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let response = self
            .authed(self.http.put(self.url(path)).json(body))
            .send()
            .await?;
        Self::decode(response, path).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let response = self.authed(self.http.delete(self.url(path))).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(path.to_string())),
            status if !status.is_success() => Err(ApiError::Status(status)),
            _ => Ok(()),
        }
    }

    // ==================== 认证 ====================

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                Err(ApiError::Unauthorized)
            }
            status if !status.is_success() => Err(ApiError::Status(status)),
            _ => Ok(response.json::<Session>().await?),
        }
    }

    pub async fn register(&self, draft: &RegisterDraft) -> Result<UserRecord, ApiError> {
        self.post_json("/UserModels", draft).await
    }

    // ==================== 用户 ====================

    pub async fn get_user(&self, user_id: &str) -> Result<UserRecord, ApiError> {
        self.get_json(&format!("/UserModels/{}", user_id)).await
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, ApiError> {
        self.get_json("/UserModels").await
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/UserModels/{}", user_id)).await
    }

    // ==================== 课程 ====================

    pub async fn get_course(&self, course_id: &str) -> Result<CourseRecord, ApiError> {
        self.get_json(&format!("/CourseModels/{}", course_id)).await
    }

    pub async fn list_courses(&self) -> Result<Vec<CourseRecord>, ApiError> {
        self.get_json("/CourseModels").await
    }

    pub async fn delete_course(&self, course_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/CourseModels/{}", course_id)).await
    }

    // ==================== 测验 ====================

    pub async fn list_assessments(&self) -> Result<Vec<AssessmentRecord>, ApiError> {
        self.get_json("/AssessmentModels").await
    }

    /// 按课程取测验：后端没有按课程过滤的接口，拉全量后在客户端筛选
    pub async fn find_assessment_for_course(&self, course_id: &str) -> Result<Assessment, ApiError> {
        let records = self.list_assessments().await?;
        let record = records
            .into_iter()
            .find(|r| r.course_id == course_id)
            .ok_or_else(|| ApiError::NotFound(format!("assessment for course {}", course_id)))?;
        Ok(Assessment::from_record(record)?)
    }

    pub async fn create_assessment(
        &self,
        draft: &AssessmentDraft,
    ) -> Result<AssessmentRecord, ApiError> {
        let payload = draft.to_payload()?;
        self.post_json("/AssessmentModels", &payload).await
    }

    pub async fn update_assessment(
        &self,
        assessment_id: &str,
        draft: &AssessmentDraft,
    ) -> Result<AssessmentRecord, ApiError> {
        let payload = draft.to_payload()?;
        self.put_json(&format!("/AssessmentModels/{}", assessment_id), &payload)
            .await
    }

    pub async fn delete_assessment(&self, assessment_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/AssessmentModels/{}", assessment_id))
            .await
    }

    // ==================== 成绩 ====================

    pub async fn post_result(&self, draft: &ResultDraft) -> Result<ResultRecord, ApiError> {
        self.post_json("/ResultModels", draft).await
    }

    pub async fn list_results(&self) -> Result<Vec<ResultRecord>, ApiError> {
        self.get_json("/ResultModels").await
    }

    pub async fn delete_result(&self, result_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/ResultModels/{}", result_id)).await
    }

    // ==================== 级联删除 ====================
    // 后端不保证原子级联，客户端按固定顺序编排：
    // 先删成绩，再删测验，最后删课程/账号

    pub async fn delete_assessment_cascade(&self, assessment_id: &str) -> Result<(), ApiError> {
        let results = self.list_results().await?;
        self.delete_results_of_assessment(assessment_id, &results)
            .await?;
        self.delete_assessment(assessment_id).await
    }

    pub async fn delete_course_cascade(&self, course_id: &str) -> Result<(), ApiError> {
        let assessments = self.list_assessments().await?;
        let results = self.list_results().await?;

        for assessment in assessments.iter().filter(|a| a.course_id == course_id) {
            self.delete_results_of_assessment(&assessment.assessment_id, &results)
                .await?;
            self.delete_assessment(&assessment.assessment_id).await?;
        }

        self.delete_course(course_id).await
    }

    /// 注销教师账号：级联删除其全部课程后再删除账号
    pub async fn delete_instructor_account(&self, user_id: &str) -> Result<(), ApiError> {
        let courses = self.list_courses().await?;
        for course in courses
            .iter()
            .filter(|c| c.instructor_id.as_deref() == Some(user_id))
        {
            self.delete_course_cascade(&course.course_id).await?;
        }
        self.delete_user(user_id).await
    }

    /// 注销学生账号：先删除本人全部成绩
    pub async fn delete_student_account(&self, user_id: &str) -> Result<(), ApiError> {
        let results = self.list_results().await?;
        let deletions: Vec<_> = results
            .iter()
            .filter(|r| r.student_id == user_id)
            .filter_map(|r| r.result_id.as_deref())
            .map(|id| self.delete_result(id))
            .collect();
        try_join_all(deletions).await?;
        self.delete_user(user_id).await
    }

    /// 同一测验下的成绩互不依赖，可以并发删除
    async fn delete_results_of_assessment(
        &self,
        assessment_id: &str,
        results: &[ResultRecord],
    ) -> Result<(), ApiError> {
        let mut deletions = Vec::new();
        for result in results.iter().filter(|r| r.assessment_id == assessment_id) {
            match result.result_id.as_deref() {
                Some(id) => deletions.push(self.delete_result(id)),
                None => log::warn!(
                    "result for assessment {} has no id, skipping delete",
                    assessment_id
                ),
            }
        }
        try_join_all(deletions).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 指向无人监听端口的客户端，用来制造传输层失败
    fn unroutable_api() -> EduSyncApi {
        EduSyncApi::new(ApiConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            max_retries: 0,
        })
        .unwrap()
    }

    #[test]
    fn test_backoff_delays() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_api_root_trims_trailing_slash() {
        let config = ApiConfig {
            base_url: "http://host:1234/".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(config.api_root(), "http://host:1234/api");
    }

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        assert!(!ApiError::NotFound("x".to_string()).is_retryable());
        assert!(!ApiError::Status(StatusCode::INTERNAL_SERVER_ERROR).is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let api = unroutable_api();
        let err = api.list_courses().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, ApiError::Transport(_)));
    }

    #[tokio::test]
    async fn test_login_failure_surfaces_error() {
        let api = unroutable_api();
        assert!(api.login("a@b.c", "pw").await.is_err());
    }
}
