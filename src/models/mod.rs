// 数据模型模块
// EduSync 各实体的领域模型与 REST 传输结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::percentage;

/// 及格线（百分比）
pub const PASS_PERCENTAGE: u32 = 70;

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    Student,
    Instructor,
}

impl Role {
    /// 解析角色字符串，大小写不敏感
    pub fn parse(value: &str) -> Option<Role> {
        match value.trim().to_lowercase().as_str() {
            "student" => Some(Role::Student),
            "instructor" => Some(Role::Instructor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "Student",
            Role::Instructor => "Instructor",
        }
    }

    /// 角色默认落地页
    pub fn landing_path(&self) -> &'static str {
        match self {
            Role::Student => "/dashboard",
            Role::Instructor => "/instructor",
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Role::parse(&value).ok_or_else(|| format!("unknown role: {}", value))
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// 本地缓存的登录会话，对应存储键 "user" 下的 JSON
/// 字段必须全部存在，缺失即视为无效会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(alias = "UserId", alias = "id", alias = "Id", deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Role")]
    pub role: Role,
    #[serde(alias = "Token")]
    pub token: String,
}

/// 认证状态机，取代到处重复解析存储的做法
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    /// 会话缓存尚未读取完成，不渲染任何内容
    Checking,
    Unauthenticated,
    Authenticated(Session),
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// 测验中的单道题目
/// options 为选项键到文本的有序映射（"a".."d"），answer 必须是其中一个键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(alias = "Question", alias = "text")]
    pub question: String,
    #[serde(alias = "Options")]
    pub options: BTreeMap<String, String>,
    #[serde(alias = "Answer", alias = "correctKey")]
    pub answer: String,
    #[serde(default, alias = "Marks")]
    pub marks: Option<u32>,
}

impl Question {
    /// 旧数据可能缺少 marks 字段，缺失或为 0 时按 1 分计
    pub fn marks_or_default(&self) -> u32 {
        match self.marks {
            Some(m) if m > 0 => m,
            _ => 1,
        }
    }
}

/// 测验的传输记录
/// 注意：questions 字段在后端是 JSON 编码的字符串而不是数组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    #[serde(alias = "AssessmentId", deserialize_with = "de_id")]
    pub assessment_id: String,
    #[serde(alias = "CourseId", deserialize_with = "de_id")]
    pub course_id: String,
    #[serde(alias = "Title")]
    pub title: String,
    #[serde(alias = "Questions")]
    pub questions: String,
    /// 后端存储的 maxScore，仅作展示兜底，评分时永远重新计算
    #[serde(default, alias = "MaxScore")]
    pub max_score: u32,
}

impl AssessmentRecord {
    /// 解码内嵌的题目 JSON 字符串
    pub fn decode_questions(&self) -> Result<Vec<Question>, serde_json::Error> {
        serde_json::from_str(&self.questions)
    }
}

/// 解码后的测验
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub assessment_id: String,
    pub course_id: String,
    pub title: String,
    pub questions: Vec<Question>,
}

impl Assessment {
    pub fn from_record(record: AssessmentRecord) -> Result<Self, serde_json::Error> {
        let questions = record.decode_questions()?;
        Ok(Assessment {
            assessment_id: record.assessment_id,
            course_id: record.course_id,
            title: record.title,
            questions,
        })
    }

    /// 满分 = 各题分值之和，永远重新计算而不信任存储值
    pub fn max_score(&self) -> u32 {
        self.questions.iter().map(Question::marks_or_default).sum()
    }
}

/// 教师创建/编辑测验的输入
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDraft {
    pub question: String,
    pub options: BTreeMap<String, String>,
    pub answer: String,
    pub marks: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentDraft {
    pub course_id: String,
    pub title: String,
    pub questions: Vec<QuestionDraft>,
}

/// POST/PUT /AssessmentModels 的请求体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentPayload {
    pub course_id: String,
    pub title: String,
    pub questions: String,
    pub max_score: u32,
}

impl AssessmentDraft {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() || self.course_id.trim().is_empty() {
            return Err("Please select a course and give a title.".to_string());
        }
        if self.questions.is_empty() {
            return Err("Please add at least one question.".to_string());
        }
        if self.questions.iter().any(|q| q.question.trim().is_empty()) {
            return Err("Please fill in all questions.".to_string());
        }
        for (idx, q) in self.questions.iter().enumerate() {
            if !q.options.contains_key(&q.answer) {
                return Err(format!(
                    "Question {} marks option '{}' as correct but has no such option.",
                    idx + 1,
                    q.answer
                ));
            }
        }
        Ok(())
    }

    /// 满分由各题分值累加得到，不允许单独录入
    pub fn max_score(&self) -> u32 {
        self.questions.iter().map(|q| q.marks.max(1)).sum()
    }

    pub fn to_payload(&self) -> Result<AssessmentPayload, serde_json::Error> {
        let questions: Vec<Question> = self
            .questions
            .iter()
            .enumerate()
            .map(|(idx, q)| Question {
                id: Some(idx as u32 + 1),
                question: q.question.clone(),
                options: q.options.clone(),
                answer: q.answer.clone(),
                marks: Some(q.marks.max(1)),
            })
            .collect();

        Ok(AssessmentPayload {
            course_id: self.course_id.clone(),
            title: self.title.clone(),
            questions: serde_json::to_string(&questions)?,
            max_score: self.max_score(),
        })
    }
}

/// 课程记录，课程内容本身由外部系统维护
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRecord {
    #[serde(alias = "CourseId", deserialize_with = "de_id")]
    pub course_id: String,
    #[serde(alias = "Title")]
    pub title: String,
    #[serde(default, alias = "Description")]
    pub description: Option<String>,
    #[serde(default, alias = "InstructorId", deserialize_with = "de_opt_id")]
    pub instructor_id: Option<String>,
}

/// 用户记录
/// 列表接口里的 role 保留原始字符串，避免个别脏数据拖垮整个响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(alias = "UserId", deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Email")]
    pub email: Option<String>,
    #[serde(default, alias = "Role")]
    pub role: Option<String>,
}

impl UserRecord {
    pub fn parsed_role(&self) -> Option<Role> {
        self.role.as_deref().and_then(Role::parse)
    }
}

/// 注册请求体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDraft {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// 已完成答题的成绩记录
/// 读取时兼容历史上的 {UserId, Score, AttemptDate} 形状
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    #[serde(default, alias = "ResultId", deserialize_with = "de_opt_id")]
    pub result_id: Option<String>,
    #[serde(
        alias = "StudentId",
        alias = "userId",
        alias = "UserId",
        deserialize_with = "de_id"
    )]
    pub student_id: String,
    #[serde(alias = "AssessmentId", deserialize_with = "de_id")]
    pub assessment_id: String,
    #[serde(default, alias = "CourseId", deserialize_with = "de_opt_id")]
    pub course_id: Option<String>,
    #[serde(default, alias = "Score")]
    pub score: u32,
    #[serde(default, alias = "Date", alias = "attemptDate", alias = "AttemptDate")]
    pub date: Option<DateTime<Utc>>,
}

/// POST /ResultModels 的请求体，统一使用这一种形状
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultDraft {
    pub student_id: String,
    pub assessment_id: String,
    pub course_id: String,
    pub score: u32,
    pub date: DateTime<Utc>,
}

/// 单题判分结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub question: String,
    pub chosen: String,
    pub correct: String,
    pub is_correct: bool,
    pub marks: u32,
}

/// 一次提交的评分汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSummary {
    pub score: u32,
    pub max_score: u32,
    pub breakdown: Vec<QuestionOutcome>,
}

impl ScoreSummary {
    pub fn percentage(&self) -> u32 {
        percentage(self.score, self.max_score)
    }

    pub fn passed(&self) -> bool {
        self.percentage() >= PASS_PERCENTAGE
    }
}

/// 后端的 id 字段有时是数字、有时是字符串，统一归一化为字符串
fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
