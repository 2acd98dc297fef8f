// 测验引擎模块
// 负责加载测验、跟踪作答状态、提交时评分并回报成绩
// 评分全部在提交瞬间同步完成，之后才发起网络调用

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Assessment, CourseRecord, Question, QuestionOutcome, ResultDraft, ScoreSummary, Session,
};
use crate::services::api::{ApiError, EduSyncApi};

/// 一次作答的瞬态状态，只存在于客户端，离开页面即丢弃
#[derive(Debug, Clone)]
pub struct AttemptState {
    /// 日志关联用的本地 id
    attempt_id: Uuid,
    answers: Vec<Option<String>>,
    submitted: bool,
}

impl AttemptState {
    pub fn new(question_count: usize) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            answers: vec![None; question_count],
            submitted: false,
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// 记录一次选择，同一题后写的覆盖先写的；提交后变成空操作
    pub fn select_answer(&mut self, index: usize, option_key: &str) {
        if self.submitted {
            return;
        }
        match self.answers.get_mut(index) {
            Some(slot) => *slot = Some(option_key.to_string()),
            None => log::warn!(
                "attempt {}: answer index {} out of range",
                self.attempt_id,
                index
            ),
        }
    }

    pub fn answer(&self, index: usize) -> Option<&str> {
        self.answers.get(index).and_then(|a| a.as_deref())
    }

    pub fn answers(&self) -> &[Option<String>] {
        &self.answers
    }

    pub fn first_unanswered(&self) -> Option<usize> {
        self.answers.iter().position(|a| a.is_none())
    }

    pub fn is_complete(&self) -> bool {
        self.first_unanswered().is_none()
    }

    pub fn submitted(&self) -> bool {
        self.submitted
    }

    fn set_submitted(&mut self, submitted: bool) {
        self.submitted = submitted;
    }
}

/// 纯函数评分：逐题比对已选项与正确项，按题目分值累计
/// 满分在这里重新计算，不读任何缓存值
pub fn score_attempt(questions: &[Question], answers: &[Option<String>]) -> ScoreSummary {
    let mut score = 0;
    let mut max_score = 0;
    let mut breakdown = Vec::with_capacity(questions.len());

    for (idx, question) in questions.iter().enumerate() {
        let marks = question.marks_or_default();
        max_score += marks;

        let chosen = answers.get(idx).and_then(|a| a.clone()).unwrap_or_default();
        let is_correct = chosen == question.answer;
        if is_correct {
            score += marks;
        }

        breakdown.push(QuestionOutcome {
            question: question.question.clone(),
            chosen,
            correct: question.answer.clone(),
            is_correct,
            marks,
        });
    }

    ScoreSummary {
        score,
        max_score,
        breakdown,
    }
}

/// 测验流程的错误分类
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no assessment found for this course")]
    NotFound,
    #[error("failed to load assessment: {0}")]
    Load(#[source] ApiError),
    /// 本地校验失败，不会发起任何网络调用
    #[error("please answer all questions before submitting")]
    Unanswered { index: usize },
    #[error("assessment already submitted")]
    AlreadySubmitted,
    /// 成绩上报失败，表单重新开放以便重试
    #[error("failed to submit results: {0}")]
    Submit(#[source] ApiError),
}

/// 测验引擎：一个实例对应一次作答
pub struct AssessmentEngine {
    api: Arc<EduSyncApi>,
    assessment: Assessment,
    course: CourseRecord,
    instructor_name: Option<String>,
    attempt: AttemptState,
}

impl AssessmentEngine {
    /// 加载课程的测验，课程与讲师信息仅用于展示
    /// 加载失败时不会给出任何可作答的表单
    pub async fn load(api: Arc<EduSyncApi>, course_id: &str) -> Result<Self, EngineError> {
        let course = api
            .get_course(course_id)
            .await
            .map_err(Self::map_load_error)?;

        // 讲师名称取不到不阻塞加载
        let instructor_name = match &course.instructor_id {
            Some(instructor_id) => match api.get_user(instructor_id).await {
                Ok(user) => Some(user.name),
                Err(err) => {
                    log::warn!("error fetching instructor {}: {}", instructor_id, err);
                    None
                }
            },
            None => None,
        };

        let assessment = api
            .find_assessment_for_course(course_id)
            .await
            .map_err(Self::map_load_error)?;

        let attempt = AttemptState::new(assessment.questions.len());
        log::info!(
            "attempt {} started for assessment {} ({} questions)",
            attempt.attempt_id(),
            assessment.assessment_id,
            assessment.questions.len()
        );

        Ok(Self {
            api,
            assessment,
            course,
            instructor_name,
            attempt,
        })
    }

    fn map_load_error(err: ApiError) -> EngineError {
        match err {
            ApiError::NotFound(_) => EngineError::NotFound,
            other => EngineError::Load(other),
        }
    }

    pub fn assessment(&self) -> &Assessment {
        &self.assessment
    }

    pub fn course(&self) -> &CourseRecord {
        &self.course
    }

    pub fn instructor_name(&self) -> Option<&str> {
        self.instructor_name.as_deref()
    }

    pub fn attempt(&self) -> &AttemptState {
        &self.attempt
    }

    pub fn select_answer(&mut self, index: usize, option_key: &str) {
        self.attempt.select_answer(index, option_key);
    }

    /// 提交作答
    /// 前置条件：每道题都已作答，且尚未提交过
    /// 评分与满分都在此刻重新计算；只有后端接受了成绩，汇总才会返回给调用方
    pub async fn submit(&mut self, student: &Session) -> Result<ScoreSummary, EngineError> {
        if self.attempt.submitted() {
            return Err(EngineError::AlreadySubmitted);
        }
        if let Some(index) = self.attempt.first_unanswered() {
            return Err(EngineError::Unanswered { index });
        }

        // 先置为已提交：此后的 select_answer 全部失效，提交控件保持禁用
        self.attempt.set_submitted(true);
        let summary = score_attempt(&self.assessment.questions, self.attempt.answers());

        let draft = ResultDraft {
            student_id: student.user_id.clone(),
            assessment_id: self.assessment.assessment_id.clone(),
            course_id: self.assessment.course_id.clone(),
            score: summary.score,
            date: Utc::now(),
        };

        match self.api.post_result(&draft).await {
            Ok(_) => {
                log::info!(
                    "attempt {} submitted: {}/{}",
                    self.attempt.attempt_id(),
                    summary.score,
                    summary.max_score
                );
                Ok(summary)
            }
            Err(err) => {
                // 后端没收下的成绩不算存在：回滚提交态，丢弃本地算出的分数
                self.attempt.set_submitted(false);
                log::error!(
                    "attempt {} submit failed: {}",
                    self.attempt.attempt_id(),
                    err
                );
                Err(EngineError::Submit(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::services::api::ApiConfig;
    use std::collections::BTreeMap;

    fn question(text: &str, correct: &str, marks: Option<u32>) -> Question {
        let mut options = BTreeMap::new();
        options.insert("a".to_string(), "A".to_string());
        options.insert("b".to_string(), "B".to_string());
        options.insert("c".to_string(), "C".to_string());
        Question {
            id: None,
            question: text.to_string(),
            options,
            answer: correct.to_string(),
            marks,
        }
    }

    fn student() -> Session {
        Session {
            user_id: "s1".to_string(),
            name: "Ada".to_string(),
            role: Role::Student,
            token: "tok".to_string(),
        }
    }

    /// 指向无人监听端口的引擎实例，提交必然遭遇传输失败
    fn engine_with(questions: Vec<Question>) -> AssessmentEngine {
        let api = Arc::new(
            EduSyncApi::new(ApiConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                timeout_secs: 1,
                max_retries: 0,
            })
            .unwrap(),
        );
        let attempt = AttemptState::new(questions.len());
        AssessmentEngine {
            api,
            assessment: Assessment {
                assessment_id: "a1".to_string(),
                course_id: "c1".to_string(),
                title: "Quiz".to_string(),
                questions,
            },
            course: CourseRecord {
                course_id: "c1".to_string(),
                title: "Rust 101".to_string(),
                description: None,
                instructor_id: None,
            },
            instructor_name: None,
            attempt,
        }
    }

    #[test]
    fn test_scoring_scenario() {
        // 两道题，分值 [1, 3]，正确答案 ["a", "b"]，作答 ["a", "c"]
        let questions = vec![
            question("q1", "a", Some(1)),
            question("q2", "b", Some(3)),
        ];
        let answers = vec![Some("a".to_string()), Some("c".to_string())];

        let summary = score_attempt(&questions, &answers);
        assert_eq!(summary.score, 1);
        assert_eq!(summary.max_score, 4);
        assert_eq!(summary.breakdown.len(), 2);
        assert!(summary.breakdown[0].is_correct);
        assert_eq!(summary.breakdown[0].marks, 1);
        assert!(!summary.breakdown[1].is_correct);
        assert_eq!(summary.breakdown[1].marks, 3);
        assert_eq!(summary.percentage(), 25);
    }

    #[test]
    fn test_missing_marks_count_as_one_in_max_score() {
        let questions = vec![question("q1", "a", None), question("q2", "b", Some(2))];
        let answers = vec![Some("a".to_string()), Some("b".to_string())];

        let summary = score_attempt(&questions, &answers);
        assert_eq!(summary.score, 3);
        assert_eq!(summary.max_score, 3);
    }

    #[test]
    fn test_select_answer_idempotent_and_last_write_wins() {
        let mut attempt = AttemptState::new(2);

        attempt.select_answer(0, "a");
        let snapshot = attempt.answers().to_vec();
        attempt.select_answer(0, "a");
        assert_eq!(attempt.answers(), snapshot.as_slice());

        attempt.select_answer(0, "b");
        assert_eq!(attempt.answer(0), Some("b"));
    }

    #[test]
    fn test_select_answer_noop_after_submit() {
        let mut attempt = AttemptState::new(1);
        attempt.select_answer(0, "a");
        attempt.set_submitted(true);

        attempt.select_answer(0, "b");
        assert_eq!(attempt.answer(0), Some("a"));
    }

    #[test]
    fn test_select_answer_ignores_out_of_range_index() {
        let mut attempt = AttemptState::new(1);
        attempt.select_answer(5, "a");
        assert!(attempt.answers().iter().all(|a| a.is_none()));
    }

    #[tokio::test]
    async fn test_submit_refused_when_unanswered() {
        let mut engine = engine_with(vec![
            question("q1", "a", Some(1)),
            question("q2", "b", Some(1)),
        ]);
        engine.select_answer(0, "a");

        match engine.submit(&student()).await {
            Err(EngineError::Unanswered { index }) => assert_eq!(index, 1),
            other => panic!("expected unanswered error, got {:?}", other.map(|s| s.score)),
        }
        // 校验失败不会进入提交态
        assert!(!engine.attempt().submitted());
    }

    #[tokio::test]
    async fn test_submit_failure_rolls_back() {
        let mut engine = engine_with(vec![
            question("q1", "a", Some(1)),
            question("q2", "b", Some(3)),
        ]);
        engine.select_answer(0, "a");
        engine.select_answer(1, "b");

        match engine.submit(&student()).await {
            Err(EngineError::Submit(_)) => {}
            other => panic!("expected submit error, got {:?}", other.map(|s| s.score)),
        }

        // 提交态回滚，已选答案原样保留，可以直接重试
        assert!(!engine.attempt().submitted());
        assert_eq!(engine.attempt().answer(0), Some("a"));
        assert_eq!(engine.attempt().answer(1), Some("b"));
    }

    #[tokio::test]
    async fn test_second_submit_rejected_while_submitted() {
        let mut engine = engine_with(vec![question("q1", "a", Some(1))]);
        engine.select_answer(0, "a");
        engine.attempt.set_submitted(true);

        match engine.submit(&student()).await {
            Err(EngineError::AlreadySubmitted) => {}
            other => panic!("expected already-submitted error, got {:?}", other.map(|s| s.score)),
        }
    }
}
