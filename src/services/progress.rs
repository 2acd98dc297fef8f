// 学习进度聚合模块
// 教师端的成绩总览与学生端的个人成绩，都是跨四个集合的只读拼接
// 这是唯一允许自动重试的读路径，并带 5 分钟的本地缓存

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::try_join;

use crate::models::{AssessmentRecord, CourseRecord, Question, ResultRecord, UserRecord};
use crate::services::api::{ApiError, EduSyncApi};
use crate::utils::percentage;

/// 缓存过期时间：5 分钟
pub const CACHE_EXPIRATION: Duration = Duration::from_secs(5 * 60);

/// 一次抓取的全量快照
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub courses: Vec<CourseRecord>,
    pub assessments: Vec<AssessmentRecord>,
    pub results: Vec<ResultRecord>,
    pub users: Vec<UserRecord>,
    fetched_at: Instant,
}

impl ProgressSnapshot {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// 教师进度表的一行：成绩 × 测验 × 课程 × 学生
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRow {
    pub course_id: String,
    pub course_title: String,
    pub assessment_id: String,
    pub assessment_title: String,
    pub student_id: String,
    pub student_name: String,
    pub score: u32,
    pub max_score: u32,
    pub attempt_date: Option<DateTime<Utc>>,
}

impl ProgressRow {
    pub fn percentage(&self) -> u32 {
        percentage(self.score, self.max_score)
    }
}

/// 学生个人成绩页的一行
#[derive(Debug, Clone, PartialEq)]
pub struct StudentResultRow {
    pub assessment_id: String,
    pub assessment_title: String,
    pub score: u32,
    pub max_score: u32,
    pub attempt_date: Option<DateTime<Utc>>,
}

impl StudentResultRow {
    pub fn percentage(&self) -> u32 {
        percentage(self.score, self.max_score)
    }
}

/// 个人成绩统计，百分比按各次成绩的百分比取平均/最高
#[derive(Debug, Clone, PartialEq)]
pub struct ResultStats {
    pub total_attempts: usize,
    pub average_percentage: u32,
    pub highest_percentage: u32,
}

/// 测验记录的有效满分：优先从题目重新计算，解不开再退回存储值
fn effective_max_score(record: &AssessmentRecord) -> u32 {
    match record.decode_questions() {
        Ok(questions) if !questions.is_empty() => {
            questions.iter().map(Question::marks_or_default).sum()
        }
        _ => record.max_score.max(1),
    }
}

pub struct ProgressService {
    api: Arc<EduSyncApi>,
    cache: Mutex<Option<ProgressSnapshot>>,
}

impl ProgressService {
    pub fn new(api: Arc<EduSyncApi>) -> Self {
        Self {
            api,
            cache: Mutex::new(None),
        }
    }

    /// 取快照，缓存未过期时直接复用
    /// 四个集合的读取彼此并发，都带退避重试
    pub async fn snapshot(&self, force_refresh: bool) -> Result<ProgressSnapshot, ApiError> {
        if !force_refresh {
            if let Some(cached) = self.cache.lock().unwrap().as_ref() {
                if cached.is_fresh(CACHE_EXPIRATION) {
                    return Ok(cached.clone());
                }
            }
        }

        let (courses, assessments, results, users) = try_join!(
            self.api.get_json_with_retry::<Vec<CourseRecord>>("/CourseModels"),
            self.api.get_json_with_retry::<Vec<AssessmentRecord>>("/AssessmentModels"),
            self.api.get_json_with_retry::<Vec<ResultRecord>>("/ResultModels"),
            self.api.get_json_with_retry::<Vec<UserRecord>>("/UserModels"),
        )?;

        let snapshot = ProgressSnapshot {
            courses,
            assessments,
            results,
            users,
            fetched_at: Instant::now(),
        };
        *self.cache.lock().unwrap() = Some(snapshot.clone());
        log::info!(
            "progress snapshot refreshed: {} courses, {} assessments, {} results",
            snapshot.courses.len(),
            snapshot.assessments.len(),
            snapshot.results.len()
        );
        Ok(snapshot)
    }

    pub fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }
}

/// 某教师名下课程的全部成绩行
/// 引用缺失（课程、测验或学生已不存在）的成绩整行跳过
pub fn instructor_rows(snapshot: &ProgressSnapshot, instructor_id: &str) -> Vec<ProgressRow> {
    let instructor_courses: Vec<&CourseRecord> = snapshot
        .courses
        .iter()
        .filter(|c| c.instructor_id.as_deref() == Some(instructor_id))
        .collect();

    let mut rows = Vec::new();
    for result in &snapshot.results {
        let Some(assessment) = snapshot
            .assessments
            .iter()
            .find(|a| a.assessment_id == result.assessment_id)
        else {
            continue;
        };
        let Some(course) = instructor_courses
            .iter()
            .find(|c| c.course_id == assessment.course_id)
        else {
            continue;
        };
        let Some(student) = snapshot
            .users
            .iter()
            .find(|u| u.user_id == result.student_id)
        else {
            continue;
        };

        rows.push(ProgressRow {
            course_id: course.course_id.clone(),
            course_title: course.title.clone(),
            assessment_id: assessment.assessment_id.clone(),
            assessment_title: assessment.title.clone(),
            student_id: student.user_id.clone(),
            student_name: student.name.clone(),
            score: result.score,
            max_score: effective_max_score(assessment),
            attempt_date: result.date,
        });
    }
    rows
}

/// 按课程、学生与搜索词过滤进度行，搜索大小写不敏感
pub fn filter_rows(
    rows: &[ProgressRow],
    course_id: Option<&str>,
    student_id: Option<&str>,
    search: &str,
) -> Vec<ProgressRow> {
    let needle = search.trim().to_lowercase();
    rows.iter()
        .filter(|row| course_id.map(|c| row.course_id == c).unwrap_or(true))
        .filter(|row| student_id.map(|s| row.student_id == s).unwrap_or(true))
        .filter(|row| {
            needle.is_empty()
                || row.student_name.to_lowercase().contains(&needle)
                || row.course_title.to_lowercase().contains(&needle)
                || row.assessment_title.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

/// 学生本人的成绩行与统计
pub fn student_results(
    snapshot: &ProgressSnapshot,
    student_id: &str,
) -> (Vec<StudentResultRow>, ResultStats) {
    let mut rows = Vec::new();
    for result in snapshot
        .results
        .iter()
        .filter(|r| r.student_id == student_id)
    {
        let assessment = snapshot
            .assessments
            .iter()
            .find(|a| a.assessment_id == result.assessment_id);

        let (title, max_score) = match assessment {
            Some(a) => (a.title.clone(), effective_max_score(a)),
            // 测验已被删除的历史成绩仍然展示
            None => ("Unknown assessment".to_string(), 1),
        };

        rows.push(StudentResultRow {
            assessment_id: result.assessment_id.clone(),
            assessment_title: title,
            score: result.score,
            max_score,
            attempt_date: result.date,
        });
    }

    let stats = compute_stats(&rows);
    (rows, stats)
}

fn compute_stats(rows: &[StudentResultRow]) -> ResultStats {
    if rows.is_empty() {
        return ResultStats {
            total_attempts: 0,
            average_percentage: 0,
            highest_percentage: 0,
        };
    }

    let mut total = 0.0_f64;
    let mut highest = 0.0_f64;
    for row in rows {
        let max = row.max_score.max(1) as f64;
        let pct = row.score as f64 / max * 100.0;
        total += pct;
        if pct > highest {
            highest = pct;
        }
    }

    ResultStats {
        total_attempts: rows.len(),
        average_percentage: (total / rows.len() as f64).round() as u32,
        highest_percentage: highest.round() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(id: &str, title: &str, instructor: Option<&str>) -> CourseRecord {
        CourseRecord {
            course_id: id.to_string(),
            title: title.to_string(),
            description: None,
            instructor_id: instructor.map(str::to_string),
        }
    }

    fn assessment(id: &str, course_id: &str, title: &str, questions: &str, max: u32) -> AssessmentRecord {
        AssessmentRecord {
            assessment_id: id.to_string(),
            course_id: course_id.to_string(),
            title: title.to_string(),
            questions: questions.to_string(),
            max_score: max,
        }
    }

    fn result(student: &str, assessment: &str, score: u32) -> ResultRecord {
        ResultRecord {
            result_id: None,
            student_id: student.to_string(),
            assessment_id: assessment.to_string(),
            course_id: None,
            score,
            date: None,
        }
    }

    fn user(id: &str, name: &str) -> UserRecord {
        UserRecord {
            user_id: id.to_string(),
            name: name.to_string(),
            email: None,
            role: Some("Student".to_string()),
        }
    }

    fn sample_snapshot() -> ProgressSnapshot {
        ProgressSnapshot {
            courses: vec![
                course("c1", "Rust 101", Some("i1")),
                course("c2", "Go 101", Some("i2")),
            ],
            assessments: vec![
                assessment(
                    "a1",
                    "c1",
                    "Quiz 1",
                    r#"[{"question":"q","options":{"a":"x","b":"y"},"answer":"a","marks":4}]"#,
                    999,
                ),
                assessment("a2", "c2", "Quiz 2", "[]", 10),
            ],
            results: vec![
                result("s1", "a1", 2),
                result("s2", "a1", 4),
                // 指向别的教师课程的成绩
                result("s1", "a2", 5),
                // 指向已删除测验的成绩
                result("s1", "gone", 1),
            ],
            users: vec![user("s1", "Ada"), user("s2", "Grace")],
            fetched_at: Instant::now(),
        }
    }

    #[test]
    fn test_instructor_rows_join_and_skip_dangling() {
        let snapshot = sample_snapshot();
        let rows = instructor_rows(&snapshot, "i1");

        // 只剩 i1 课程下、引用完整的两行
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.course_id == "c1"));
        // 满分从题目重新计算（4），不信任存储的 999
        assert!(rows.iter().all(|r| r.max_score == 4));
        assert_eq!(rows[0].percentage(), 50);
        assert_eq!(rows[1].percentage(), 100);
    }

    #[test]
    fn test_effective_max_score_falls_back_to_stored() {
        let broken = assessment("a3", "c1", "Quiz", "not json", 7);
        assert_eq!(effective_max_score(&broken), 7);

        let empty = assessment("a4", "c1", "Quiz", "[]", 0);
        assert_eq!(effective_max_score(&empty), 1);
    }

    #[test]
    fn test_filter_rows() {
        let snapshot = sample_snapshot();
        let rows = instructor_rows(&snapshot, "i1");

        assert_eq!(filter_rows(&rows, Some("c1"), None, "").len(), 2);
        assert_eq!(filter_rows(&rows, None, Some("s2"), "").len(), 1);
        assert_eq!(filter_rows(&rows, None, None, "ada").len(), 1);
        assert_eq!(filter_rows(&rows, None, None, "quiz 1").len(), 2);
        assert_eq!(filter_rows(&rows, Some("c2"), None, "").len(), 0);
    }

    #[test]
    fn test_student_results_and_stats() {
        let snapshot = sample_snapshot();
        let (rows, stats) = student_results(&snapshot, "s1");

        // s1 的三条成绩都在，包括指向已删除测验的那条
        assert_eq!(rows.len(), 3);
        let gone = rows.iter().find(|r| r.assessment_id == "gone").unwrap();
        assert_eq!(gone.assessment_title, "Unknown assessment");
        assert_eq!(gone.max_score, 1);

        // 百分比：2/4=50%、5/10=50%、1/1=100%
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.average_percentage, 67);
        assert_eq!(stats.highest_percentage, 100);
    }

    #[test]
    fn test_stats_empty() {
        let stats = compute_stats(&[]);
        assert_eq!(stats.total_attempts, 0);
        assert_eq!(stats.average_percentage, 0);
        assert_eq!(stats.highest_percentage, 0);
    }

    #[test]
    fn test_snapshot_freshness() {
        let snapshot = sample_snapshot();
        assert!(snapshot.is_fresh(CACHE_EXPIRATION));
        // ttl 归零即过期，对应强制刷新的场景
        assert!(!snapshot.is_fresh(Duration::ZERO));
    }
}
