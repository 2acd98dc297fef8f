// 终端界面模块
// 原各页面的终端版薄展示层：渲染与输入在这里，判定全部交给守卫与服务
// 任何进入页面的动作都先过一遍访问守卫

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;

use crate::models::{AssessmentDraft, AuthState, QuestionDraft, Role, ScoreSummary, Session};
use crate::services::api::{ApiError, EduSyncApi};
use crate::services::assessment::{AssessmentEngine, EngineError};
use crate::services::guard::{decide, AccessDecision};
use crate::services::progress::{filter_rows, instructor_rows, student_results, ProgressService};
use crate::services::session::{validate_login_form, AuthService};

/// 应用上下文：启动时装配一次
pub struct App {
    pub api: Arc<EduSyncApi>,
    pub auth: AuthService,
    pub progress: ProgressService,
}

pub async fn run(app: App) -> Result<()> {
    println!("EduSync — courses, assessments and results");

    loop {
        match app.auth.state() {
            // 状态未决时不渲染任何界面
            AuthState::Checking => continue,
            AuthState::Unauthenticated => {
                if !login_screen(&app).await? {
                    return Ok(());
                }
            }
            AuthState::Authenticated(session) => {
                let quit = match session.role {
                    Role::Student => student_menu(&app, &session).await?,
                    Role::Instructor => instructor_menu(&app, &session).await?,
                };
                if quit {
                    return Ok(());
                }
            }
        }
    }
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn confirm(label: &str) -> io::Result<bool> {
    Ok(prompt(label)?.eq_ignore_ascii_case("y"))
}

/// 进入受保护页面前的守卫检查；被重定向时向用户说明去向
fn enter(app: &App, path: &str) -> bool {
    match decide(&app.auth.state(), path) {
        AccessDecision::Render => true,
        AccessDecision::Wait => false,
        AccessDecision::RedirectToLogin { from } => {
            println!("Please sign in first to visit {}.", from);
            false
        }
        AccessDecision::Redirect { to } => {
            println!("You don't have access to {}; taking you back to {}.", path, to);
            false
        }
    }
}

// ==================== 登录 ====================

/// 返回 false 表示用户选择退出程序
async fn login_screen(app: &App) -> Result<bool> {
    println!("\n== Sign in to EduSync ==  (empty email quits)");
    loop {
        let email = prompt("Email: ")?;
        if email.is_empty() {
            return Ok(false);
        }
        let password = prompt("Password: ")?;

        let errors = validate_login_form(&email, &password);
        if !errors.is_empty() {
            for error in &errors {
                println!("  ! {}", error);
            }
            continue;
        }

        match app.auth.login(&email, &password).await {
            Ok(session) => {
                println!("Welcome back, {}!", session.name);
                return Ok(true);
            }
            Err(ApiError::Unauthorized) => println!("Invalid email or password."),
            Err(err) => println!("Login failed: {}. Please try again.", err),
        }
    }
}

// ==================== 学生端 ====================

/// 返回 true 表示退出程序
async fn student_menu(app: &App, session: &Session) -> Result<bool> {
    if !enter(app, "/dashboard") {
        return Ok(false);
    }

    loop {
        println!("\n== Dashboard ({}) ==", session.name);
        println!("  1) Browse courses");
        println!("  2) Take an assessment");
        println!("  3) My results");
        println!("  4) Log out");
        println!("  0) Quit");

        match prompt("> ")?.as_str() {
            "1" => courses_screen(app).await?,
            "2" => take_assessment_screen(app, session).await?,
            "3" => my_results_screen(app, session).await?,
            "4" => {
                app.auth.logout();
                return Ok(false);
            }
            "0" => return Ok(true),
            _ => println!("Unknown choice."),
        }
    }
}

async fn courses_screen(app: &App) -> Result<()> {
    if !enter(app, "/courses") {
        return Ok(());
    }

    match app.api.list_courses().await {
        Ok(courses) if courses.is_empty() => println!("No courses available yet."),
        Ok(courses) => {
            println!("\n{:<10} {}", "ID", "COURSE");
            for course in courses {
                let description = course.description.unwrap_or_default();
                println!("{:<10} {}  {}", course.course_id, course.title, description);
            }
        }
        Err(err) => println!("Failed to load courses: {}. Please try again.", err),
    }
    Ok(())
}

async fn take_assessment_screen(app: &App, session: &Session) -> Result<()> {
    let course_id = prompt("Course id: ")?;
    if course_id.is_empty() {
        return Ok(());
    }
    if !enter(app, &format!("/assessment/{}", course_id)) {
        return Ok(());
    }

    // 加载失败只给出阻断性的提示，不渲染半个表单
    let mut engine = loop {
        match AssessmentEngine::load(Arc::clone(&app.api), &course_id).await {
            Ok(engine) => break engine,
            Err(EngineError::NotFound) => {
                println!("No assessment found for this course.");
                return Ok(());
            }
            Err(err) => {
                println!("Failed to load assessment: {}.", err);
                if !confirm("Try again? (y/n) ")? {
                    return Ok(());
                }
            }
        }
    };

    let assessment = engine.assessment().clone();
    println!("\n== {} ==", assessment.title);
    println!(
        "{} questions | Max score: {}",
        assessment.questions.len(),
        assessment.max_score()
    );
    if let Some(name) = engine.instructor_name() {
        println!("Instructor: {}", name);
    }

    // 逐题作答，只接受该题真实存在的选项键
    for (idx, question) in assessment.questions.iter().enumerate() {
        println!("\nQ{}: {}", idx + 1, question.question);
        if question.marks_or_default() > 1 {
            println!("    ({} marks)", question.marks_or_default());
        }
        for (key, text) in &question.options {
            println!("    {}) {}", key.to_uppercase(), text);
        }
        loop {
            let choice = prompt("Your answer: ")?.to_lowercase();
            if question.options.contains_key(&choice) {
                engine.select_answer(idx, &choice);
                break;
            }
            println!("Please pick one of the listed options.");
        }
    }

    // 提交失败时表单重新开放，答案原样保留，可直接重试
    loop {
        match engine.submit(session).await {
            Ok(summary) => {
                print_summary(&summary);
                return Ok(());
            }
            Err(EngineError::Unanswered { index }) => {
                println!("Please answer all questions before submitting (Q{}).", index + 1);
                return Ok(());
            }
            Err(EngineError::AlreadySubmitted) => {
                println!("This attempt was already submitted.");
                return Ok(());
            }
            Err(err) => {
                println!("Failed to submit results: {}.", err);
                if !confirm("Try again? (y/n) ")? {
                    return Ok(());
                }
            }
        }
    }
}

fn print_summary(summary: &ScoreSummary) {
    let verdict = if summary.passed() { "PASS" } else { "FAIL" };
    println!(
        "\nYou scored {} out of {} ({}%) — {}",
        summary.score,
        summary.max_score,
        summary.percentage(),
        verdict
    );
    for (idx, outcome) in summary.breakdown.iter().enumerate() {
        let mark = if outcome.is_correct { "✓" } else { "✗" };
        println!(
            "  {} Q{}: chose {}, correct {} ({} marks)",
            mark,
            idx + 1,
            outcome.chosen.to_uppercase(),
            outcome.correct.to_uppercase(),
            outcome.marks
        );
    }
}

async fn my_results_screen(app: &App, session: &Session) -> Result<()> {
    if !enter(app, "/my-results") {
        return Ok(());
    }

    let snapshot = match app.progress.snapshot(false).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            println!("Failed to load results: {}. Please try again.", err);
            return Ok(());
        }
    };

    let (rows, stats) = student_results(&snapshot, &session.user_id);
    if rows.is_empty() {
        println!("No results yet — take an assessment first.");
        return Ok(());
    }

    println!("\n{:<30} {:>9} {:>6}", "ASSESSMENT", "SCORE", "%");
    for row in &rows {
        println!(
            "{:<30} {:>4} / {:<3} {:>5}%",
            row.assessment_title, row.score, row.max_score, row.percentage()
        );
    }
    println!(
        "\nAttempts: {} | Average: {}% | Highest: {}%",
        stats.total_attempts, stats.average_percentage, stats.highest_percentage
    );
    Ok(())
}

// ==================== 教师端 ====================

async fn instructor_menu(app: &App, session: &Session) -> Result<bool> {
    if !enter(app, "/instructor") {
        return Ok(false);
    }

    loop {
        println!("\n== Instructor dashboard ({}) ==", session.name);
        println!("  1) Browse courses");
        println!("  2) Create an assessment");
        println!("  3) Student progress");
        println!("  4) Delete an assessment");
        println!("  5) Delete a course");
        println!("  6) Delete my account");
        println!("  7) Log out");
        println!("  0) Quit");

        match prompt("> ")?.as_str() {
            "1" => courses_screen(app).await?,
            "2" => create_assessment_screen(app).await?,
            "3" => progress_screen(app, session).await?,
            "4" => delete_assessment_screen(app).await?,
            "5" => delete_course_screen(app).await?,
            "6" => {
                if delete_account_screen(app, session).await? {
                    return Ok(false);
                }
            }
            "7" => {
                app.auth.logout();
                return Ok(false);
            }
            "0" => return Ok(true),
            _ => println!("Unknown choice."),
        }
    }
}

async fn create_assessment_screen(app: &App) -> Result<()> {
    if !enter(app, "/instructor/create-assessment") {
        return Ok(());
    }

    println!("\n== Create new assessment ==");
    let course_id = prompt("Course id: ")?;
    let title = prompt("Title: ")?;

    let mut questions = Vec::new();
    loop {
        println!("\nQuestion {}:", questions.len() + 1);
        let text = prompt("Text: ")?;

        let mut options = std::collections::BTreeMap::new();
        for key in ["a", "b", "c", "d"] {
            let option = prompt(&format!("Option {} (empty to stop): ", key))?;
            if option.is_empty() {
                break;
            }
            options.insert(key.to_string(), option);
        }
        let answer = prompt("Correct option key: ")?.to_lowercase();
        let marks = prompt("Marks [1]: ")?.parse::<u32>().unwrap_or(1);

        questions.push(QuestionDraft {
            question: text,
            options,
            answer,
            marks,
        });

        if !confirm("Add another question? (y/n) ")? {
            break;
        }
    }

    let draft = AssessmentDraft {
        course_id,
        title,
        questions,
    };

    if let Err(message) = draft.validate() {
        println!("! {}", message);
        return Ok(());
    }

    println!("Total max score: {}", draft.max_score());
    if !confirm("Upload this assessment? (y/n) ")? {
        return Ok(());
    }

    match app.api.create_assessment(&draft).await {
        Ok(record) => println!("Assessment uploaded! (id {})", record.assessment_id),
        Err(err) => println!("Error posting assessment: {}.", err),
    }
    Ok(())
}

async fn progress_screen(app: &App, session: &Session) -> Result<()> {
    if !enter(app, "/instructor/progress") {
        return Ok(());
    }

    let snapshot = match app.progress.snapshot(false).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            println!("Failed to load student progress: {}. Please try again.", err);
            return Ok(());
        }
    };

    let rows = instructor_rows(&snapshot, &session.user_id);
    if rows.is_empty() {
        println!("No results recorded for your courses yet.");
        return Ok(());
    }

    let search = prompt("Search (student/course/assessment, empty for all): ")?;
    let filtered = filter_rows(&rows, None, None, &search);
    if filtered.is_empty() {
        println!("No rows match '{}'.", search);
        return Ok(());
    }

    println!(
        "\n{:<16} {:<20} {:<20} {:>9} {:>6}",
        "STUDENT", "COURSE", "ASSESSMENT", "SCORE", "%"
    );
    for row in &filtered {
        println!(
            "{:<16} {:<20} {:<20} {:>4} / {:<3} {:>5}%",
            row.student_name,
            row.course_title,
            row.assessment_title,
            row.score,
            row.max_score,
            row.percentage()
        );
    }
    Ok(())
}

async fn delete_assessment_screen(app: &App) -> Result<()> {
    let assessment_id = prompt("Assessment id to delete: ")?;
    if assessment_id.is_empty() {
        return Ok(());
    }
    if !confirm("This deletes the assessment and all of its results. Continue? (y/n) ")? {
        return Ok(());
    }

    match app.api.delete_assessment_cascade(&assessment_id).await {
        Ok(()) => {
            app.progress.invalidate();
            println!("Assessment deleted.");
        }
        Err(err) => println!("Failed to delete assessment: {}. Please try again.", err),
    }
    Ok(())
}

async fn delete_course_screen(app: &App) -> Result<()> {
    let course_id = prompt("Course id to delete: ")?;
    if course_id.is_empty() {
        return Ok(());
    }
    if !confirm("This deletes the course, its assessments and their results. Continue? (y/n) ")? {
        return Ok(());
    }

    match app.api.delete_course_cascade(&course_id).await {
        Ok(()) => {
            app.progress.invalidate();
            println!("Course deleted.");
        }
        Err(err) => println!("Failed to delete course: {}. Please try again.", err),
    }
    Ok(())
}

/// 返回 true 表示账号已注销、需要回到登录页
async fn delete_account_screen(app: &App, session: &Session) -> Result<bool> {
    if !confirm("Really delete your account and ALL your courses? (y/n) ")? {
        return Ok(false);
    }

    match app.api.delete_instructor_account(&session.user_id).await {
        Ok(()) => {
            println!("Account deleted. Goodbye.");
            app.auth.logout();
            Ok(true)
        }
        Err(err) => {
            println!("Failed to delete account: {}. Please try again.", err);
            Ok(false)
        }
    }
}
