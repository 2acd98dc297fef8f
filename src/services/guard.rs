// 访问守卫模块
// 根据会话状态与每个页面声明的角色集合，决定渲染、跳登录页还是软跳转
// 守卫只做判定，从不修改会话

use crate::models::{AuthState, Role};

/// 页面的访问声明
/// allowed_roles 为空表示任何已登录用户都可进入
pub struct ScreenSpec {
    pub pattern: &'static str,
    pub public: bool,
    pub allowed_roles: &'static [Role],
}

/// 路由表，与页面注册保持一致
pub const SCREENS: &[ScreenSpec] = &[
    ScreenSpec {
        pattern: "/",
        public: true,
        allowed_roles: &[],
    },
    ScreenSpec {
        pattern: "/login",
        public: true,
        allowed_roles: &[],
    },
    ScreenSpec {
        pattern: "/register",
        public: true,
        allowed_roles: &[],
    },
    ScreenSpec {
        pattern: "/dashboard",
        public: false,
        allowed_roles: &[],
    },
    ScreenSpec {
        pattern: "/courses",
        public: false,
        allowed_roles: &[],
    },
    ScreenSpec {
        pattern: "/courses/:id",
        public: false,
        allowed_roles: &[],
    },
    ScreenSpec {
        pattern: "/profile",
        public: false,
        allowed_roles: &[],
    },
    ScreenSpec {
        pattern: "/assessment/:id",
        public: false,
        allowed_roles: &[Role::Student],
    },
    ScreenSpec {
        pattern: "/results",
        public: false,
        allowed_roles: &[Role::Student],
    },
    ScreenSpec {
        pattern: "/my-results",
        public: false,
        allowed_roles: &[Role::Student],
    },
    ScreenSpec {
        pattern: "/instructor",
        public: false,
        allowed_roles: &[Role::Instructor],
    },
    ScreenSpec {
        pattern: "/instructor/create-assessment",
        public: false,
        allowed_roles: &[Role::Instructor],
    },
    ScreenSpec {
        pattern: "/instructor/progress",
        public: false,
        allowed_roles: &[Role::Instructor],
    },
];

/// 守卫的判定结果
#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    /// 会话状态未决，先什么都不渲染，避免错误内容闪现
    Wait,
    Render,
    /// 未登录：跳转登录页并携带原始路径，登录后可以回来
    RedirectToLogin { from: String },
    /// 已登录但角色不符：软跳转到该角色的默认落地页，不是错误页
    Redirect { to: String },
}

/// 路径段匹配，":" 开头的段匹配任意非空参数
fn matches_pattern(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    if pattern_segments.len() != path_segments.len() {
        return false;
    }

    pattern_segments
        .iter()
        .zip(path_segments.iter())
        .all(|(pattern_seg, path_seg)| {
            (pattern_seg.starts_with(':') && !path_seg.is_empty()) || pattern_seg == path_seg
        })
}

pub fn find_screen(path: &str) -> Option<&'static ScreenSpec> {
    SCREENS.iter().find(|s| matches_pattern(s.pattern, path))
}

/// 对一个声明了 allowed_roles 的页面做判定
pub fn evaluate(auth: &AuthState, allowed_roles: &[Role], requested_path: &str) -> AccessDecision {
    let session = match auth {
        AuthState::Checking => return AccessDecision::Wait,
        AuthState::Unauthenticated => {
            return AccessDecision::RedirectToLogin {
                from: requested_path.to_string(),
            }
        }
        AuthState::Authenticated(session) => session,
    };

    if allowed_roles.is_empty() || allowed_roles.contains(&session.role) {
        AccessDecision::Render
    } else {
        AccessDecision::Redirect {
            to: session.role.landing_path().to_string(),
        }
    }
}

/// 按路由表判定一个请求路径
pub fn decide(auth: &AuthState, path: &str) -> AccessDecision {
    match find_screen(path) {
        Some(screen) if screen.public => AccessDecision::Render,
        Some(screen) => evaluate(auth, screen.allowed_roles, path),
        // 未注册的路径一律按需要登录处理
        None => evaluate(auth, &[], path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Session;

    fn session(role: Role) -> AuthState {
        AuthState::Authenticated(Session {
            user_id: "7".to_string(),
            name: "Ada".to_string(),
            role,
            token: "tok".to_string(),
        })
    }

    #[test]
    fn test_checking_renders_nothing() {
        assert_eq!(decide(&AuthState::Checking, "/dashboard"), AccessDecision::Wait);
    }

    #[test]
    fn test_no_session_redirects_to_login_with_origin() {
        let decision = decide(&AuthState::Unauthenticated, "/courses/42");
        assert_eq!(
            decision,
            AccessDecision::RedirectToLogin {
                from: "/courses/42".to_string()
            }
        );
    }

    #[test]
    fn test_public_screens_skip_the_guard() {
        assert_eq!(decide(&AuthState::Unauthenticated, "/"), AccessDecision::Render);
        assert_eq!(decide(&AuthState::Unauthenticated, "/login"), AccessDecision::Render);
    }

    #[test]
    fn test_any_authenticated_role_enters_unrestricted_screens() {
        assert_eq!(decide(&session(Role::Student), "/dashboard"), AccessDecision::Render);
        assert_eq!(decide(&session(Role::Instructor), "/courses/9"), AccessDecision::Render);
    }

    #[test]
    fn test_student_on_instructor_screen_soft_redirects() {
        // 跳到学生自己的落地页，而不是错误页或登录页
        let decision = decide(&session(Role::Student), "/instructor/progress");
        assert_eq!(
            decision,
            AccessDecision::Redirect {
                to: "/dashboard".to_string()
            }
        );
    }

    #[test]
    fn test_instructor_on_student_screen_lands_on_instructor_dashboard() {
        let decision = decide(&session(Role::Instructor), "/assessment/42");
        assert_eq!(
            decision,
            AccessDecision::Redirect {
                to: "/instructor".to_string()
            }
        );
    }

    #[test]
    fn test_matching_role_renders() {
        assert_eq!(decide(&session(Role::Student), "/assessment/42"), AccessDecision::Render);
        assert_eq!(decide(&session(Role::Instructor), "/instructor"), AccessDecision::Render);
    }

    #[test]
    fn test_unknown_path_requires_authentication() {
        assert!(matches!(
            decide(&AuthState::Unauthenticated, "/nope"),
            AccessDecision::RedirectToLogin { .. }
        ));
        assert_eq!(decide(&session(Role::Student), "/nope"), AccessDecision::Render);
    }

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("/courses/:id", "/courses/42"));
        assert!(!matches_pattern("/courses/:id", "/courses"));
        assert!(!matches_pattern("/courses", "/courses/42"));
        assert!(matches_pattern("/", "/"));
    }
}
