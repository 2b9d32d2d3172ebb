use std::sync::Arc;

use crate::MatchSession;

/// 应用状态
pub struct AppState {
    /// 图库已经构建好的匹配会话，只读
    pub session: MatchSession,
    /// 默认返回的结果数量
    pub count: usize,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(session: MatchSession, count: usize, token: String) -> Arc<Self> {
        Arc::new(AppState { session, count, token })
    }
}
