use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use serde::Serialize;
use utoipa::ToSchema;

/// 匹配请求参数
#[derive(TryFromMultipart)]
pub struct MatchRequest {
    pub file: Vec<Bytes>,
    pub count: Option<usize>,
}

/// 匹配表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct MatchForm {
    /// 上传的查询图片，可以是多张图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 每张图片返回的结果数量
    pub count: Option<usize>,
}

/// 单个匹配结果
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchItem {
    /// 图库图片标识符
    pub identifier: String,
    /// 在图库中的位置
    pub position: usize,
    /// 欧氏距离的平方
    pub distance: f32,
}

/// 匹配响应
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchResponse {
    /// 匹配耗时，单位为毫秒
    pub time: u64,
    /// 每张图片的匹配结果，按距离从小到大排列
    pub result: Vec<Vec<MatchItem>>,
}

/// 图库信息
#[derive(Debug, Serialize, ToSchema)]
pub struct GalleryResponse {
    /// 图库指纹
    pub fingerprint: String,
    /// 特征维度，图库为空时为 null
    pub dim: Option<usize>,
    /// 按位置排列的图片标识符
    pub identifiers: Vec<String>,
}
