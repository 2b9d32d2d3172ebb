use ndarray::ArrayView1;
use serde::Serialize;

use crate::error::{MatchError, Result};
use crate::gallery::GalleryIndex;

/// 一次查询的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// 匹配到的图库标识符
    pub identifier: String,
    /// 在图库中的位置
    pub position: usize,
    /// 欧氏距离的平方
    pub distance: f32,
}

/// 计算两个向量欧氏距离的平方
///
/// 调用者需要保证两者长度相同，多余的维度会被忽略。
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b) {
        let d = x - y;
        sum += d * d;
    }
    sum
}

fn row_distance(query: &[f32], row: ArrayView1<'_, f32>) -> f32 {
    match row.as_slice() {
        Some(row) => squared_l2(query, row),
        None => query.iter().zip(row.iter()).map(|(x, y)| (x - y) * (x - y)).sum(),
    }
}

fn check_query(query: &[f32], gallery: &GalleryIndex) -> Result<()> {
    let Some(dim) = gallery.dim() else {
        return Err(MatchError::EmptyGallery);
    };
    if query.len() != dim {
        return Err(MatchError::DimensionMismatch { expected: dim, actual: query.len() });
    }
    if let Some(i) = query.iter().position(|v| !v.is_finite()) {
        return Err(MatchError::InvalidEmbedding(format!("non-finite value at dimension {i}")));
    }
    Ok(())
}

fn result(gallery: &GalleryIndex, position: usize, distance: f32) -> QueryResult {
    QueryResult { identifier: gallery.identifiers()[position].clone(), position, distance }
}

/// 线性扫描整个图库，返回距离最近的一项
///
/// 只有距离严格更小时才会替换当前结果，因此距离相同的情况下位置靠前的胜出。
pub fn find_closest(query: &[f32], gallery: &GalleryIndex) -> Result<QueryResult> {
    check_query(query, gallery)?;

    let embeddings = gallery.embeddings();
    let mut rows = embeddings.rows().into_iter();
    // check_query 已经保证图库非空
    let Some(first) = rows.next() else {
        return Err(MatchError::EmptyGallery);
    };
    let (mut min_ind, mut min_dis) = (0, row_distance(query, first));
    for (i, row) in rows.enumerate() {
        let dis = row_distance(query, row);
        if dis < min_dis {
            min_dis = dis;
            min_ind = i + 1;
        }
    }

    Ok(result(gallery, min_ind, min_dis))
}

/// 按距离从小到大返回最近的 k 项，距离相同时按位置排序
pub fn rank(query: &[f32], gallery: &GalleryIndex, k: usize) -> Result<Vec<QueryResult>> {
    check_query(query, gallery)?;

    let mut scored = gallery
        .embeddings()
        .rows()
        .into_iter()
        .map(|row| row_distance(query, row))
        .enumerate()
        .collect::<Vec<_>>();
    // 稳定排序，保证相同距离时位置靠前的在前
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    scored.truncate(k);

    Ok(scored.into_iter().map(|(i, d)| result(gallery, i, d)).collect())
}
