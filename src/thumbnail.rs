use anyhow::{Result, ensure};
use opencv::core::{Mat, Size};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};

use crate::embedding::{Embedding, EmbeddingProvider};

/// torchvision 的 ImageNet 归一化参数，RGB 顺序
const NORM_MEAN_RGB: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_STD_RGB: [f32; 3] = [0.229, 0.224, 0.225];

/// 缩略图特征：把图片缩放到固定尺寸后归一化展开
///
/// 不依赖任何模型，适合在没有预计算特征时做近似重复帧的匹配。
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailEmbedder {
    pub width: i32,
    pub height: i32,
}

impl Default for ThumbnailEmbedder {
    fn default() -> Self {
        Self { width: 32, height: 24 }
    }
}

impl ThumbnailEmbedder {
    pub fn new((width, height): (i32, i32)) -> Self {
        Self { width, height }
    }
}

impl EmbeddingProvider for ThumbnailEmbedder {
    fn embed(&self, image: &[u8]) -> Result<Embedding> {
        let buf = Mat::from_slice(image)?;
        let img = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)?;
        ensure!(!img.empty(), "无法解码图片");

        let mut output = Mat::default();
        imgproc::resize(
            &img,
            &mut output,
            Size::new(self.width, self.height),
            0.,
            0.,
            imgproc::InterpolationFlags::INTER_AREA as i32,
        )?;

        let pixels = self.width as usize * self.height as usize;
        let data = output.data_bytes()?;
        ensure!(data.len() == pixels * 3, "unexpected image layout");

        let mut embedding = Vec::with_capacity(pixels * 3);
        // OpenCV 解码得到的是 BGR，按 RGB 通道顺序展开
        for (c, bgr) in [2, 1, 0].into_iter().enumerate() {
            embedding.extend(
                data.chunks_exact(3)
                    .map(|px| (px[bgr] as f32 / 255. - NORM_MEAN_RGB[c]) / NORM_STD_RGB[c]),
            );
        }
        Ok(embedding)
    }
}
