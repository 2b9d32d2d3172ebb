use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use ndarray::ArrayD;
use ndarray_npy::{ReadNpyError, ReadNpyExt};

/// 一张图片的特征向量
pub type Embedding = Vec<f32>;

/// 特征提取模型
///
/// 对同一张图片多次调用 `embed` 必须得到相同的结果，并且输出长度固定，
/// 否则缓存的特征将失去意义。
pub trait EmbeddingProvider: Send + Sync {
    /// 读取标识符对应的图片原始数据，默认将标识符视为文件路径
    fn load(&self, identifier: &str) -> Result<Vec<u8>> {
        std::fs::read(identifier).with_context(|| format!("无法读取图片: {identifier}"))
    }

    /// 计算图片的特征向量
    fn embed(&self, image: &[u8]) -> Result<Embedding>;
}

impl<F> EmbeddingProvider for F
where
    F: Fn(&[u8]) -> Result<Embedding> + Send + Sync,
{
    fn embed(&self, image: &[u8]) -> Result<Embedding> {
        self(image)
    }
}

/// 检查特征向量是否非空且只包含有限值
pub fn validate(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        bail!("embedding is empty");
    }
    if let Some(i) = embedding.iter().position(|v| !v.is_finite()) {
        bail!("embedding contains non-finite value at dimension {i}");
    }
    Ok(())
}

/// 查找图片对应的预计算特征文件
///
/// `frame.jpg` 依次尝试 `frame.jpg.<ext>` 和 `frame.<ext>`，
/// 已经以 `.<ext>` 结尾的标识符直接使用。
fn sidecar(identifier: &str, ext: &str) -> PathBuf {
    let path = Path::new(identifier);
    if path.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext)) {
        return path.to_path_buf();
    }
    let appended = PathBuf::from(format!("{identifier}.{ext}"));
    if appended.exists() {
        return appended;
    }
    path.with_extension(ext)
}

/// 从 `.npy` 文件中读取预计算的特征向量
///
/// 文件内容必须是一维数组，或者只有一行的二维数组，元素类型为 f32 或 f64。
#[derive(Debug, Default, Clone, Copy)]
pub struct NpyEmbedder;

impl EmbeddingProvider for NpyEmbedder {
    fn load(&self, identifier: &str) -> Result<Vec<u8>> {
        let path = sidecar(identifier, "npy");
        std::fs::read(&path).with_context(|| format!("无法读取特征文件: {}", path.display()))
    }

    fn embed(&self, image: &[u8]) -> Result<Embedding> {
        // 只有元素类型不是 f32 时才尝试 f64，其余错误直接返回
        let array = match ArrayD::<f32>::read_npy(Cursor::new(image)) {
            Ok(array) => array,
            Err(ReadNpyError::WrongDescriptor(_)) => ArrayD::<f64>::read_npy(Cursor::new(image))
                .context("npy 数据既不是 f32 也不是 f64 数组")?
                .mapv(|v| v as f32),
            Err(e) => return Err(e).context("无法解析 npy 数据"),
        };
        match array.shape() {
            [_] => {}
            [1, _] => {}
            shape => return Err(anyhow!("unsupported npy shape: {:?}", shape)),
        }
        Ok(array.iter().copied().collect())
    }
}

/// 从 JSON 数组中读取预计算的特征向量
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEmbedder;

impl EmbeddingProvider for JsonEmbedder {
    fn load(&self, identifier: &str) -> Result<Vec<u8>> {
        let path = sidecar(identifier, "json");
        std::fs::read(&path).with_context(|| format!("无法读取特征文件: {}", path.display()))
    }

    fn embed(&self, image: &[u8]) -> Result<Embedding> {
        Ok(serde_json::from_slice(image)?)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array2, array};
    use ndarray_npy::WriteNpyExt;

    use super::*;

    fn npy_bytes<T: WriteNpyExt>(array: &T) -> Vec<u8> {
        let mut buf = vec![];
        array.write_npy(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_npy_1d() {
        let data = npy_bytes(&Array1::from(vec![1.0f32, 2.0, 3.0]));
        assert_eq!(NpyEmbedder.embed(&data).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_npy_single_row_f64() {
        let data = npy_bytes(&array![[0.5f64, -1.5]]);
        assert_eq!(NpyEmbedder.embed(&data).unwrap(), vec![0.5, -1.5]);
    }

    #[test]
    fn test_npy_rejects_matrix() {
        let data = npy_bytes(&Array2::<f32>::zeros((2, 3)));
        assert!(NpyEmbedder.embed(&data).is_err());
    }

    #[test]
    fn test_json_embed() {
        assert_eq!(JsonEmbedder.embed(b"[0.25, 4]").unwrap(), vec![0.25, 4.0]);
        assert!(JsonEmbedder.embed(b"{}").is_err());
    }

    #[test]
    fn test_npy_truncated_keeps_error() {
        let mut data = npy_bytes(&Array1::from(vec![1.0f32, 2.0, 3.0]));
        data.truncate(data.len() - 2);
        let err = NpyEmbedder.embed(&data).unwrap_err();
        let cause = err.downcast_ref::<ReadNpyError>().unwrap();
        assert!(!matches!(cause, ReadNpyError::WrongDescriptor(_)));
    }

    #[test]
    fn test_npy_rejects_integer() {
        let data = npy_bytes(&Array1::from(vec![1i32, 2]));
        let err = NpyEmbedder.embed(&data).unwrap_err();
        let cause = err.downcast_ref::<ReadNpyError>();
        assert!(matches!(cause, Some(ReadNpyError::WrongDescriptor(_))));
    }

    #[test]
    fn test_sidecar_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("frame.jpg");
        let image = image.to_str().unwrap();

        // 两种命名都不存在时，退回到替换扩展名
        assert_eq!(sidecar(image, "npy"), dir.path().join("frame.npy"));

        std::fs::write(format!("{image}.npy"), b"").unwrap();
        assert_eq!(sidecar(image, "npy"), dir.path().join("frame.jpg.npy"));

        let npy = dir.path().join("x.NPY");
        assert_eq!(sidecar(npy.to_str().unwrap(), "npy"), npy);
    }

    #[test]
    fn test_validate() {
        assert!(validate(&[1.0, 2.0]).is_ok());
        assert!(validate(&[]).is_err());
        assert!(validate(&[1.0, f32::NAN]).is_err());
        assert!(validate(&[f32::INFINITY]).is_err());
    }

    #[test]
    fn test_closure_provider() {
        let provider = |image: &[u8]| -> Result<Embedding> { Ok(vec![image.len() as f32]) };
        assert_eq!(provider.embed(b"abc").unwrap(), vec![3.0]);
    }
}
