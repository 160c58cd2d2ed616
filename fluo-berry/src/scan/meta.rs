//! 内嵌元数据刮取与像素平面整形.
//!
//! 显微镜容器格式把标定信息存在一段 XML 文档里. 这里只做标签级别的文本
//! 扫描, 不解析文档结构: 需要的两个字段在真实导出文件中都是唯一的叶子标签.

use ndarray::{Array2, ArrayD, Axis, Ix2};

/// 从容器 XML 刮出的标定元数据.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct EmbeddedMeta {
    /// 每像素的物理尺寸 (微米).
    pub scaling: f64,

    /// 相机像素饱和值.
    pub white_point: f32,
}

/// 查找首个 `<name ...>text</name>` 的文本内容.
///
/// 标签名之后必须紧跟 `>` 或空白, 因此 `ImagePixelSize` 不会误中
/// `ImagePixelSizeX` 之类的长名标签.
fn field_text<'a>(doc: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let mut from = 0;
    while let Some(pos) = doc[from..].find(&open) {
        let at = from + pos + open.len();
        match doc[at..].chars().next() {
            Some('>') => {
                let beg = at + 1;
                let end = doc[beg..].find(&close)? + beg;
                return Some(&doc[beg..end]);
            }
            Some(c) if c.is_ascii_whitespace() => {
                let beg = doc[at..].find('>')? + at + 1;
                let end = doc[beg..].find(&close)? + beg;
                return Some(&doc[beg..end]);
            }
            _ => from = at,
        }
    }
    None
}

/// 刮取标定元数据. 任一字段缺失或无法解析时返回 `None`.
///
/// `ImagePixelSize` 的文本是逗号分隔的数值元组, 只取第一个分量;
/// `CameraPixelMaximum` 是单个整数.
pub(crate) fn scrape_embedded(doc: &str) -> Option<EmbeddedMeta> {
    let scaling = field_text(doc, "ImagePixelSize")?
        .split(',')
        .next()?
        .trim()
        .parse::<f64>()
        .ok()?;
    let white_point = field_text(doc, "CameraPixelMaximum")?
        .trim()
        .parse::<u32>()
        .ok()? as f32;
    Some(EmbeddedMeta {
        scaling,
        white_point,
    })
}

/// 把解码出的 N 维像素数组压缩为二维强度平面.
///
/// 容器解码器常带出长度为 1 的场景轴与通道轴, 逐个去掉;
/// 存在长度大于 1 的多余轴, 或维数不足 2 时返回 `None`.
pub(crate) fn reduce_to_plane(mut raw: ArrayD<f32>) -> Option<Array2<f32>> {
    while raw.ndim() > 2 {
        let unit = (0..raw.ndim()).find(|&ax| raw.len_of(Axis(ax)) == 1)?;
        raw = raw.remove_axis(Axis(unit));
    }
    raw.into_dimensionality::<Ix2>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    const DOC: &str = "<Metadata>\
        <ImagePixelSizeX>9.9</ImagePixelSizeX>\
        <ImagePixelSize Unit=\"um\">3.45,3.45</ImagePixelSize>\
        <CameraPixelMaximum>4095</CameraPixelMaximum>\
        </Metadata>";

    #[test]
    fn test_field_text_skips_longer_tag_names() {
        assert_eq!(field_text(DOC, "ImagePixelSize"), Some("3.45,3.45"));
        assert_eq!(field_text(DOC, "ImagePixelSizeX"), Some("9.9"));
    }

    #[test]
    fn test_scrape_embedded() {
        let meta = scrape_embedded(DOC).unwrap();
        assert_eq!(meta.scaling, 3.45);
        assert_eq!(meta.white_point, 4095.0);
    }

    #[test]
    fn test_scrape_rejects_missing_field() {
        assert!(scrape_embedded("<Metadata><ImagePixelSize>1.0</ImagePixelSize></Metadata>").is_none());
        assert!(scrape_embedded("").is_none());
    }

    #[test]
    fn test_scrape_rejects_garbage_number() {
        let doc = "<ImagePixelSize>um,um</ImagePixelSize>\
                   <CameraPixelMaximum>4095</CameraPixelMaximum>";
        assert!(scrape_embedded(doc).is_none());
    }

    #[test]
    fn test_reduce_drops_unit_axes() {
        let raw = ArrayD::<f32>::zeros(vec![1, 4, 6, 1]);
        let plane = reduce_to_plane(raw).unwrap();
        assert_eq!(plane.dim(), (4, 6));
    }

    #[test]
    fn test_reduce_keeps_bare_plane() {
        let raw = ArrayD::<f32>::zeros(vec![4, 6]);
        assert_eq!(reduce_to_plane(raw).unwrap().dim(), (4, 6));
    }

    #[test]
    fn test_reduce_rejects_wide_axis() {
        let raw = ArrayD::<f32>::zeros(vec![3, 4, 6]);
        assert!(reduce_to_plane(raw).is_none());

        let raw = ArrayD::<f32>::zeros(vec![6]);
        assert!(reduce_to_plane(raw).is_none());
    }
}
