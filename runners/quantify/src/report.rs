//! 运行结果落盘: csv 行与 ROI 叠加图.

use fluo_berry::prelude::*;
use image::GrayImage;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// 行式结果记录. 每次运行在输出目录下新建一个带时间戳的 csv.
pub struct RowWriter {
    out: BufWriter<File>,
    path: PathBuf,
}

impl RowWriter {
    /// 创建 `run-{unix 秒}.csv` 并写入表头.
    pub fn create(dir: &Path) -> io::Result<Self> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let path = dir.join(format!("run-{stamp}.csv"));
        let mut out = BufWriter::new(File::create(&path)?);
        writeln!(out, "file,center_y,center_x,radius,mean_fluorescence")?;
        Ok(Self { out, path })
    }

    /// 追加一行测量结果.
    pub fn write_row(&mut self, scan: &FluorScan, result: &ProcessingResult) -> io::Result<()> {
        let (cy, cx) = result.circle.center;
        writeln!(
            self.out,
            "{},{:.3},{:.3},{:.3},{:.3}",
            scan.name(),
            cy,
            cx,
            result.circle.radius,
            result.mean_fluorescence
        )
    }

    /// 刷新缓冲.
    #[inline]
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// csv 落盘路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// ROI 叠加图落盘, 文件按扫描词干命名为 `{词干}_roi.png`.
pub struct OverlayWriter {
    dir: PathBuf,
}

impl OverlayWriter {
    /// 绑定输出目录.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// 将扫描平面缩放到 8 位并烧入拟合圆的边界, 落盘为灰度 png.
    pub fn write_roi(&self, scan: &FluorScan, result: &ProcessingResult) -> io::Result<()> {
        let plane = overlay_u8(result.writeable.view(), result.circle, scan.white_point());
        let (h, w) = plane.dim();
        let buf = GrayImage::from_raw(w as u32, h as u32, plane.into_raw_vec()).ok_or_else(
            || io::Error::new(io::ErrorKind::InvalidData, "overlay buffer size mismatch"),
        )?;
        let stem = scan
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scan".to_owned());
        buf.save(self.dir.join(format!("{stem}_roi.png")))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}
