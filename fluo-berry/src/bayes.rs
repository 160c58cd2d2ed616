//! 贝叶斯阈值标定: 训练器从标注对中估计分割阈值, 测试器对阈值做
//! 像素级评估.
//!
//! 训练器把像素按真值掩码分进两个强度池, 对两池做直方图密度估计,
//! 以池的规模为先验, 取两条加权密度最接近的那个 bin 作为建议阈值.

use crate::consts::{DEFAULT_WHITE_POINT, HIST_BINS};
use crate::params::{Params, TestMethod};
use crate::pipeline::normalize_plane;
use crate::scan::FluorScan;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::{ArrayView2, Zip};
use std::fmt;
use std::io::{self, Read, Write};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;

        /// 多线程直方图的分块大小.
        const POOL_CHUNK: usize = 1 << 16;
    }
}

/// 标定统计量无法计算.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalcError {
    /// 训练池为空, 没有可估计的密度.
    EmptyPool,

    /// 统计量的分母为零.
    ZeroDenominator,
}

impl fmt::Display for CalcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPool => f.write_str("a training pool is empty"),
            Self::ZeroDenominator => f.write_str("a statistic denominator is zero"),
        }
    }
}

impl std::error::Error for CalcError {}

/// 训练池的压缩存档, 让跨次标定不必重读整套数据集.
#[derive(Clone, Debug)]
pub struct CompactPools {
    blob: Vec<u8>,
}

impl CompactPools {
    /// 获取存档字节, 供写入磁盘.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    /// 从磁盘字节恢复存档.
    #[inline]
    pub fn from_bytes(blob: Vec<u8>) -> Self {
        Self { blob }
    }
}

/// 阈值训练器.
pub struct ThresholdTrainer {
    normalization: bool,
    percentile: f64,
    truth_intensity: u8,
    true_pool: Vec<f32>,
    false_pool: Vec<f32>,
}

impl ThresholdTrainer {
    /// 从配置构造空池训练器.
    pub fn new(params: &Params) -> Self {
        Self {
            normalization: params.normalization,
            percentile: params.normalization_percentile,
            truth_intensity: params.truth_intensity,
            true_pool: Vec::new(),
            false_pool: Vec::new(),
        }
    }

    /// 吸收一对标注样本.
    ///
    /// 真值等于标注强度的像素进真池, 真值为零的像素进假池, 其余像素
    /// 不参与训练. 扫描像素必须已就绪且与真值同形, 否则程序 panic.
    pub fn update(&mut self, scan: &FluorScan, truth: ArrayView2<'_, u8>) {
        let raw = match scan.array() {
            Some(view) => view,
            None => panic!("pixels of `{}` are not materialized", scan.name()),
        };
        assert_eq!(raw.dim(), truth.dim(), "scan and truth shapes differ");

        let plane = if self.normalization {
            normalize_plane(raw, scan.white_point(), self.percentile)
        } else {
            raw.to_owned()
        };

        let fg = self.truth_intensity;
        let (true_pool, false_pool) = (&mut self.true_pool, &mut self.false_pool);
        Zip::from(&plane).and(&truth).for_each(|&v, &t| {
            if t == fg {
                true_pool.push(v);
            } else if t == 0 {
                false_pool.push(v);
            }
        });
    }

    /// 获取已吸收的 (真池, 假池) 样本数.
    #[inline]
    pub fn pool_sizes(&self) -> (usize, usize) {
        (self.true_pool.len(), self.false_pool.len())
    }

    /// 估计建议阈值, 即强度直方图的 bin 下标.
    ///
    /// 任一池为空时报 [`CalcError::EmptyPool`].
    pub fn train(&self) -> Result<usize, CalcError> {
        let true_density = density_of(&self.true_pool)?;
        let false_density = density_of(&self.false_pool)?;
        Ok(self.split_point(&true_density, &false_density))
    }

    /// [`train`](Self::train) 的多线程版本, 两个池的直方图并行累计.
    #[cfg(feature = "rayon")]
    pub fn train_mt(&self) -> Result<usize, CalcError> {
        let true_density = density_of_mt(&self.true_pool)?;
        let false_density = density_of_mt(&self.false_pool)?;
        Ok(self.split_point(&true_density, &false_density))
    }

    /// 把两个训练池压缩成存档.
    pub fn compress(&self) -> io::Result<CompactPools> {
        let plain = bincode::serialize(&(&self.true_pool, &self.false_pool))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain)?;
        Ok(CompactPools {
            blob: encoder.finish()?,
        })
    }

    /// 从存档恢复训练器, 训练参数重新取自配置.
    pub fn from_compact(pools: &CompactPools, params: &Params) -> io::Result<Self> {
        let mut plain = Vec::new();
        flate2::read::ZlibDecoder::new(pools.as_bytes()).read_to_end(&mut plain)?;
        let (true_pool, false_pool) = bincode::deserialize::<(Vec<f32>, Vec<f32>)>(&plain)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut trainer = Self::new(params);
        trainer.true_pool = true_pool;
        trainer.false_pool = false_pool;
        Ok(trainer)
    }

    /// 两条加权密度最接近处的 bin 下标, 并列取最小下标.
    fn split_point(&self, true_density: &[f64], false_density: &[f64]) -> usize {
        let total = (self.true_pool.len() + self.false_pool.len()) as f64;
        let p_true = self.true_pool.len() as f64 / total;
        let p_false = 1.0 - p_true;

        let mut best = f64::INFINITY;
        let mut best_bin = 0;
        for bin in 0..HIST_BINS {
            let gap = (true_density[bin] * p_true - false_density[bin] * p_false).abs();
            if gap < best {
                best = gap;
                best_bin = bin;
            }
        }
        best_bin
    }
}

/// 直方图的 bin 宽: 范围 `[0, 白点]` 均分 [`HIST_BINS`] 份.
fn bin_width() -> f64 {
    f64::from(DEFAULT_WHITE_POINT) / HIST_BINS as f64
}

fn bin_of(v: f32, width: f64) -> Option<usize> {
    if !(0.0..=DEFAULT_WHITE_POINT).contains(&v) {
        return None;
    }
    Some(((f64::from(v) / width) as usize).min(HIST_BINS - 1))
}

/// 池的直方图密度估计, 范围外的样本不参与.
fn density_of(pool: &[f32]) -> Result<Vec<f64>, CalcError> {
    let width = bin_width();
    let mut counts = vec![0u64; HIST_BINS];
    for &v in pool {
        if let Some(bin) = bin_of(v, width) {
            counts[bin] += 1;
        }
    }
    finish_density(counts, width)
}

#[cfg(feature = "rayon")]
fn density_of_mt(pool: &[f32]) -> Result<Vec<f64>, CalcError> {
    let width = bin_width();
    let counts = pool
        .par_chunks(POOL_CHUNK)
        .map(|chunk| {
            let mut local = vec![0u64; HIST_BINS];
            for &v in chunk {
                if let Some(bin) = bin_of(v, width) {
                    local[bin] += 1;
                }
            }
            local
        })
        .reduce(
            || vec![0u64; HIST_BINS],
            |mut acc, local| {
                for (a, l) in acc.iter_mut().zip(local) {
                    *a += l;
                }
                acc
            },
        );
    finish_density(counts, width)
}

fn finish_density(counts: Vec<u64>, width: f64) -> Result<Vec<f64>, CalcError> {
    let binned: u64 = counts.iter().sum();
    if binned == 0 {
        return Err(CalcError::EmptyPool);
    }
    let norm = binned as f64 * width;
    Ok(counts.into_iter().map(|c| c as f64 / norm).collect())
}

/// 阈值测试器: 逐像素累计混淆矩阵与荧光均值差.
pub struct ThresholdTester {
    method: TestMethod,
    truth_intensity: u8,
    tp: u64,
    fp: u64,
    tn: u64,
    fn_: u64,
    actual_sum: f64,
    predicted_sum: f64,
    pixels: u64,
    images: u64,
}

impl ThresholdTester {
    /// 从配置构造空测试器.
    pub fn new(params: &Params) -> Self {
        Self {
            method: params.testing_method,
            truth_intensity: params.truth_intensity,
            tp: 0,
            fp: 0,
            tn: 0,
            fn_: 0,
            actual_sum: 0.0,
            predicted_sum: 0.0,
            pixels: 0,
            images: 0,
        }
    }

    /// 获取测试口径.
    #[inline]
    pub fn method(&self) -> TestMethod {
        self.method
    }

    /// 吸收一幅预测掩码与它的真值.
    ///
    /// `predicted` 非零记预测前景; 真值等于标注强度记实际前景.
    /// 三者必须同形, 否则程序 panic.
    pub fn update(
        &mut self,
        predicted: ArrayView2<'_, u8>,
        truth: ArrayView2<'_, u8>,
        raw: ArrayView2<'_, f32>,
    ) {
        assert_eq!(predicted.dim(), truth.dim(), "mask shapes differ");
        assert_eq!(predicted.dim(), raw.dim(), "mask and scan shapes differ");

        let fg = self.truth_intensity;
        let mut actual = (0.0f64, 0u64);
        let mut guessed = (0.0f64, 0u64);
        Zip::from(&predicted).and(&truth).and(&raw).for_each(|&p, &t, &v| {
            let hit = p != 0;
            let real = t == fg;
            match (hit, real) {
                (true, true) => self.tp += 1,
                (true, false) => self.fp += 1,
                (false, true) => self.fn_ += 1,
                (false, false) => self.tn += 1,
            }
            if real {
                actual.0 += f64::from(v);
                actual.1 += 1;
            }
            if hit {
                guessed.0 += f64::from(v);
                guessed.1 += 1;
            }
        });

        // 空前景的图像对均值差贡献 0.
        if actual.1 > 0 {
            self.actual_sum += actual.0 / actual.1 as f64;
        }
        if guessed.1 > 0 {
            self.predicted_sum += guessed.0 / guessed.1 as f64;
        }
        self.pixels += predicted.len() as u64;
        self.images += 1;
    }

    /// 汇总成测试报告. 尚无样本或某个分母为零时报错.
    pub fn report(&self) -> Result<TestReport, CalcError> {
        if self.images == 0 || self.pixels == 0 {
            return Err(CalcError::ZeroDenominator);
        }
        let ratio = |num: u64, den: u64| -> Result<f64, CalcError> {
            if den == 0 {
                Err(CalcError::ZeroDenominator)
            } else {
                Ok(num as f64 / den as f64)
            }
        };

        let precision = ratio(self.tp, self.tp + self.fp)?;
        let sensitivity = ratio(self.tp, self.tp + self.fn_)?;
        if precision + sensitivity == 0.0 {
            return Err(CalcError::ZeroDenominator);
        }

        Ok(TestReport {
            precision,
            sensitivity,
            f1: 2.0 * precision * sensitivity / (precision + sensitivity),
            true_positive_rate: ratio(self.tp, self.tp + self.fn_)?,
            false_positive_rate: ratio(self.fp, self.fp + self.tn)?,
            true_negative_rate: ratio(self.tn, self.tn + self.fp)?,
            false_negative_rate: ratio(self.fn_, self.fn_ + self.tp)?,
            correct_pct: 100.0 * (self.tp + self.tn) as f64 / self.pixels as f64,
            incorrect_pct: 100.0 * (self.fp + self.fn_) as f64 / self.pixels as f64,
            mean_fluor_gap: (self.actual_sum - self.predicted_sum).abs() / self.images as f64,
            images: self.images,
            pixels: self.pixels,
        })
    }
}

/// 阈值在标注数据集上的像素级评估结果.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TestReport {
    /// 查准率 tp / (tp + fp).
    pub precision: f64,

    /// 查全率 tp / (tp + fn).
    pub sensitivity: f64,

    /// 查准与查全的调和平均.
    pub f1: f64,

    /// 真阳性率.
    pub true_positive_rate: f64,

    /// 假阳性率.
    pub false_positive_rate: f64,

    /// 真阴性率.
    pub true_negative_rate: f64,

    /// 假阴性率.
    pub false_negative_rate: f64,

    /// 判对像素占总像素的百分比.
    pub correct_pct: f64,

    /// 判错像素占总像素的百分比.
    pub incorrect_pct: f64,

    /// 实际前景与预测前景的平均荧光差 (按图像平均).
    pub mean_fluor_gap: f64,

    /// 参与评估的图像数.
    pub images: u64,

    /// 参与评估的像素数.
    pub pixels: u64,
}

impl TestReport {
    /// 把报告逐行写给人看.
    pub fn describe_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "Images evaluated: {}", self.images)?;
        writeln!(w, "Pixels evaluated: {}", self.pixels)?;
        writeln!(w, "Precision: {:.4}", self.precision)?;
        writeln!(w, "Sensitivity: {:.4}", self.sensitivity)?;
        writeln!(w, "F1 Score: {:.4}", self.f1)?;
        writeln!(w, "True Positive Rate: {:.4}", self.true_positive_rate)?;
        writeln!(w, "False Positive Rate: {:.4}", self.false_positive_rate)?;
        writeln!(w, "True Negative Rate: {:.4}", self.true_negative_rate)?;
        writeln!(w, "False Negative Rate: {:.4}", self.false_negative_rate)?;
        writeln!(w, "Correctly identified pixels: {:.2}%", self.correct_pct)?;
        writeln!(w, "Incorrectly identified pixels: {:.2}%", self.incorrect_pct)?;
        writeln!(
            w,
            "Mean difference in fluorescence (actual vs. predicted): {:.4}",
            self.mean_fluor_gap
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::mask::WHITE;
    use ndarray::{Array2, ArrayView};

    fn flat_params() -> Params {
        let mut p = Params::default();
        p.normalization = false;
        p
    }

    fn pooled_trainer() -> ThresholdTrainer {
        // 假池覆盖 0..=1000 的每个 bin, 真池覆盖 3000..=3500.
        let mut low: Vec<f32> = (0..=1000).map(|v| v as f32).collect();
        let mut high: Vec<f32> = (3000..=3500).map(|v| v as f32).collect();
        low.extend_from_slice(&[500.0; 32]);
        high.extend_from_slice(&[3200.0; 32]);

        let w = 1 + low.len() + high.len();
        let mut raw = vec![0.0f32; w];
        let mut truth = vec![128u8; w];
        for (i, &v) in low.iter().enumerate() {
            raw[i + 1] = v;
            truth[i + 1] = 0;
        }
        for (i, &v) in high.iter().enumerate() {
            raw[i + 1 + low.len()] = v;
            truth[i + 1 + low.len()] = WHITE;
        }

        let scan = FluorScan::from_array(
            "pair.czi",
            Array2::from_shape_vec((1, w), raw).unwrap(),
            3.45,
            4095.0,
        );
        let truth = Array2::from_shape_vec((1, w), truth).unwrap();

        let mut trainer = ThresholdTrainer::new(&flat_params());
        trainer.update(&scan, truth.view());
        trainer
    }

    #[test]
    fn test_trainer_pools_by_truth() {
        let trainer = pooled_trainer();
        let (t, f) = trainer.pool_sizes();
        // 第一个像素的真值是 128, 哪个池都不进.
        assert_eq!(t, 501 + 32);
        assert_eq!(f, 1001 + 32);
    }

    #[test]
    fn test_trainer_threshold_lands_between_pools() {
        let trainer = pooled_trainer();
        let suggested = trainer.train().unwrap();
        assert!(suggested > 1000, "suggested {suggested}");
        assert!(suggested < 3000, "suggested {suggested}");
        // 假池密度在 bin 1000 处用尽, 其后第一个双零 bin 胜出.
        assert_eq!(suggested, 1001);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_train_mt_agrees_with_train() {
        let trainer = pooled_trainer();
        assert_eq!(trainer.train_mt(), trainer.train());
    }

    #[test]
    fn test_trainer_rejects_empty_pool() {
        let trainer = ThresholdTrainer::new(&flat_params());
        assert_eq!(trainer.train(), Err(CalcError::EmptyPool));

        let mut trainer = ThresholdTrainer::new(&flat_params());
        let scan = FluorScan::from_array(
            "onesided.czi",
            Array2::from_elem((2, 2), 9.0f32),
            3.45,
            4095.0,
        );
        let truth = Array2::from_elem((2, 2), WHITE);
        trainer.update(&scan, truth.view());
        assert_eq!(trainer.train(), Err(CalcError::EmptyPool));
    }

    #[test]
    fn test_compact_pools_round_trip() {
        let trainer = pooled_trainer();
        let packed = trainer.compress().unwrap();
        let restored =
            ThresholdTrainer::from_compact(&packed, &flat_params()).unwrap();

        assert_eq!(restored.pool_sizes(), trainer.pool_sizes());
        assert_eq!(restored.train(), trainer.train());
    }

    #[test]
    fn test_tester_perfect_prediction() {
        let mut tester = ThresholdTester::new(&Params::default());
        let truth = Array2::from_shape_fn((8, 8), |(y, _)| if y < 4 { WHITE } else { 0 });
        let raw = Array2::from_shape_fn((8, 8), |(y, _)| if y < 4 { 3000.0f32 } else { 100.0 });

        tester.update(truth.view(), truth.view(), raw.view());
        tester.update(truth.view(), truth.view(), raw.view());

        let report = tester.report().unwrap();
        assert_eq!(report.precision, 1.0);
        assert_eq!(report.sensitivity, 1.0);
        assert_eq!(report.f1, 1.0);
        assert_eq!(report.false_positive_rate, 0.0);
        assert_eq!(report.correct_pct, 100.0);
        assert_eq!(report.incorrect_pct, 0.0);
        assert_eq!(report.mean_fluor_gap, 0.0);
        assert_eq!(report.images, 2);
        assert_eq!(report.pixels, 128);
    }

    #[test]
    fn test_tester_mixed_prediction() {
        let mut tester = ThresholdTester::new(&Params::default());
        let truth_store = [WHITE, WHITE, 0, 0];
        let truth = ArrayView::from_shape((2, 2), &truth_store).unwrap();
        let predicted_store = [WHITE, 0, WHITE, 0];
        let predicted = ArrayView::from_shape((2, 2), &predicted_store).unwrap();
        let raw_store = [8.0f32, 6.0, 4.0, 2.0];
        let raw = ArrayView::from_shape((2, 2), &raw_store).unwrap();

        tester.update(predicted, truth, raw);
        let report = tester.report().unwrap();

        assert_eq!(report.precision, 0.5);
        assert_eq!(report.sensitivity, 0.5);
        assert_eq!(report.f1, 0.5);
        assert_eq!(report.false_positive_rate, 0.5);
        assert_eq!(report.true_negative_rate, 0.5);
        assert_eq!(report.false_negative_rate, 0.5);
        assert_eq!(report.correct_pct, 50.0);
        assert_eq!(report.incorrect_pct, 50.0);
        // 实际前景均值 7, 预测前景均值 6.
        assert_eq!(report.mean_fluor_gap, 1.0);
    }

    #[test]
    fn test_tester_without_samples_errors() {
        let tester = ThresholdTester::new(&Params::default());
        assert_eq!(tester.report(), Err(CalcError::ZeroDenominator));
    }

    #[test]
    fn test_report_describes_every_metric() {
        let mut tester = ThresholdTester::new(&Params::default());
        let mut truth = Array2::from_elem((2, 2), WHITE);
        truth[(1, 1)] = 0;
        let mut predicted = truth.clone();
        predicted[(1, 0)] = 0;
        let raw = Array2::from_elem((2, 2), 10.0f32);
        tester.update(predicted.view(), truth.view(), raw.view());

        let mut out = Vec::new();
        tester.report().unwrap().describe_into(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Precision: 1.0000"));
        assert!(text.contains("Sensitivity: 0.6667"));
        assert!(text.contains("Correctly identified pixels: 75.00%"));
        assert!(text.contains("Mean difference in fluorescence"));
    }
}
