#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供荧光显微图像的结构化信息, 稳定性感知摄取与圆形 ROI 定量算法.
//!
//! 该 crate 目前仅提供 `safe` 接口. 将来可能为部分高性能场景关键路径提供 `unsafe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 目前主要面向 16-bit 灰度荧光图像 (可带嵌入式 XML 元数据),
//!   没有对其它源的数据进行直接适配 (但如果新数据按照同样模式组织, 也可以工作).
//! 2. 在非期望情况下, 程序会直接 panic, 而不会导致内存错误. As what Rust promises.
//!
//! # 开发计划
//!
//! ### 文件稳定性轮询与摄取队列 ✅
//!
//! 采集软件写盘期间文件尺寸持续变化. 在连续若干次观测到同一非零尺寸之前,
//! 不将文件视为就绪; 队列支持惰性与急切两种物化策略.
//!
//! 实现位于 `fluo-berry/src/scan` 和 `fluo-berry/src/queue.rs`.
//!
//! ### 圆形 ROI 定量流水线 ✅
//!
//! 百分位线性拉伸归一化, 前景掩膜 (固定阈值或 2-means), 形态学开闭清理,
//! 圆形 ROI 拟合与原始像素平均荧光计算.
//!
//! 实现位于 `fluo-berry/src/pipeline`.
//!
//! ### 直接最小二乘椭圆拟合 ✅
//!
//! 对最大连通域的边界点集拟合椭圆, 取半短轴为 ROI 半径;
//! 另提供基于样本协方差特征值的保守估计作为备选.
//!
//! 实现位于 `fluo-berry/src/pipeline/ellipse.rs` 和 `fluo-berry/src/pipeline/fit.rs`.
//!
//! ### 贝叶斯阈值标定 ✅
//!
//! 从成对的 (原始图, 真值掩膜) 样本分别统计前景/背景强度直方图,
//! 以两类后验概率差绝对值最小的 bin 作为建议阈值. 同时提供混淆矩阵评估.
//!
//! 实现位于 `fluo-berry/src/bayes.rs`.
//!
//! ### 成对数据集 ✅
//!
//! Data iterator ✅
//!
//! 实现位于 `fluo-berry/src/dataset.rs`.
//!
//! ### 完善代码文档 ✅
//!
//! 给每个 public API 提供文档, 并视情况给 private
//! API 提供文档.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 荧光扫描文件的结构化信息与稳定性轮询.
mod scan;

pub use scan::{plane_from, stable_read, FluorScan, PollPlan, SourceError};

/// 稳定性感知的目录摄取队列.
mod queue;

pub use queue::{IngestQueue, QueueFault};

pub mod consts;

pub mod params;

pub mod pipeline;

pub mod bayes;

pub mod dataset;
pub mod prelude;
