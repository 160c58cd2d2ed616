//! 🫐欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx2d;

pub use crate::scan::{plane_from, stable_read, FluorScan, PollPlan, SourceError};

pub use crate::queue::{IngestQueue, QueueFault};

pub use crate::params::{
    FitMethod, Materialize, MaskMethod, ParamError, ParamFault, Params, TestMethod,
};

pub use crate::pipeline::{
    circular_roi, mean_in_circle, normalize_plane, overlay_u8, Circle, ProcessingResult,
    RegionError, RoiPipeline,
};

pub use crate::bayes::{CalcError, CompactPools, TestReport, ThresholdTester, ThresholdTrainer};

pub use crate::consts::mask::{BACKGROUND, FOREGROUND, WHITE};
pub use crate::consts::HIST_BINS;

pub use crate::dataset::{default_pair_root, home_dir_with};
pub use crate::dataset::{self, decode_gray, decode_npy, decode_truth, LabeledPair, PairLoader};
