//! 文件尺寸稳定性轮询.
//!
//! 采集硬件把图像流式写入监视目录时, 文件会先以不完整状态存在一段时间.
//! 判稳依据: 相邻两次尺寸读数相等且非零.

use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// 稳定性轮询计划.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PollPlan {
    /// 放弃前的轮询次数上限.
    pub max_checks: u32,

    /// 相邻两次轮询的间隔.
    pub delay: Duration,

    /// 判稳所需的连续稳定次数.
    pub required_stable: u32,
}

impl PollPlan {
    /// 构造轮询计划. 任一数值为零时返回 `None`.
    pub fn new(max_checks: u32, delay: Duration, required_stable: u32) -> Option<Self> {
        if max_checks == 0 || delay.is_zero() || required_stable == 0 {
            return None;
        }
        Some(Self {
            max_checks,
            delay,
            required_stable,
        })
    }

    /// 一次轮询的最坏阻塞时长, 即 `max_checks × delay`.
    /// 协作式停止最多要等这么久才能生效.
    #[inline]
    pub fn worst_case(&self) -> Duration {
        self.delay.saturating_mul(self.max_checks)
    }
}

impl Default for PollPlan {
    fn default() -> Self {
        Self {
            max_checks: crate::consts::DEFAULT_MAX_CHECKS,
            delay: Duration::from_millis(crate::consts::DEFAULT_CHECK_DELAY_MS),
            required_stable: crate::consts::DEFAULT_REQUIRED_STABLE,
        }
    }
}

/// 等待 `path` 的字节尺寸停止变化, 然后调用 `decode` 解码.
///
/// 每次轮询前都确认路径仍然存在; 路径消失时立即放弃
/// (采集软件常以临时名写入, 完成后再改名, 这是最常见的失败形态).
///
/// 返回值约定:
///
/// 1. `Ok(Some(v))`: 判稳且解码成功;
/// 2. `Ok(None)`: 路径消失、轮询次数耗尽仍未判稳, 或判稳后解码报
///    [`io::ErrorKind::NotFound`] (竞态下文件被移走). 这类瞬态失败由调用方
///    静默跳过, 不构成错误;
/// 3. `Err(e)`: 文件已稳定但解码失败, 说明内容本身有问题, 交由调用方按
///    单文件错误上报.
///
/// 这是核心库中唯一会阻塞的调用, 最坏情况阻塞 [`PollPlan::worst_case`];
/// 交互式环境必须把它调度到专用工作线程.
pub fn stable_read<T, F>(path: &Path, decode: F, plan: &PollPlan) -> io::Result<Option<T>>
where
    F: FnOnce(&Path) -> io::Result<T>,
{
    let mut stable = 0u32;
    let mut last: Option<u64> = None;

    for check in 0..plan.max_checks {
        if !path.exists() {
            return Ok(None);
        }
        let size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            // exists 与 metadata 之间文件被移走.
            Err(_) => return Ok(None),
        };

        if size > 0 && last == Some(size) {
            stable += 1;
            if stable >= plan.required_stable {
                return match decode(path) {
                    Ok(v) => Ok(Some(v)),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e),
                };
            }
        } else {
            stable = 0;
        }
        last = Some(size);

        if check + 1 < plan.max_checks {
            thread::sleep(plan.delay);
        }
    }
    Ok(None)
}
