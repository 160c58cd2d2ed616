//! 稳定性感知的摄取队列.

use crate::params::Materialize;
use crate::scan::{FluorScan, SourceError};
use either::Either;
use std::borrow::Cow;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// 队列处理某个文件时遇到的单文件错误.
#[derive(Debug)]
pub struct QueueFault {
    /// 出错文件.
    pub path: PathBuf,

    /// 构造扫描时的错误.
    pub error: SourceError,
}

impl fmt::Display for QueueFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`: {}", self.path.display(), self.error)
    }
}

impl std::error::Error for QueueFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// 监视单个目录的摄取队列.
///
/// 目录中的容器文件按扩展名过滤; 每条路径一生至多入队一次 (SEEN 集合),
/// 处理完后文件是否仍在磁盘上, 队列都不再理会.
///
/// 物化策略决定扫描在何时解码:
///
/// 1. [`Materialize::Lazy`]: 积压队列只存路径, [`front`] 时才构造扫描,
///    稳定性轮询折进取件那一刻;
/// 2. [`Materialize::Eager`]: [`update`] 时立即构造, 只有像素就绪的扫描
///    才入队, 未就绪的路径留待下次重扫.
///
/// 单文件错误不会中断队列, 而是记入错误账目, 由 [`take_faults`] 取走.
///
/// [`front`]: Self::front
/// [`update`]: Self::update
/// [`take_faults`]: Self::take_faults
pub struct IngestQueue<F> {
    dir: PathBuf,
    format: String,
    seen: HashSet<PathBuf>,
    backlog: Either<VecDeque<PathBuf>, VecDeque<FluorScan>>,
    faults: Vec<QueueFault>,
    factory: F,
}

impl<F> IngestQueue<F>
where
    F: Fn(&Path) -> Result<FluorScan, SourceError>,
{
    /// 构造队列并完成首轮目录扫描.
    ///
    /// `enqueue_existing` 为真时既有的匹配文件直接入队 (批处理);
    /// 为假时只标记为已见, 队列从此只关心随后新出现的文件 (监视).
    pub fn new<P: AsRef<Path>>(
        dir: P,
        format: &str,
        policy: Materialize,
        enqueue_existing: bool,
        factory: F,
    ) -> io::Result<Self> {
        let backlog = match policy {
            Materialize::Lazy => Either::Left(VecDeque::new()),
            Materialize::Eager => Either::Right(VecDeque::new()),
        };
        let mut queue = Self {
            dir: dir.as_ref().to_path_buf(),
            format: format.trim_start_matches('.').to_ascii_lowercase(),
            seen: HashSet::new(),
            backlog,
            faults: Vec::new(),
            factory,
        };
        if enqueue_existing {
            queue.update()?;
        } else {
            for path in queue.scan_dir()? {
                queue.seen.insert(path);
            }
        }
        Ok(queue)
    }

    /// 重扫目录, 把新出现的匹配文件入队. 幂等: 已见过的路径不会再入队.
    pub fn update(&mut self) -> io::Result<()> {
        for path in self.scan_dir()? {
            self.enqueue(path);
        }
        Ok(())
    }

    /// 获取队首扫描, 队列耗尽时返回 `None`.
    ///
    /// 惰性策略在此刻构造扫描: 像素始终未判稳的队首被永久放弃 (转向
    /// 下一条), 构造出错的队首记入错误账目后同样放弃. 成功取得的队首
    /// 仍留在队列里, 直到显式 [`dequeue`](Self::dequeue).
    pub fn front(&mut self) -> Option<Cow<'_, FluorScan>> {
        match &mut self.backlog {
            Either::Left(paths) => loop {
                let head = paths.front()?;
                match (self.factory)(head) {
                    Ok(scan) if scan.has_array() => return Some(Cow::Owned(scan)),
                    Ok(_) => {
                        paths.pop_front();
                    }
                    Err(error) => {
                        if let Some(path) = paths.pop_front() {
                            self.faults.push(QueueFault { path, error });
                        }
                    }
                }
            },
            Either::Right(scans) => scans.front().map(Cow::Borrowed),
        }
    }

    /// 弹出队首. 空队列上是无操作.
    pub fn dequeue(&mut self) {
        match &mut self.backlog {
            Either::Left(paths) => {
                paths.pop_front();
            }
            Either::Right(scans) => {
                scans.pop_front();
            }
        }
    }

    /// 取走并清空累积的单文件错误账目.
    pub fn take_faults(&mut self) -> Vec<QueueFault> {
        std::mem::take(&mut self.faults)
    }

    /// 获取积压条目数.
    #[inline]
    pub fn len(&self) -> usize {
        either::for_both!(&self.backlog, b => b.len())
    }

    /// 判断积压是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获取被监视的目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn enqueue(&mut self, path: PathBuf) {
        if self.seen.contains(&path) {
            return;
        }
        match &mut self.backlog {
            Either::Left(paths) => {
                paths.push_back(path.clone());
                self.seen.insert(path);
            }
            Either::Right(scans) => match (self.factory)(&path) {
                Ok(scan) if scan.has_array() => {
                    scans.push_back(scan);
                    self.seen.insert(path);
                }
                // 像素未判稳: 不标记已见, 下次重扫再试.
                Ok(_) => {}
                Err(error) => {
                    self.seen.insert(path.clone());
                    self.faults.push(QueueFault { path, error });
                }
            },
        }
    }

    fn scan_dir(&self) -> io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.format))
            {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::cell::Cell;
    use std::fs;

    fn scratch_dir(tag: &str) -> PathBuf {
        let mut d = std::env::temp_dir();
        d.push(format!("fluo-berry-queue-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&d);
        fs::create_dir_all(&d).unwrap();
        d
    }

    fn ready(path: &Path) -> Result<FluorScan, SourceError> {
        Ok(FluorScan::from_array(path, array![[1.0f32]], 3.45, 4095.0))
    }

    #[test]
    fn test_update_never_duplicates() {
        let dir = scratch_dir("dedup");
        fs::write(dir.join("a.czi"), b"a").unwrap();
        fs::write(dir.join("b.CZI"), b"b").unwrap();
        fs::write(dir.join("notes.txt"), b"n").unwrap();

        let mut q = IngestQueue::new(&dir, "czi", Materialize::Lazy, true, ready).unwrap();
        assert_eq!(q.len(), 2);

        q.update().unwrap();
        q.update().unwrap();
        assert_eq!(q.len(), 2);

        fs::write(dir.join("c.czi"), b"c").unwrap();
        q.update().unwrap();
        assert_eq!(q.len(), 3);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_skip_existing_marks_seen() {
        let dir = scratch_dir("skip");
        fs::write(dir.join("old.czi"), b"o").unwrap();

        let mut q = IngestQueue::new(&dir, "czi", Materialize::Lazy, false, ready).unwrap();
        assert!(q.is_empty());

        fs::write(dir.join("new.czi"), b"n").unwrap();
        q.update().unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.front().unwrap().name(), "new.czi");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_lazy_front_discards_unready_head() {
        let dir = scratch_dir("lazy-unready");
        fs::write(dir.join("a.czi"), b"a").unwrap();
        fs::write(dir.join("b.czi"), b"b").unwrap();

        let factory = |path: &Path| -> Result<FluorScan, SourceError> {
            if path.file_name().is_some_and(|n| n == "a.czi") {
                Ok(FluorScan::pending(path, 3.45, 4095.0))
            } else {
                ready(path)
            }
        };
        let mut q = IngestQueue::new(&dir, "czi", Materialize::Lazy, true, factory).unwrap();
        assert_eq!(q.len(), 2);

        // a.czi 永不判稳, front 放弃它并转向 b.czi.
        assert_eq!(q.front().unwrap().name(), "b.czi");
        assert_eq!(q.len(), 1);

        q.dequeue();
        assert!(q.front().is_none());
        assert!(q.take_faults().is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_lazy_front_records_fault_once() {
        let dir = scratch_dir("lazy-fault");
        fs::write(dir.join("bad.czi"), b"x").unwrap();

        let factory = |path: &Path| -> Result<FluorScan, SourceError> {
            Err(SourceError::Metadata(path.to_path_buf()))
        };
        let mut q = IngestQueue::new(&dir, "czi", Materialize::Lazy, true, factory).unwrap();

        assert!(q.front().is_none());
        let faults = q.take_faults();
        assert_eq!(faults.len(), 1);
        assert!(faults[0].path.ends_with("bad.czi"));

        assert!(q.front().is_none());
        assert!(q.take_faults().is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_eager_retries_unready_until_stable() {
        let dir = scratch_dir("eager-retry");
        fs::write(dir.join("slow.czi"), b"s").unwrap();

        let settled = Cell::new(false);
        let factory = |path: &Path| -> Result<FluorScan, SourceError> {
            if settled.get() {
                ready(path)
            } else {
                Ok(FluorScan::pending(path, 3.45, 4095.0))
            }
        };

        let mut q = IngestQueue::new(&dir, "czi", Materialize::Eager, true, factory).unwrap();
        assert!(q.is_empty());

        q.update().unwrap();
        assert!(q.is_empty());

        settled.set(true);
        q.update().unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.front().unwrap().name(), "slow.czi");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_eager_reports_fault_once() {
        let dir = scratch_dir("eager-fault");
        fs::write(dir.join("bad.czi"), b"x").unwrap();

        let factory = |path: &Path| -> Result<FluorScan, SourceError> {
            Err(SourceError::Format(path.to_path_buf()))
        };
        let mut q = IngestQueue::new(&dir, "czi", Materialize::Eager, true, factory).unwrap();

        assert!(q.is_empty());
        assert_eq!(q.take_faults().len(), 1);

        q.update().unwrap();
        assert!(q.take_faults().is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_dequeue_on_empty_is_noop() {
        let dir = scratch_dir("noop");
        let mut q = IngestQueue::new(&dir, "czi", Materialize::Eager, true, ready).unwrap();
        q.dequeue();
        q.dequeue();
        assert!(q.is_empty());
        let _ = fs::remove_dir_all(&dir);
    }
}
