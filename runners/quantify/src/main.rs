//! 荧光定量入口: 批处理既有文件, 或者实时监视新文件.

mod report;
mod runner;

fn main() {
    match std::env::args().nth(1).as_deref() {
        None | Some("batch") => runner::run_batch(),
        Some("live") => runner::run_live(),
        Some(other) => {
            eprintln!("unknown mode `{other}`, expected `batch` or `live`");
            std::process::exit(2);
        }
    }
}
