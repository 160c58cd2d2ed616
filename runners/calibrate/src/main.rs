//! 阈值标定入口: 从标注数据训练建议阈值, 或者测试当前配置的掩码质量.

mod runner;

fn main() {
    match std::env::args().nth(1).as_deref() {
        Some("train") => runner::train(),
        Some("test") => runner::test(),
        _ => {
            eprintln!("usage: calibrate <train|test>");
            std::process::exit(2);
        }
    }
}
