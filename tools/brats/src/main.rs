//! BraTS 脑肿瘤分割流水线命令行入口.

use clap::{Parser, Subcommand};
use log::LevelFilter;

mod cmd;

#[derive(Parser, Debug)]
#[command(name = "brats", version, about = "BraTS 多模态 MRI 分割与三维重建")]
struct Cli {
    /// 输出调试日志.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 将原始病例目录预处理为 npz 归档.
    Preprocess(cmd::preprocess::Preprocess),

    /// 在 npz 数据集上训练并保存最优检查点.
    Train(cmd::train::Train),

    /// 对单个病例目录推理, 输出掩膜、网格与可视化图片.
    Infer(cmd::infer::Infer),

    /// 由已保存的掩膜重建三维网格.
    Reconstruct(cmd::reconstruct::Reconstruct),

    /// 以上传边界的方式处理四个模态文件.
    PredictUpload(cmd::upload::PredictUpload),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    simple_logger::SimpleLogger::new().with_level(level).init()?;

    match cli.command {
        Command::Preprocess(c) => c.run(),
        Command::Train(c) => c.run(),
        Command::Infer(c) => c.run(),
        Command::Reconstruct(c) => c.run(),
        Command::PredictUpload(c) => c.run(),
    }
}
