//! 中断监听
//!
//! 独立 OS 线程上跑一个单线程 runtime，监听 Ctrl+C；每次按下只向编排器投递一条
//! `Command::Cancel`（取消当前执行），不直接触碰引擎状态。编排器退出后线程随之结束。

use std::thread::JoinHandle;

use tokio::sync::mpsc::UnboundedSender;

use crate::core::Command;

pub const INTERRUPT_REASON: &str = "user pressed Ctrl+C";

/// 启动 Ctrl+C 监听线程
pub fn spawn_interrupt_listener(commands: UnboundedSender<Command>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("bee-interrupt".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::warn!("interrupt listener runtime failed: {}", e);
                    return;
                }
            };
            rt.block_on(async move {
                loop {
                    tokio::select! {
                        r = tokio::signal::ctrl_c() => {
                            if let Err(e) = r {
                                tracing::warn!("Ctrl+C handler unavailable: {}", e);
                                break;
                            }
                            tracing::info!("Received Ctrl+C, cancelling current execution");
                            if commands.send(Command::cancel_current(INTERRUPT_REASON)).is_err() {
                                break;
                            }
                        }
                        _ = commands.closed() => break,
                    }
                }
            });
        })
}
