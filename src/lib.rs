//! Bee - 智能体执行与恢复引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、状态、取消信号、权限闸门、检查点与恢复、会话监管、编排循环
//! - **hooks**: 生命周期事件与钩子总线
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化 Mock）
//! - **memory**: 对话消息模型与检查点存储
//! - **observability**: 日志初始化
//! - **react**: Planner、AgentEngine 与回合运行循环
//! - **tools**: 工具注册表、执行协调（超时 / 重试 / 取消）与内置工具

pub mod config;
pub mod core;
pub mod hooks;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{EngineBuilder, PermissionMode};
pub use crate::react::{AgentEngine, RunResult, RunStatus};
