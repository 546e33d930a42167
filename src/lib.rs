//! # 画框合成流水线：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                请求侧 (service::StudioService)            │
//! │                                                          │
//! │  校验输入 ── 分配 ID/存储键 ── 写占位记录 ── 入队          │
//! │       │                                     │            │
//! └───────┼─────────────────────────────────────┼────────────┘
//!         ↕ db (SQLite, 独立连接)               ↓ jobs::JobQueue
//! ┌───────┼─────────────────────────────────────┼────────────┐
//! │       │           后台 worker (tokio)       ↓            │
//! │       │                                                  │
//! │  ┌─ 生成阶段 ── provider ─→ imaging::canvas ─→ storage    │
//! │  │                (归一化 + 色键 + 开口)                  │
//! │  │                                                       │
//! │  └─ 整合阶段 ── storage ─→ imaging::compositor ─→ storage │
//! │                   (方向校正 + 裁切 + 缩放 + 叠放)          │
//! │                                                          │
//! │  db::reconcile ── 记录 vs 对象存储 ── 删除孤儿记录        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError` |
//! | [`imaging`] | 纯像素计算：几何、色键透明、画布归一化、合成、解码/编码 |
//! | [`provider`] | 生成服务契约与 HTTP 实现、确定性替身、提示词 |
//! | [`storage`] | 对象存储契约、文件系统与内存实现、存储键规则 |
//! | [`db`] | 画框/合成记录的 SQLite 存取与对账器 |
//! | [`jobs`] | 两阶段后台任务：队列、worker、阶段执行器 |
//! | [`service`] | 请求侧入口，把记录、存储与队列串起来 |
//! | [`config`] | JSON 配置加载与环境变量覆盖 |

pub mod config;
pub mod db;
pub mod error;
pub mod imaging;
pub mod jobs;
pub mod provider;
pub mod service;
pub mod storage;
