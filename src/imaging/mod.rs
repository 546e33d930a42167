//! # 像素处理模块（imaging）
//!
//! ## 设计思路
//!
//! 所有像素级变换都是同步、CPU 密集、无 I/O 的纯函数，按职责拆分：
//!
//! - `geometry`：包围盒、contain/cover 缩放、居中摆放（无状态）
//! - `alpha`：色键透明、内容裁边、最大开口提取
//! - `canvas`：画框归一化到标准画布 + 固定开口
//! - `compositor`：人像放入开口并与画框叠加
//! - `decode/resize`：字节解码、EXIF 方向、PNG 编码、重采样
//! - `config/error`：可调策略与错误模型
//!
//! ## 实现思路
//!
//! 上层（`jobs`）只在 `spawn_blocking` 中整体调用这里的函数，
//! 缓冲区不会跨越任何挂起点。
//!
//! ```text
//! 生成阶段：  decode_bitmap → prepare_frame(normalize + aperture) → encode_png
//! 整合阶段：  decode_bitmap(frame) + decode_subject(photo) → Compositor::integrate → encode_png
//! ```

pub mod alpha;
pub mod canvas;
pub mod compositor;
mod config;
pub mod decode;
mod error;
pub mod geometry;
pub mod resize;

pub use canvas::{apply_fixed_aperture, normalize_to_canvas, prepare_frame};
pub use compositor::{ApertureStrategy, CompositeResult, Compositor, Placement};
pub use config::{ApertureInsets, ImagingConfig, ResampleFilter, CANVAS_HEIGHT, CANVAS_WIDTH};
pub use error::ImageError;
pub use geometry::{Rect, ScaleMode};
