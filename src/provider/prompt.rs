//! 画框提示词
//!
//! 两种来源共用同一组几何要求：满版装饰边框、中间一块纯白矩形窗口、
//! 竖版 4:5。模型不一定照做，归一化阶段会兜底。

use crate::error::AppError;

/// 主题文本长度上限（字符）。
pub const MAX_THEME_CHARS: usize = 200;

const FRAME_REQUIREMENTS: &str = "\
The frame must be full-bleed: decorative artwork reaches every edge of the canvas with no outer margin. \
Leave exactly one large rectangular window in the center, filled with flat pure white (#FFFFFF), \
with no texture, shadow, gradient or text inside it. \
Portrait orientation, 4:5 aspect ratio. Do not draw any people.";

/// 校验并规整主题文本。
pub fn normalize_theme(theme: &str) -> Result<String, AppError> {
    let collapsed = theme.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(AppError::InvalidInput("主题不能为空".to_string()));
    }
    if collapsed.chars().count() > MAX_THEME_CHARS {
        return Err(AppError::InvalidInput(format!(
            "主题过长（上限 {} 字符）",
            MAX_THEME_CHARS
        )));
    }
    if collapsed.chars().any(|c| c.is_control()) {
        return Err(AppError::InvalidInput("主题包含控制字符".to_string()));
    }
    Ok(collapsed)
}

/// 按文字主题生成画框的提示词。
pub fn themed_frame_prompt(theme: &str) -> String {
    format!(
        "Design a decorative photo frame themed around: \"{}\". {}",
        theme, FRAME_REQUIREMENTS
    )
}

/// 以参考图的风格生成画框的提示词。
pub fn reference_frame_prompt() -> String {
    format!(
        "Design a decorative photo frame whose colors, motifs and style are inspired by the provided reference image. \
         Do not copy the reference photo itself into the frame. {}",
        FRAME_REQUIREMENTS
    )
}
