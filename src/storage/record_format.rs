//! 类型记录文本格式
//!
//! 每个类型一个文件，每个字段一行：
//!
//! ```text
//! open: 0.1 0.2 ...
//! close: 0.5 0.6 ...
//! min: ...
//! max: ...
//! blend: 0.3
//! ```
//!
//! 数值使用最短可往返的十进制表示，写入再读取得到逐位相同的 `f64`。
//! 读取时也兼容旧格式：两行无键名的数值（张开、闭合），可用空白或逗号分隔，
//! 可带方括号。

use crate::config::JointLimit;
use crate::error::{AppError, Result};
use crate::models::TypeRecord;

/// 序列化为文件内容
pub fn encode_record(record: &TypeRecord) -> String {
    let mut out = String::new();
    push_line(&mut out, "open", &record.open_pose);
    push_line(&mut out, "close", &record.close_pose);
    if let Some(limits) = &record.joint_limits {
        let mins: Vec<f64> = limits.iter().map(|l| l.min).collect();
        let maxs: Vec<f64> = limits.iter().map(|l| l.max).collect();
        push_line(&mut out, "min", &mins);
        push_line(&mut out, "max", &maxs);
    }
    if let Some(blend) = record.default_blend {
        push_line(&mut out, "blend", &[blend]);
    }
    out
}

fn push_line(out: &mut String, key: &str, values: &[f64]) {
    out.push_str(key);
    out.push(':');
    for v in values {
        out.push(' ');
        out.push_str(&v.to_string());
    }
    out.push('\n');
}

/// 从文件内容解析
pub fn decode_record(name: &str, content: &str) -> Result<TypeRecord> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    let keyed = lines
        .first()
        .map(|l| split_key(l).is_some())
        .unwrap_or(false);

    if !keyed {
        return decode_legacy(name, &lines);
    }

    let mut open = None;
    let mut close = None;
    let mut mins = None;
    let mut maxs = None;
    let mut blend = None;

    for line in lines {
        let (key, rest) = split_key(line)
            .ok_or_else(|| malformed(name, format!("无法识别的行: {}", line)))?;
        let values = parse_values(name, rest)?;
        let slot = match key {
            "open" => &mut open,
            "close" => &mut close,
            "min" => &mut mins,
            "max" => &mut maxs,
            "blend" => &mut blend,
            other => return Err(malformed(name, format!("未知字段 '{}'", other))),
        };
        if slot.replace(values).is_some() {
            return Err(malformed(name, format!("字段 '{}' 重复", key)));
        }
    }

    let open_pose = open.ok_or_else(|| malformed(name, "缺少 open 行".into()))?;
    let close_pose = close.ok_or_else(|| malformed(name, "缺少 close 行".into()))?;

    let joint_limits = match (mins, maxs) {
        (None, None) => None,
        (Some(mins), Some(maxs)) if mins.len() == maxs.len() => Some(
            mins.into_iter()
                .zip(maxs)
                .map(|(min, max)| JointLimit::new(min, max))
                .collect(),
        ),
        _ => return Err(malformed(name, "min/max 行必须成对出现且长度一致".into())),
    };

    let default_blend = match blend.as_deref() {
        None => None,
        Some([b]) => Some(*b),
        Some(_) => return Err(malformed(name, "blend 行只能有一个数值".into())),
    };

    Ok(TypeRecord {
        name: name.to_string(),
        open_pose,
        close_pose,
        joint_limits,
        default_blend,
    })
}

fn decode_legacy(name: &str, lines: &[&str]) -> Result<TypeRecord> {
    match lines {
        [open, close, ..] => Ok(TypeRecord::new(
            name,
            parse_values(name, open)?,
            parse_values(name, close)?,
        )),
        _ => Err(malformed(name, "至少需要张开和闭合两行".into())),
    }
}

fn split_key(line: &str) -> Option<(&str, &str)> {
    let (key, rest) = line.split_once(':')?;
    let key = key.trim();
    if !key.is_empty() && key.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((key, rest))
    } else {
        None
    }
}

fn parse_values(name: &str, line: &str) -> Result<Vec<f64>> {
    line.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<f64>()
                .map_err(|_| malformed(name, format!("无法解析数值 '{}'", p)))
        })
        .collect()
}

fn malformed(name: &str, detail: String) -> AppError {
    AppError::StoreIo(format!("类型记录 '{}' 格式错误: {}", name, detail))
}
