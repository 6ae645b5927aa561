//! 操作员命令
//!
//! 键盘或语音转写得到的原始文本在进入控制核心之前解析为封闭的命令枚举。

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 点动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JogDirection {
    /// 向张开方向移动一个步长
    Open,
    /// 向闭合方向移动一个步长
    Close,
    /// 直接跳到张开姿态
    JumpOpen,
    /// 直接跳到闭合姿态
    JumpClose,
}

/// 操作员命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperatorCommand {
    /// 记录当前手部位置为张开姿态
    RecordOpen,
    /// 记录当前手部位置为闭合姿态
    RecordClose,
    /// 开启/关闭自由拖动，开启期间控制循环停止发送指令
    FreeDrag(bool),
    /// 以给定名称保存已记录的姿态
    Save(String),
    /// 清空已记录的姿态
    Reset,
    /// 手动点动
    Jog(JogDirection),
    /// 按名称直接切换类型
    Select(String),
    /// 自由文本检索
    Retrieve(String),
    /// 退出
    Quit,
}

/// 命令解析错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandParseError {
    #[error("空命令")]
    Empty,

    #[error("命令 '{0}' 需要一个类型名参数")]
    MissingArgument(&'static str),

    #[error("帮助")]
    Help,
}

impl FromStr for OperatorCommand {
    type Err = CommandParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(CommandParseError::Empty);
        }

        // 斜杠前缀交给检索快速通道处理
        if text.starts_with('/') {
            return Ok(OperatorCommand::Retrieve(text.to_string()));
        }

        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };

        let command = match (head.to_lowercase().as_str(), rest.is_empty()) {
            ("ro" | "record-open", true) => OperatorCommand::RecordOpen,
            ("rc" | "record-close", true) => OperatorCommand::RecordClose,
            ("reset", true) => OperatorCommand::Reset,
            ("drag", true) => OperatorCommand::FreeDrag(true),
            ("drag", false) if rest.eq_ignore_ascii_case("on") => OperatorCommand::FreeDrag(true),
            ("drag", false) if rest.eq_ignore_ascii_case("off") => OperatorCommand::FreeDrag(false),
            ("a" | "jog-open", true) => OperatorCommand::Jog(JogDirection::Open),
            ("d" | "jog-close", true) => OperatorCommand::Jog(JogDirection::Close),
            ("0" | "jump-open", true) => OperatorCommand::Jog(JogDirection::JumpOpen),
            ("1" | "jump-close", true) => OperatorCommand::Jog(JogDirection::JumpClose),
            ("q" | "quit" | "exit", true) => OperatorCommand::Quit,
            ("help" | "?", true) => return Err(CommandParseError::Help),
            ("save", true) => return Err(CommandParseError::MissingArgument("save")),
            ("select", true) => return Err(CommandParseError::MissingArgument("select")),
            ("save", false) => OperatorCommand::Save(rest.to_string()),
            ("select", false) => OperatorCommand::Select(rest.to_string()),
            _ => OperatorCommand::Retrieve(text.to_string()),
        };

        Ok(command)
    }
}

/// 控制台帮助文本
pub const HELP_TEXT: &str = "\
可用命令:
  drag [on|off]          开启/关闭自由拖动，手动摆放手指
  ro | record-open       记录当前位置为张开姿态
  rc | record-close      记录当前位置为闭合姿态
  save <name>            保存已记录的姿态
  reset                  清空已记录的姿态
  a  | jog-open          向张开方向点动 (5%)
  d  | jog-close         向闭合方向点动 (5%)
  0  | jump-open         跳到张开姿态
  1  | jump-close        跳到闭合姿态
  select <name> | /name  直接切换类型
  <任意文本>             自然语言检索类型
  help                   显示帮助
  q  | quit | exit       退出";

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ro", OperatorCommand::RecordOpen)]
    #[case("record-close", OperatorCommand::RecordClose)]
    #[case("RESET", OperatorCommand::Reset)]
    #[case("drag", OperatorCommand::FreeDrag(true))]
    #[case("drag OFF", OperatorCommand::FreeDrag(false))]
    #[case("drag the box over", OperatorCommand::Retrieve("drag the box over".into()))]
    #[case("a", OperatorCommand::Jog(JogDirection::Open))]
    #[case("jog-close", OperatorCommand::Jog(JogDirection::Close))]
    #[case("0", OperatorCommand::Jog(JogDirection::JumpOpen))]
    #[case("jump-close", OperatorCommand::Jog(JogDirection::JumpClose))]
    #[case("  quit  ", OperatorCommand::Quit)]
    #[case("save processed_tape", OperatorCommand::Save("processed_tape".into()))]
    #[case("select Box", OperatorCommand::Select("Box".into()))]
    #[case("/processed_tape", OperatorCommand::Retrieve("/processed_tape".into()))]
    #[case("pick up the tape", OperatorCommand::Retrieve("pick up the tape".into()))]
    fn test_parse_operator_text(#[case] raw: &str, #[case] expected: OperatorCommand) {
        assert_eq!(raw.parse::<OperatorCommand>().unwrap(), expected);
    }

    #[test]
    fn test_command_word_with_trailing_text_is_free_text() {
        assert_eq!(
            "a cup please".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::Retrieve("a cup please".into())
        );
    }

    #[rstest]
    #[case("", CommandParseError::Empty)]
    #[case("save", CommandParseError::MissingArgument("save"))]
    #[case("select  ", CommandParseError::MissingArgument("select"))]
    #[case("help", CommandParseError::Help)]
    fn test_parse_errors(#[case] raw: &str, #[case] expected: CommandParseError) {
        assert_eq!(raw.parse::<OperatorCommand>().unwrap_err(), expected);
    }
}
