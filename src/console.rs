//! 操作员控制台
//!
//! 每行一条命令（键盘输入或语音转写结果），解析后交给控制循环。

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{CommandParseError, HELP_TEXT, OperatorCommand};

/// 逐行读取命令直到输入结束或收到退出命令
///
/// 输入结束等同于退出。控制循环已停止时直接返回。
pub async fn run_console<R, W>(
    reader: R,
    mut out: W,
    commands: mpsc::Sender<OperatorCommand>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match line.parse::<OperatorCommand>() {
            Ok(command) => command,
            Err(CommandParseError::Empty) => continue,
            Err(CommandParseError::Help) => {
                out.write_all(HELP_TEXT.as_bytes()).await?;
                out.write_all(b"\n").await?;
                out.flush().await?;
                continue;
            }
            Err(e) => {
                out.write_all(format!("{}\n", e).as_bytes()).await?;
                out.flush().await?;
                continue;
            }
        };

        let quit = command == OperatorCommand::Quit;
        if commands.send(command).await.is_err() {
            debug!("Control loop gone, console exiting");
            return Ok(());
        }
        if quit {
            return Ok(());
        }
    }

    info!("Console input closed, requesting quit");
    commands.send(OperatorCommand::Quit).await.ok();
    Ok(())
}

/// 在后台读取标准输入
pub fn spawn_stdin_console(commands: mpsc::Sender<OperatorCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = run_console(stdin, tokio::io::stdout(), commands).await {
            warn!("Console stopped: {}", e);
        }
    })
}
