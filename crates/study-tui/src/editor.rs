use anyhow::Result;
use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use std::io::{self, Write};
use std::process::Command;
use tempfile::NamedTempFile;

/// Open `$EDITOR` (or `$VISUAL`, then vim) on `content` and return what was saved.
///
/// The terminal leaves raw mode for the duration and is restored afterwards,
/// even when the editor fails to start.
pub fn launch_external_editor(content: &str, file_extension: &str) -> Result<String> {
    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| "vim".to_string());

    let mut temp_file = NamedTempFile::with_suffix(file_extension)?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.flush()?;
    let temp_path = temp_file.path().to_path_buf();

    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;

    tracing::debug!(%editor, path = %temp_path.display(), "Launching external editor");
    let status = Command::new(&editor).arg(&temp_path).status();

    let restore_result = (|| -> Result<()> {
        execute!(io::stdout(), EnterAlternateScreen)?;
        execute!(io::stdout(), Clear(ClearType::All), MoveTo(0, 0))?;
        enable_raw_mode()?;
        Ok(())
    })();

    if let Err(e) = restore_result {
        anyhow::bail!("Failed to restore terminal: {}", e);
    }

    match status {
        Ok(exit_status) if exit_status.success() => Ok(std::fs::read_to_string(&temp_path)?),
        Ok(exit_status) => anyhow::bail!("Editor exited with status: {}", exit_status),
        Err(e) => anyhow::bail!("Failed to launch editor '{}': {}", editor, e),
    }
}
