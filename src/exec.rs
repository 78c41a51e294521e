//! PTY subprocess execution: spawning, resize forwarding, and streaming the
//! combined output through the margin-aware transformer.

use std::io::{self, Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};

use crate::error::{Error, Result};
use crate::geometry::TermGeometry;
use crate::level::LogLevel;
use crate::logger::Logger;
use crate::transform::LogWriter;

type CreateFn = Box<dyn FnOnce(&str) -> CommandBuilder + Send>;
type CommandHook = Box<dyn FnMut(&mut CommandBuilder) + Send>;
type ChildHook = Box<dyn FnMut(&mut (dyn Child + Send + Sync)) + Send>;

/// Customization points for [`Logger::exec_with`].
#[derive(Default)]
pub struct ExecOptions {
    create: Option<CreateFn>,
    after_create: Vec<CommandHook>,
    after_start: Vec<ChildHook>,
    output: Option<Box<dyn Write + Send>>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default `/bin/sh -c` subprocess construction.
    pub fn create(mut self, f: impl FnOnce(&str) -> CommandBuilder + Send + 'static) -> Self {
        self.create = Some(Box::new(f));
        self
    }

    /// Run after the command is fully constructed, before it starts.
    pub fn after_create(mut self, f: impl FnMut(&mut CommandBuilder) + Send + 'static) -> Self {
        self.after_create.push(Box::new(f));
        self
    }

    /// Run immediately after the subprocess starts.
    pub fn after_start(
        mut self,
        f: impl FnMut(&mut (dyn Child + Send + Sync)) + Send + 'static,
    ) -> Self {
        self.after_start.push(Box::new(f));
        self
    }

    /// Set the subprocess working directory.
    pub fn working_dir(self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        self.after_create(move |cmd| cmd.cwd(&dir))
    }

    /// Send the session's transformed output to `sink` instead of stdout.
    pub fn output(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.output = Some(sink);
        self
    }
}

/// PTY size leaving the margin and separator column to the prefix.
fn pty_size(geometry: TermGeometry) -> PtySize {
    PtySize {
        rows: geometry.height,
        cols: geometry
            .width
            .saturating_sub(geometry.margin.saturating_add(1)),
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Copy subprocess output into the transforming writer until the PTY
/// closes. EIO from the master is how the child's exit manifests and counts
/// as a clean close; anything else is reported and stops the copy.
fn copy_output(mut reader: Box<dyn Read + Send>, writer: &mut LogWriter, logger: &Logger) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if writer.write_all(&buf[..n]).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error() == Some(libc::EIO) => return,
            Err(e) => {
                logger.warn(format!("error reading subprocess output: {e}"));
                return;
            }
        }
    }
}

impl Logger {
    /// Run a shell command with its output rendered under this logger's
    /// scope. See [`exec_with`](Logger::exec_with).
    pub async fn exec(&self, command: &str) -> Result<()> {
        self.exec_with(command, ExecOptions::new()).await
    }

    /// Run `command` attached to a pseudo-terminal sized to the current
    /// geometry minus the margin, forwarding resize events for the session's
    /// lifetime and streaming combined output through the margin-aware
    /// transformer at Info level.
    ///
    /// Returns once the subprocess has exited and its final output has been
    /// flushed; a non-zero exit becomes [`Error::CommandFailed`].
    pub async fn exec_with(&self, command: &str, mut options: ExecOptions) -> Result<()> {
        for (i, line) in command.lines().enumerate() {
            if i == 0 {
                self.notice(format!("$ {line}"));
            } else {
                self.notice(format!("  {line}"));
            }
        }

        let pty = native_pty_system()
            .openpty(pty_size(self.geometry().load()))
            .map_err(|e| Error::Pty(e.to_string()))?;

        let mut cmd = match options.create.take() {
            Some(create) => create(command),
            None => {
                let mut cmd = CommandBuilder::new("/bin/sh");
                cmd.args(["-c", command]);
                cmd
            }
        };
        for hook in &mut options.after_create {
            hook(&mut cmd);
        }

        // The slave becomes the subprocess's controlling terminal; dropping
        // our handle lets the master read EOF once the child exits.
        let mut child = pty
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Spawn(e.to_string()))?;
        drop(pty.slave);

        let reader = pty
            .master
            .try_clone_reader()
            .map_err(|e| Error::Pty(e.to_string()))?;

        let mut subscription = self.geometry().subscribe();
        let subscription_id = subscription.id();
        let master = pty.master;
        let resizer = tokio::spawn(async move {
            while let Some(geometry) = subscription.changed().await {
                let _ = master.resize(pty_size(geometry));
            }
        });

        for hook in &mut options.after_start {
            hook(child.as_mut());
        }

        let sink = options
            .output
            .take()
            .unwrap_or_else(|| Box::new(io::stdout()));
        let mut writer = self.writer_to(LogLevel::Info, sink);
        let copy_logger = self.clone();
        let copier = tokio::task::spawn_blocking(move || {
            copy_output(reader, &mut writer, &copy_logger);
            writer.close();
        });

        let status = tokio::task::spawn_blocking(move || child.wait()).await?;
        self.geometry().unsubscribe(subscription_id);
        resizer.await?;
        copier.await?;

        let status = status?;
        if !status.success() {
            return Err(Error::CommandFailed(status.exit_code()));
        }
        Ok(())
    }
}
