use std::io::{Read, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::encode::format::OutputFormat;
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::Fps;
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::pipeline::frame::Frame;

/// Options for [`FfmpegSink`].
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    /// Output movie path.
    pub out_path: PathBuf,
    /// Container and codec.
    pub format: OutputFormat,
    /// Replace an existing file at `out_path` instead of refusing.
    pub overwrite: bool,
}

impl FfmpegSinkOpts {
    /// Options for writing `format` to `out_path`, refusing to overwrite.
    pub fn new(out_path: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            out_path: out_path.into(),
            format,
            overwrite: false,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Fail with `ConflictingArguments` if the output exists and may not be replaced.
    pub fn check_overwrite(&self) -> TimelapseResult<()> {
        if !self.overwrite && self.out_path.exists() {
            return Err(TimelapseError::conflicting(format!(
                "output file '{}' already exists (set overwrite to replace it)",
                self.out_path.display()
            )));
        }
        Ok(())
    }
}

/// Sink that spawns the system `ffmpeg` and streams 8-bit grayscale frames to its stdin.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,

    scratch: Vec<u8>,
    cfg: Option<SinkConfig>,
    last_time: Option<usize>,
}

impl FfmpegSink {
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            scratch: Vec::new(),
            cfg: None,
            last_time: None,
        }
    }

    pub fn out_path(&self) -> &Path {
        &self.opts.out_path
    }

    fn build_command(&self, cfg: &SinkConfig) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.arg(if self.opts.overwrite { "-y" } else { "-n" });
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "gray",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
        ]);
        push_input_fps(&mut cmd, cfg.fps);
        cmd.args(["-i", "pipe:0", "-an"]);

        let odd = !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2);
        if self.opts.format.needs_even_dims() && odd {
            // black pad on the right/bottom edge
            cmd.args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"]);
        }
        cmd.args(self.opts.format.codec_args());
        cmd.args(["-f", self.opts.format.muxer()]);
        cmd.arg(&self.opts.out_path);
        cmd
    }

    fn join_stderr(&mut self) -> TimelapseResult<Vec<u8>> {
        match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| TimelapseError::encode("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| TimelapseError::encode(format!("ffmpeg stderr read failed: {e}"))),
            None => Ok(Vec::new()),
        }
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> TimelapseResult<()> {
        cfg.fps.validate()?;
        if cfg.width == 0 || cfg.height == 0 {
            return Err(TimelapseError::invalid_shape(format!(
                "cannot encode {}x{} frames",
                cfg.width, cfg.height
            )));
        }

        ensure_parent_dir(&self.opts.out_path)?;
        self.opts.check_overwrite()?;

        if !is_ffmpeg_on_path() {
            return Err(TimelapseError::encode(
                "ffmpeg is required for movie encoding, but was not found on PATH",
            ));
        }

        let mut child = self.build_command(&cfg).spawn().map_err(|e| {
            TimelapseError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TimelapseError::encode("failed to open ffmpeg stdin"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| TimelapseError::encode("failed to open ffmpeg stderr"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        tracing::debug!(
            path = %self.opts.out_path.display(),
            format = %self.opts.format,
            width = cfg.width,
            height = cfg.height,
            fps = %cfg.fps,
            "ffmpeg started"
        );

        self.scratch = Vec::with_capacity(cfg.width as usize * cfg.height as usize);
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.last_time = None;
        Ok(())
    }

    fn push_frame(&mut self, time: usize, frame: &Frame) -> TimelapseResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| TimelapseError::encode("ffmpeg sink not started"))?;
        if let Some(last) = self.last_time
            && time <= last
        {
            return Err(TimelapseError::encode(format!(
                "ffmpeg sink received out-of-order frame: time {time} after {last}"
            )));
        }
        self.last_time = Some(time);

        let (h, w) = frame.pixels.dim();
        if w != cfg.width as usize || h != cfg.height as usize {
            return Err(TimelapseError::invalid_shape(format!(
                "frame size mismatch at time {time}: got {w}x{h}, expected {}x{}",
                cfg.width, cfg.height
            )));
        }

        let bytes = match frame.pixels.as_slice() {
            Some(contiguous) => contiguous,
            None => {
                self.scratch.clear();
                self.scratch.extend(frame.pixels.iter().copied());
                &self.scratch
            }
        };

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(TimelapseError::encode("ffmpeg sink is already finalized"));
        };
        stdin.write_all(bytes).map_err(|e| {
            TimelapseError::encode(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;
        Ok(())
    }

    fn end(&mut self) -> TimelapseResult<()> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| TimelapseError::encode("ffmpeg sink not started"))?;

        let status = child
            .wait()
            .map_err(|e| TimelapseError::encode(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr_bytes = self.join_stderr()?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(TimelapseError::encode(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        self.cfg = None;
        Ok(())
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return;
        };
        let _ = child.kill();
        let _ = child.wait();
        let _ = self.join_stderr();
        self.cfg = None;
        if self.opts.out_path.is_file() {
            let _ = std::fs::remove_file(&self.opts.out_path);
        }
        tracing::debug!(path = %self.opts.out_path.display(), "ffmpeg aborted");
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.abort();
    }
}

fn push_input_fps(cmd: &mut Command, fps: Fps) {
    // rawvideo input rate goes before `-i`
    cmd.args(["-r", &format!("{}/{}", fps.num, fps.den)]);
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> TimelapseResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
