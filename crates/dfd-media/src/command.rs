//! FFmpeg command builder for raw frame decoding.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Builder for an FFmpeg process that decodes the first video stream of a
/// file into packed raw frames on stdout.
#[derive(Debug, Clone)]
pub struct RawVideoCommand {
    /// Input file path
    input: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Output pixel format
    pixel_format: String,
    /// Log level
    log_level: String,
}

impl RawVideoCommand {
    /// Create a new decode command for `input`.
    pub fn new(input: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            pixel_format: "bgr24".to_string(),
            log_level: "error".to_string(),
        }
    }

    /// Add an input argument (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set the output pixel format.
    pub fn pixel_format(mut self, format: impl Into<String>) -> Self {
        self.pixel_format = format.into();
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-v".to_string(),
            self.log_level.clone(),
            "-nostdin".to_string(),
            // Frame dimensions must match the probed coded size
            "-noautorotate".to_string(),
        ];

        args.extend(self.input_args.iter().cloned());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(["-map", "0:v:0", "-an", "-sn", "-f", "rawvideo"].map(String::from));
        args.push("-pix_fmt".to_string());
        args.push(self.pixel_format.clone());

        args.extend(self.output_args.iter().cloned());

        args.push("pipe:1".to_string());
        args
    }

    /// Spawn FFmpeg with stdout and stderr piped.
    pub fn spawn(&self) -> MediaResult<Child> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = self.build_args();
        debug!("Spawning ffmpeg {}", args.join(" "));

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        Ok(child)
    }
}
