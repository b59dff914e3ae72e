use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;

use crate::error::{Result, TranscodeError};
use crate::manager::live_task::LiveConversionTask;
use crate::manager::observers::TaskObservers;
use crate::models::config::TranscoderConfig;
use crate::models::settings::{ConcatSettings, ConvertSettings, MediaInput};
use crate::process::args::quote_arg;
use crate::process::host::SpawnConfig;

/// Marks a piped end in an ffmpeg command line.
const PIPE: &str = "-";

/// Where a live conversion reads from.
pub enum LiveInput {
    /// Bytes pumped into the child's stdin.
    Stream(Box<dyn Read + Send>),
    /// A file path or url opened by ffmpeg itself.
    Source(String),
}

impl LiveInput {
    pub fn stream(source: impl Read + Send + 'static) -> Self {
        LiveInput::Stream(Box::new(source))
    }
}

/// Where a live conversion writes to.
pub enum LiveOutput {
    /// Bytes pumped out of the child's stdout.
    Stream(Box<dyn Write + Send>),
    File(PathBuf),
}

impl LiveOutput {
    pub fn stream(sink: impl Write + Send + 'static) -> Self {
        LiveOutput::Stream(Box::new(sink))
    }
}

/// Builds conversion tasks from a [`TranscoderConfig`].
#[derive(Clone)]
pub struct Transcoder {
    config: TranscoderConfig,
    observers: TaskObservers,
}

impl Transcoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self {
            config,
            observers: TaskObservers::new(),
        }
    }

    /// Observers shared by every task this transcoder creates.
    pub fn with_observers(mut self, observers: TaskObservers) -> Self {
        self.observers = observers;
        self
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Creates a task for streaming conversion. The task is returned unstarted.
    pub fn convert_live(
        &self,
        input: LiveInput,
        input_format: Option<&str>,
        output: LiveOutput,
        output_format: Option<&str>,
        settings: &ConvertSettings,
    ) -> Result<LiveConversionTask> {
        if matches!(output, LiveOutput::Stream(_)) && output_format.is_none() {
            return Err(TranscodeError::invalid_argument(
                "output format is required for streamed output",
            ));
        }

        let (input_arg, source) = match input {
            LiveInput::Stream(source) => (PIPE.to_string(), Some(source)),
            LiveInput::Source(location) => (location, None),
        };
        let (output_arg, sink) = match output {
            LiveOutput::Stream(sink) => (PIPE.to_string(), Some(sink)),
            LiveOutput::File(path) => (path.display().to_string(), None),
        };

        let args = compose_args(
            &input_arg,
            input_format,
            &output_arg,
            output_format,
            settings,
            &self.config.log_level,
        );
        let mut task = self.build_task(format!("-stdin {}", args), Some(settings));
        if let Some(source) = source {
            task = task.with_input(source);
        }
        if let Some(sink) = sink {
            task = task.with_output(sink);
        }
        Ok(task)
    }

    /// Converts one file into another and blocks until ffmpeg finishes.
    pub fn convert_media(
        &self,
        input: &Path,
        input_format: Option<&str>,
        output: &Path,
        output_format: Option<&str>,
        settings: &ConvertSettings,
    ) -> Result<()> {
        check_input_format(input, input_format)?;
        check_output_format(output, output_format)?;

        let args = compose_args(
            &input.display().to_string(),
            input_format,
            &output.display().to_string(),
            output_format,
            settings,
            &self.config.log_level,
        );
        info!("Converting {} -> {}", input.display(), output.display());
        let mut task = self.build_task(args, Some(settings));
        task.start()?;
        task.wait()
    }

    /// Converts one file and streams the result into `sink`. Blocks until ffmpeg finishes.
    pub fn convert_media_to_stream(
        &self,
        input: &Path,
        input_format: Option<&str>,
        sink: impl Write + Send + 'static,
        output_format: &str,
        settings: &ConvertSettings,
    ) -> Result<()> {
        check_input_format(input, input_format)?;

        let mut task = self.convert_live(
            LiveInput::Source(input.display().to_string()),
            input_format,
            LiveOutput::stream(sink),
            Some(output_format),
            settings,
        )?;
        task.start()?;
        task.wait()
    }

    /// Mixes several inputs into one output file, e.g. a video and a separate audio track.
    ///
    /// Seek and silent-audio options of `settings` do not apply here.
    pub fn convert_media_multi(
        &self,
        inputs: &[MediaInput],
        output: &Path,
        output_format: Option<&str>,
        settings: &ConvertSettings,
    ) -> Result<()> {
        check_output_format(output, output_format)?;
        let (last, settings) = multi_input_settings(inputs, settings)?;

        let args = compose_args(
            &last.input,
            None,
            &output.display().to_string(),
            output_format,
            &settings,
            &self.config.log_level,
        );
        info!("Converting {} inputs -> {}", inputs.len(), output.display());
        let mut task = self.build_task(args, Some(&settings));
        task.start()?;
        task.wait()
    }

    /// Joins files end to end with ffmpeg's `concat` filter.
    pub fn concat_media<P: AsRef<Path>>(
        &self,
        inputs: &[P],
        output: &Path,
        output_format: Option<&str>,
        settings: &ConcatSettings,
    ) -> Result<()> {
        if inputs.is_empty() {
            return Err(TranscodeError::invalid_argument(
                "at least one input is required",
            ));
        }
        let missing = inputs
            .iter()
            .map(|input| input.as_ref())
            .find(|path| !path.is_file());
        if let Some(missing) = missing {
            return Err(TranscodeError::invalid_argument(format!(
                "cannot find input file: {}",
                missing.display()
            )));
        }

        let args = compose_concat_args(
            inputs,
            &output.display().to_string(),
            output_format,
            settings,
            &self.config.log_level,
        );
        info!("Concatenating {} files -> {}", inputs.len(), output.display());
        let mut task = self
            .build_task(args, None)
            .with_progress_window(None, settings.output.max_duration);
        task.start()?;
        task.wait()
    }

    /// Grabs a single frame as JPEG, optionally at `frame_time`.
    pub fn video_thumbnail(
        &self,
        input: &Path,
        output: &Path,
        frame_time: Option<Duration>,
    ) -> Result<()> {
        self.convert_media(input, None, output, Some("mjpeg"), &thumbnail_settings(frame_time))
    }

    /// Like [`video_thumbnail`](Self::video_thumbnail), writing the JPEG into `sink`.
    pub fn video_thumbnail_to_stream(
        &self,
        input: &Path,
        sink: impl Write + Send + 'static,
        frame_time: Option<Duration>,
    ) -> Result<()> {
        self.convert_media_to_stream(input, None, sink, "mjpeg", &thumbnail_settings(frame_time))
    }

    /// Runs ffmpeg with a raw argument string.
    pub fn invoke(&self, args: &str) -> Result<()> {
        let mut task = self.build_task(args.to_string(), None);
        task.start()?;
        task.wait()
    }

    fn build_task(&self, args: String, settings: Option<&ConvertSettings>) -> LiveConversionTask {
        let spawn = SpawnConfig::new(self.config.resolve_executable(), args)
            .with_priority(self.config.priority)
            .with_user(self.config.user);
        let (seek, max_duration) = match settings {
            Some(settings) => (settings.seek, settings.max_duration),
            None => (None, None),
        };
        LiveConversionTask::new(spawn)
            .with_observers(self.observers.clone())
            .with_progress_window(seek, max_duration)
            .with_execution_timeout(self.config.execution_timeout())
    }
}

fn check_input_format(input: &Path, input_format: Option<&str>) -> Result<()> {
    if input.is_file() && input.extension().is_none() && input_format.is_none() {
        return Err(TranscodeError::invalid_argument(
            "input format is required for a file without extension",
        ));
    }
    Ok(())
}

fn check_output_format(output: &Path, output_format: Option<&str>) -> Result<()> {
    if output.extension().is_none() && output_format.is_none() {
        return Err(TranscodeError::invalid_argument(
            "output format is required for a file without extension",
        ));
    }
    Ok(())
}

fn thumbnail_settings(frame_time: Option<Duration>) -> ConvertSettings {
    let settings = ConvertSettings::new().with_video_frame_count(1);
    match frame_time {
        Some(frame_time) => settings.with_seek(frame_time),
        None => settings,
    }
}

/// Folds every input but the last into custom input arguments.
///
/// The last input becomes the main `-i`; its own format and custom arguments
/// go right before it.
fn multi_input_settings<'a>(
    inputs: &'a [MediaInput],
    settings: &ConvertSettings,
) -> Result<(&'a MediaInput, ConvertSettings)> {
    let Some((last, leading)) = inputs.split_last() else {
        return Err(TranscodeError::invalid_argument(
            "at least one input is required",
        ));
    };

    let mut args: Vec<String> = Vec::new();
    for input in leading {
        if let Some(format) = &input.format {
            args.push(format!("-f {}", format));
        }
        if let Some(custom) = &input.custom_input_args {
            args.push(custom.clone());
        }
        args.push(format!("-i {}", quote_arg(&input.input)));
    }
    if let Some(custom) = &last.custom_input_args {
        args.push(custom.clone());
    }
    if let Some(format) = &last.format {
        args.push(format!("-f {}", format));
    }

    let settings = ConvertSettings {
        seek: None,
        custom_input_args: (!args.is_empty()).then(|| args.join(" ")),
        append_silent_audio_stream: false,
        ..settings.clone()
    };
    Ok((last, settings))
}

fn seconds_arg(duration: Duration) -> String {
    duration.as_secs_f64().to_string()
}

/// Composes `-y -loglevel <level> [input args] -i <input> [output args] <output>`.
pub fn compose_args(
    input: &str,
    input_format: Option<&str>,
    output: &str,
    output_format: Option<&str>,
    settings: &ConvertSettings,
    log_level: &str,
) -> String {
    let mut args: Vec<String> = vec!["-y".into(), "-loglevel".into(), log_level.into()];

    if settings.append_silent_audio_stream {
        args.extend(["-f", "lavfi", "-i", "aevalsrc=0"].map(String::from));
    }
    if let Some(seek) = settings.seek {
        args.extend(["-ss".to_string(), seconds_arg(seek)]);
    }
    if let Some(format) = input_format {
        args.extend(["-f".to_string(), format.to_string()]);
    }
    if let Some(custom) = &settings.custom_input_args {
        args.push(custom.clone());
    }
    args.extend(["-i".to_string(), quote_arg(input)]);

    compose_output_args(&mut args, output, output_format, settings);
    if settings.append_silent_audio_stream {
        args.push("-shortest".into());
    }
    args.push(quote_arg(output));

    args.join(" ")
}

/// Composes `-y -loglevel <level> -i <a> -i <b> ... [output args] -filter_complex "concat=..." -map ... <output>`.
pub fn compose_concat_args<P: AsRef<Path>>(
    inputs: &[P],
    output: &str,
    output_format: Option<&str>,
    settings: &ConcatSettings,
    log_level: &str,
) -> String {
    let mut args: Vec<String> = vec!["-y".into(), "-loglevel".into(), log_level.into()];
    for input in inputs {
        args.extend([
            "-i".to_string(),
            quote_arg(&input.as_ref().display().to_string()),
        ]);
    }
    compose_output_args(&mut args, output, output_format, &settings.output);

    let mut labels = Vec::new();
    if settings.concat_video_stream {
        labels.push("[v]");
    }
    if settings.concat_audio_stream {
        labels.push("[a]");
    }
    let mut filter = format!(
        "concat=n={}:v={}:a={}",
        inputs.len(),
        u8::from(settings.concat_video_stream),
        u8::from(settings.concat_audio_stream)
    );
    for label in &labels {
        filter.push(' ');
        filter.push_str(label);
    }
    args.extend(["-filter_complex".to_string(), quote_arg(&filter)]);
    for label in labels {
        args.extend(["-map".to_string(), quote_arg(label)]);
    }

    args.push(quote_arg(output));
    args.join(" ")
}

fn compose_output_args(
    args: &mut Vec<String>,
    output: &str,
    output_format: Option<&str>,
    settings: &ConvertSettings,
) {
    let is_flv = output_format == Some("flv") || output.to_lowercase().ends_with(".flv");
    let audio_sample_rate = match settings.audio_sample_rate {
        Some(rate) => Some(rate),
        None if is_flv => Some(44100),
        None => None,
    };

    if let Some(max_duration) = settings.max_duration {
        args.extend(["-t".to_string(), seconds_arg(max_duration)]);
    }
    if let Some(format) = output_format {
        args.extend(["-f".to_string(), format.to_string()]);
    }
    if let Some(rate) = audio_sample_rate {
        args.extend(["-ar".to_string(), rate.to_string()]);
    }
    if let Some(codec) = &settings.audio_codec {
        args.extend(["-acodec".to_string(), codec.clone()]);
    }
    if let Some(count) = settings.video_frame_count {
        args.extend(["-vframes".to_string(), count.to_string()]);
    }
    if let Some(rate) = settings.video_frame_rate {
        args.extend(["-r".to_string(), rate.to_string()]);
    }
    if let Some(codec) = &settings.video_codec {
        args.extend(["-vcodec".to_string(), codec.clone()]);
    }
    if let Some(size) = &settings.video_frame_size {
        args.extend(["-s".to_string(), size.clone()]);
    }
    if let Some(custom) = &settings.custom_output_args {
        args.push(custom.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::args::split_args;
    use std::io::Cursor;

    #[test]
    fn composes_piped_conversion() {
        let settings = ConvertSettings::new()
            .with_seek(Duration::from_secs(10))
            .with_max_duration(Duration::from_millis(30_500))
            .with_video_codec("libx264");
        let args = compose_args("-", Some("mpegts"), "-", Some("mp4"), &settings, "info");
        assert_eq!(
            args,
            r#"-y -loglevel info -ss 10 -f mpegts -i "-" -t 30.5 -f mp4 -vcodec libx264 "-""#
        );
    }

    #[test]
    fn silent_audio_wraps_the_inputs() {
        let settings = ConvertSettings::new().with_silent_audio_stream();
        let args = compose_args("in.mp4", None, "out.mp4", None, &settings, "error");
        assert_eq!(
            split_args(&args),
            vec![
                "-y", "-loglevel", "error", "-f", "lavfi", "-i", "aevalsrc=0", "-i", "in.mp4",
                "-shortest", "out.mp4",
            ]
        );
    }

    #[test]
    fn flv_output_gets_default_sample_rate() {
        let settings = ConvertSettings::new();
        let args = compose_args("in.mp4", None, "/tmp/Out.FLV", None, &settings, "info");
        assert!(args.contains("-ar 44100"));

        let settings = ConvertSettings::new().with_audio_sample_rate(22050);
        let args = compose_args("in.mp4", None, "-", Some("flv"), &settings, "info");
        assert!(args.contains("-ar 22050"));
        assert!(!args.contains("44100"));
    }

    #[test]
    fn output_flags_follow_settings() {
        let settings = ConvertSettings::new()
            .with_audio_codec("aac")
            .with_video_frame_count(1)
            .with_video_frame_rate(25)
            .with_video_frame_size(640, 360)
            .with_custom_input_args("-re")
            .with_custom_output_args("-movflags +faststart");
        let args = split_args(&compose_args(
            "/media/my clip.mkv",
            None,
            "/media/out.mp4",
            None,
            &settings,
            "info",
        ));
        assert_eq!(
            args,
            vec![
                "-y",
                "-loglevel",
                "info",
                "-re",
                "-i",
                "/media/my clip.mkv",
                "-acodec",
                "aac",
                "-vframes",
                "1",
                "-r",
                "25",
                "-s",
                "640x360",
                "-movflags",
                "+faststart",
                "/media/out.mp4",
            ]
        );
    }

    #[test]
    fn leading_inputs_become_custom_input_args() {
        let inputs = vec![
            MediaInput::new("/media/video.mp4"),
            MediaInput::new("/media/track.raw")
                .with_format("s16le")
                .with_custom_input_args("-ar 48000"),
        ];
        let base = ConvertSettings::new()
            .with_seek(Duration::from_secs(3))
            .with_silent_audio_stream()
            .with_video_codec("copy");
        let (last, settings) = multi_input_settings(&inputs, &base).unwrap();
        assert_eq!(last.input, "/media/track.raw");
        assert_eq!(settings.seek, None);
        assert!(!settings.append_silent_audio_stream);

        let args = split_args(&compose_args(
            &last.input,
            None,
            "/media/out.mkv",
            None,
            &settings,
            "info",
        ));
        assert_eq!(
            args,
            vec![
                "-y",
                "-loglevel",
                "info",
                "-i",
                "/media/video.mp4",
                "-ar",
                "48000",
                "-f",
                "s16le",
                "-i",
                "/media/track.raw",
                "-vcodec",
                "copy",
                "/media/out.mkv",
            ]
        );
    }

    #[test]
    fn multi_input_needs_an_input() {
        assert!(matches!(
            multi_input_settings(&[], &ConvertSettings::new()),
            Err(TranscodeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn concat_maps_filter_outputs() {
        let args = compose_concat_args(
            &["a.mp4", "b.mp4"],
            "out.mp4",
            None,
            &ConcatSettings::new(),
            "info",
        );
        assert_eq!(
            args,
            r#"-y -loglevel info -i "a.mp4" -i "b.mp4" -filter_complex "concat=n=2:v=1:a=1 [v] [a]" -map "[v]" -map "[a]" "out.mp4""#
        );
    }

    #[test]
    fn concat_audio_only() {
        let settings = ConcatSettings::new()
            .without_video()
            .with_output_settings(ConvertSettings::new().with_audio_codec("aac"));
        let args = split_args(&compose_concat_args(
            &["a.m4a", "b.m4a", "c.m4a"],
            "out.m4a",
            None,
            &settings,
            "error",
        ));
        assert_eq!(
            args,
            vec![
                "-y",
                "-loglevel",
                "error",
                "-i",
                "a.m4a",
                "-i",
                "b.m4a",
                "-i",
                "c.m4a",
                "-acodec",
                "aac",
                "-filter_complex",
                "concat=n=3:v=0:a=1 [a]",
                "-map",
                "[a]",
                "out.m4a",
            ]
        );
    }

    #[test]
    fn concat_rejects_missing_inputs() {
        let transcoder = Transcoder::new(TranscoderConfig::default());
        let result = transcoder.concat_media(
            &["/nonexistent/a.mp4"],
            Path::new("/tmp/out.mp4"),
            None,
            &ConcatSettings::new(),
        );
        assert!(matches!(
            result,
            Err(TranscodeError::InvalidArgument { .. })
        ));

        let none: [&str; 0] = [];
        let result =
            transcoder.concat_media(&none, Path::new("/tmp/out.mp4"), None, &ConcatSettings::new());
        assert!(matches!(
            result,
            Err(TranscodeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn streamed_output_requires_format() {
        let transcoder = Transcoder::new(TranscoderConfig::default());
        let result = transcoder.convert_live(
            LiveInput::stream(Cursor::new(Vec::new())),
            Some("mpegts"),
            LiveOutput::stream(Vec::new()),
            None,
            &ConvertSettings::new(),
        );
        assert!(matches!(
            result,
            Err(TranscodeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn output_file_without_extension_requires_format() {
        let transcoder = Transcoder::new(TranscoderConfig::default());
        let result = transcoder.convert_media(
            Path::new("/nonexistent/in.mp4"),
            None,
            Path::new("/tmp/out"),
            None,
            &ConvertSettings::new(),
        );
        assert!(matches!(
            result,
            Err(TranscodeError::InvalidArgument { .. })
        ));
    }
}
