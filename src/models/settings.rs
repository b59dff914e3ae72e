use std::time::Duration;

/// Per-conversion options. Built once and passed by reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertSettings {
    pub seek: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub audio_sample_rate: Option<u32>,
    pub audio_codec: Option<String>,
    pub video_frame_rate: Option<u32>,
    pub video_frame_count: Option<u32>,
    pub video_frame_size: Option<String>,
    pub video_codec: Option<String>,
    pub custom_input_args: Option<String>,
    pub custom_output_args: Option<String>,
    /// Mixes a generated silent track into the output (`-f lavfi -i aevalsrc=0`).
    pub append_silent_audio_stream: bool,
}

impl ConvertSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seek(mut self, seek: Duration) -> Self {
        self.seek = Some(seek);
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    pub fn with_audio_sample_rate(mut self, rate: u32) -> Self {
        self.audio_sample_rate = Some(rate);
        self
    }

    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = Some(codec.into());
        self
    }

    pub fn with_video_frame_rate(mut self, rate: u32) -> Self {
        self.video_frame_rate = Some(rate);
        self
    }

    pub fn with_video_frame_count(mut self, count: u32) -> Self {
        self.video_frame_count = Some(count);
        self
    }

    pub fn with_video_frame_size(mut self, width: u32, height: u32) -> Self {
        self.video_frame_size = Some(format!("{}x{}", width, height));
        self
    }

    pub fn with_video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = Some(codec.into());
        self
    }

    pub fn with_custom_input_args(mut self, args: impl Into<String>) -> Self {
        self.custom_input_args = Some(args.into());
        self
    }

    pub fn with_custom_output_args(mut self, args: impl Into<String>) -> Self {
        self.custom_output_args = Some(args.into());
        self
    }

    pub fn with_silent_audio_stream(mut self) -> Self {
        self.append_silent_audio_stream = true;
        self
    }
}

/// One input of a multi-input conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInput {
    /// File path or url, as ffmpeg should open it.
    pub input: String,
    pub format: Option<String>,
    pub custom_input_args: Option<String>,
}

impl MediaInput {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            format: None,
            custom_input_args: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_custom_input_args(mut self, args: impl Into<String>) -> Self {
        self.custom_input_args = Some(args.into());
        self
    }
}

/// Options for joining several files with the `concat` filter.
///
/// Only the output side of `output` is used; seek and input arguments are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatSettings {
    pub output: ConvertSettings,
    pub concat_video_stream: bool,
    pub concat_audio_stream: bool,
}

impl Default for ConcatSettings {
    fn default() -> Self {
        Self {
            output: ConvertSettings::default(),
            concat_video_stream: true,
            concat_audio_stream: true,
        }
    }
}

impl ConcatSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_settings(mut self, output: ConvertSettings) -> Self {
        self.output = output;
        self
    }

    pub fn without_video(mut self) -> Self {
        self.concat_video_stream = false;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.concat_audio_stream = false;
        self
    }
}
