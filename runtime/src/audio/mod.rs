pub mod analysis;
pub mod capture;
pub mod playback;
pub mod recorder;

pub use capture::AudioCapture;
pub use playback::{InboundAudioPayload, PlaybackEngine, SpeechPlayer};
pub use recorder::{AudioClip, CaptureController, ClipSink, Focus, InputEvent, RecordingState};
