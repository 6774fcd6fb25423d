mod common;

#[cfg(test)]
mod tests {
    use crate::common::confirm_action;
    use crate::common::print_error;
    use crate::common::print_header;
    use crate::common::print_info;
    use crate::common::print_success;
    use avatar_runtime::audio::playback::{AudioOutput, CpalOutput, Playback};
    use avatar_runtime::audio::{AudioCapture, AudioClip};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    #[ignore = "Requires microphone and user interaction"]
    async fn test_microphone_records_a_clip() {
        print_header("Microphone Clip Recording");

        print_info("This test records three seconds and encodes them as a clip.");
        print_info("Please ensure your microphone is connected.");

        if !confirm_action("Ready to record? (y/n)") {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut capture = AudioCapture::new(16000, 1)
            .expect("Failed to create audio capture. Check microphone permissions.");
        capture.start(tx).expect("Failed to start audio capture");

        let mut samples = Vec::new();
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
        while let Ok(Some(chunk)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            samples.extend(chunk);
        }
        capture.stop();

        if samples.is_empty() {
            print_error("No audio chunks received");
            print_info("Consider checking:");
            print_info("- Microphone connection");
            print_info("- Microphone permissions");
            return;
        }

        let clip = AudioClip::encode(&samples, capture.sample_rate()).expect("Failed to encode clip");
        print_success(&format!(
            "Recorded {} samples into a {} byte clip",
            clip.sample_count(),
            clip.bytes().len()
        ));
    }

    #[tokio::test]
    #[ignore = "Requires speakers and user interaction"]
    async fn test_speaker_plays_tone() {
        print_header("Speaker Tone Playback");

        if !confirm_action("Ready to hear a one second tone? (y/n)") {
            return;
        }

        let sample_rate = 16000;
        let tone: Vec<f32> = (0..sample_rate)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / sample_rate as f32).sin() * 0.3)
            .collect();
        let playback = Arc::new(Playback::new(1, tone, sample_rate));

        let output = CpalOutput::new().expect("Failed to open output device");
        output
            .start(Arc::clone(&playback))
            .expect("Failed to start playback");

        tokio::time::sleep(tokio::time::Duration::from_millis(1500)).await;

        if playback.is_finished() {
            print_success("Tone played to the end");
        } else {
            print_error("Playback did not finish");
        }
    }
}
