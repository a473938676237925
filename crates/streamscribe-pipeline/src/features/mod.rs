//! Streaming feature pipeline
//!
//! Accepts PCM samples as they arrive, turns them into fbank frames, and
//! hands them out in encoder-sized chunks. The producer side
//! (`accept_pcm`, `set_input_finished`) never blocks; the consumer side
//! (`read_chunk`) reports when it needs more audio or when the stream is
//! exhausted.

mod fbank;

pub use fbank::Fbank;

use std::collections::VecDeque;

use streamscribe_config::FeatureConfig;

/// Outcome of one chunk read.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkRead {
    /// A full chunk of frames.
    Chunk(Vec<Vec<f32>>),
    /// The stream is finished; whatever frames remained (possibly a short
    /// chunk, possibly none).
    EndOfStream(Vec<Vec<f32>>),
    /// Not enough frames yet and the stream is still open.
    WaitMore,
}

/// Buffers PCM and produces fbank frames on demand.
pub struct FeaturePipeline {
    fbank: Fbank,
    frames: VecDeque<Vec<f32>>,
    input_finished: bool,
}

impl FeaturePipeline {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            fbank: Fbank::new(config),
            frames: VecDeque::new(),
            input_finished: false,
        }
    }

    /// Append samples (float-valued 16-bit PCM) and extract every frame
    /// they complete.
    pub fn accept_pcm(&mut self, samples: &[f32]) {
        for frame in self.fbank.accept(samples) {
            self.frames.push_back(frame);
        }
    }

    /// Mark the end of the stream. Buffered samples shorter than one
    /// window are dropped; buffered frames stay readable.
    pub fn set_input_finished(&mut self) {
        self.input_finished = true;
    }

    pub fn input_finished(&self) -> bool {
        self.input_finished
    }

    /// Number of frames ready to read.
    pub fn num_frames_ready(&self) -> usize {
        self.frames.len()
    }

    /// Read up to one chunk of `chunk_frames` frames.
    pub fn read_chunk(&mut self, chunk_frames: usize) -> ChunkRead {
        if self.frames.len() >= chunk_frames && chunk_frames > 0 {
            let chunk = self.frames.drain(..chunk_frames).collect();
            return ChunkRead::Chunk(chunk);
        }
        if !self.input_finished {
            return ChunkRead::WaitMore;
        }
        ChunkRead::EndOfStream(self.frames.drain(..).collect())
    }

    /// Rewind to the pre-stream state.
    pub fn reset(&mut self) {
        self.fbank.reset();
        self.frames.clear();
        self.input_finished = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> FeaturePipeline {
        FeaturePipeline::new(&FeatureConfig::default())
    }

    fn samples(n: usize) -> Vec<f32> {
        (0..n).map(|i| (i as f32 * 0.02).sin() * 800.0).collect()
    }

    #[test]
    fn test_wait_more_until_enough_frames() {
        let mut fp = pipeline();
        // 100 ms: (1600 - 400) / 160 + 1 = 8 frames
        fp.accept_pcm(&samples(1600));
        assert_eq!(fp.num_frames_ready(), 8);
        assert_eq!(fp.read_chunk(64), ChunkRead::WaitMore);
        // frames are kept for the next read
        assert_eq!(fp.num_frames_ready(), 8);
    }

    #[test]
    fn test_full_chunk_then_tail() {
        let mut fp = pipeline();
        // 1.28 s -> 126 frames
        fp.accept_pcm(&samples(20480));
        fp.set_input_finished();

        match fp.read_chunk(64) {
            ChunkRead::Chunk(frames) => assert_eq!(frames.len(), 64),
            other => panic!("expected a full chunk, got {:?}", other),
        }
        match fp.read_chunk(64) {
            ChunkRead::EndOfStream(tail) => assert_eq!(tail.len(), 62),
            other => panic!("expected the tail, got {:?}", other),
        }
        match fp.read_chunk(64) {
            ChunkRead::EndOfStream(tail) => assert!(tail.is_empty()),
            other => panic!("expected an empty end, got {:?}", other),
        }
    }

    #[test]
    fn test_finished_empty_stream() {
        let mut fp = pipeline();
        fp.set_input_finished();
        assert_eq!(fp.read_chunk(64), ChunkRead::EndOfStream(Vec::new()));
    }

    #[test]
    fn test_reset_rewinds_everything() {
        let mut fp = pipeline();
        fp.accept_pcm(&samples(20480));
        fp.set_input_finished();
        fp.reset();

        assert!(!fp.input_finished());
        assert_eq!(fp.num_frames_ready(), 0);
        assert_eq!(fp.read_chunk(64), ChunkRead::WaitMore);

        // behaves like a fresh pipeline afterwards
        fp.accept_pcm(&samples(20480));
        assert_eq!(fp.num_frames_ready(), 126);
    }
}
