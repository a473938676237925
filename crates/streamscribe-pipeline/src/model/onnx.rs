//! ONNX Runtime backend
//!
//! A [`ModelResource`] loads the three graphs from a model directory and
//! is immutable afterwards; it is shared across sessions by reference.
//! An [`OnnxAsrModel`] is one stream's mutable session over that
//! resource: the attention/convolution caches, the accumulated encoder
//! output, and the feature overlap between chunks.

use std::path::Path;
use std::sync::Arc;

use ndarray::{concatenate, Array1, Array2, Array3, Array4, Axis, Ix3, Ix4};
use ort::{GraphOptimizationLevel, Session};

use streamscribe_config::ModelConfig;
use streamscribe_core::{Error, Result};

use super::{AsrModel, ModelMeta};

const ENCODER_INPUTS: [&str; 6] = [
    "chunk",
    "offset",
    "required_cache_size",
    "att_cache",
    "cnn_cache",
    "att_mask",
];
const RESCORE_INPUTS: [&str; 3] = ["hyps_pad", "hyps_lens", "encoder_out"];

/// Read-only bundle shared by every session decoding with the same model.
pub struct ModelResource {
    encoder: Session,
    ctc: Session,
    rescore: Session,
    meta: ModelMeta,
    /// Declared encoder outputs: encoded, new attention cache, new
    /// convolution cache.
    encoder_out_names: Vec<String>,
    ctc_in_name: String,
    ctc_out_name: String,
    /// Declared rescoring outputs: left-to-right and right-to-left
    /// log-probabilities.
    rescore_out_names: Vec<String>,
}

impl ModelResource {
    /// Load `encoder.onnx`, `ctc.onnx` and `decoder.onnx` from a model
    /// directory and read the encoder's embedded metadata.
    pub fn load(model_dir: impl AsRef<Path>, config: &ModelConfig) -> Result<Self> {
        let dir = model_dir.as_ref();
        let encoder = load_session(&dir.join("encoder.onnx"), config.num_threads)?;
        let ctc = load_session(&dir.join("ctc.onnx"), config.num_threads)?;
        let rescore = load_session(&dir.join("decoder.onnx"), config.num_threads)?;

        let meta = read_meta(&encoder)?;
        tracing::info!(
            output_size = meta.output_size,
            num_blocks = meta.num_blocks,
            head = meta.head,
            cnn_module_kernel = meta.cnn_module_kernel,
            subsampling_rate = meta.subsampling_rate,
            right_context = meta.right_context,
            sos = meta.sos,
            eos = meta.eos,
            is_bidirectional_decoder = meta.is_bidirectional_decoder,
            chunk_size = meta.chunk_size,
            num_left_chunks = meta.num_left_chunks,
            "loaded model"
        );

        log_graph_io("encoder", &encoder);
        log_graph_io("ctc", &ctc);
        log_graph_io("rescore", &rescore);

        for name in ENCODER_INPUTS {
            if !encoder.inputs.iter().any(|input| input.name == name) {
                return Err(Error::Config(format!(
                    "encoder graph is missing input {:?}",
                    name
                )));
            }
        }
        let encoder_out_names: Vec<String> =
            encoder.outputs.iter().map(|o| o.name.clone()).collect();
        if encoder_out_names.len() < 3 {
            return Err(Error::config(
                "encoder graph must produce encoded, new_att_cache, new_cnn_cache",
            ));
        }

        let ctc_in_name = ctc
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| Error::config("ctc graph has no input"))?;
        let ctc_out_name = ctc
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| Error::config("ctc graph has no output"))?;

        for name in RESCORE_INPUTS {
            if !rescore.inputs.iter().any(|input| input.name == name) {
                return Err(Error::Config(format!(
                    "decoder graph is missing input {:?}",
                    name
                )));
            }
        }
        let rescore_out_names: Vec<String> =
            rescore.outputs.iter().map(|o| o.name.clone()).collect();
        if rescore_out_names.len() < 2 {
            return Err(Error::config(
                "decoder graph must produce left and right log-probabilities",
            ));
        }

        Ok(Self {
            encoder,
            ctc,
            rescore,
            meta,
            encoder_out_names,
            ctc_in_name,
            ctc_out_name,
            rescore_out_names,
        })
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }
}

fn load_session(path: &Path, num_threads: usize) -> Result<Session> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "model file not found: {}",
            path.display()
        )));
    }
    Session::builder()
        .map_err(|e| Error::Config(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| Error::Config(e.to_string()))?
        .with_intra_threads(num_threads)
        .map_err(|e| Error::Config(e.to_string()))?
        .with_inter_threads(num_threads)
        .map_err(|e| Error::Config(e.to_string()))?
        .commit_from_file(path)
        .map_err(|e| Error::Config(format!("failed to load {}: {}", path.display(), e)))
}

fn read_meta(encoder: &Session) -> Result<ModelMeta> {
    let metadata = encoder
        .metadata()
        .map_err(|e| Error::Config(format!("failed to read encoder metadata: {}", e)))?;

    let lookup = |key: &str| -> Result<i64> {
        metadata
            .custom(key)
            .map_err(|e| Error::Config(format!("failed to read metadata key {}: {}", key, e)))?
            .ok_or_else(|| Error::Config(format!("missing metadata key {}", key)))?
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::Config(format!("metadata key {} is not an integer", key)))
    };

    let meta = ModelMeta {
        output_size: lookup("output_size")? as usize,
        num_blocks: lookup("num_blocks")? as usize,
        head: lookup("head")? as usize,
        cnn_module_kernel: lookup("cnn_module_kernel")? as usize,
        subsampling_rate: lookup("subsampling_rate")? as usize,
        right_context: lookup("right_context")? as usize,
        sos: lookup("sos_symbol")?,
        eos: lookup("eos_symbol")?,
        is_bidirectional_decoder: lookup("is_bidirectional_decoder")? != 0,
        chunk_size: lookup("chunk_size")? as usize,
        num_left_chunks: lookup("left_chunks")?,
    };

    if meta.head == 0 || meta.output_size % meta.head != 0 {
        return Err(Error::Config(format!(
            "output_size {} is not divisible by head {}",
            meta.output_size, meta.head
        )));
    }
    if meta.cnn_module_kernel == 0 || meta.subsampling_rate == 0 || meta.chunk_size == 0 {
        return Err(Error::config(
            "cnn_module_kernel, subsampling_rate and chunk_size must be positive",
        ));
    }
    Ok(meta)
}

fn log_graph_io(name: &str, session: &Session) {
    for input in &session.inputs {
        tracing::debug!(graph = name, input = %input.name, "graph input");
    }
    for output in &session.outputs {
        tracing::debug!(graph = name, output = %output.name, "graph output");
    }
}

/// Raw `chunk_size × num_left_chunks` scalar fed to the encoder graph.
/// Unlike the cache array length this is not clamped: a non-positive
/// value is the sentinel the graph's internal slicing keys off for
/// unlimited history.
fn required_cache_size_input(meta: &ModelMeta) -> i64 {
    meta.chunk_size as i64 * meta.num_left_chunks
}

/// Attention mask over the cache plus the current chunk. While fewer
/// than `num_left_chunks` chunks have been seen, the leading cache
/// positions that are still zero padding are masked off.
fn build_att_mask(
    offset: i64,
    chunk_size: usize,
    num_left_chunks: i64,
    cache_len: usize,
) -> Array3<bool> {
    let len = cache_len + chunk_size;
    let mut mask = Array3::from_elem((1, 1, len), true);
    if num_left_chunks > 0 {
        let chunks_seen = offset / chunk_size as i64 - num_left_chunks;
        if chunks_seen < num_left_chunks {
            let masked = ((num_left_chunks - chunks_seen) as usize * chunk_size).min(len);
            for i in 0..masked {
                mask[[0, 0, i]] = false;
            }
        }
    }
    mask
}

/// Pad hypotheses with a leading `sos` and trailing zeros to a common
/// length; the lengths vector records true lengths (including `sos`).
fn pad_hypotheses(hyps: &[Vec<i32>], sos: i64) -> (Array2<i64>, Array1<i64>) {
    let max_len = hyps.iter().map(|h| h.len()).max().unwrap_or(0) + 1;
    let mut pad = Array2::<i64>::zeros((hyps.len(), max_len));
    let mut lens = Array1::<i64>::zeros(hyps.len());
    for (i, hyp) in hyps.iter().enumerate() {
        pad[[i, 0]] = sos;
        for (j, &token) in hyp.iter().enumerate() {
            pad[[i, j + 1]] = token as i64;
        }
        lens[i] = hyp.len() as i64 + 1;
    }
    (pad, lens)
}

/// Score of one hypothesis under one decoder direction: token
/// log-probabilities along the hypothesis plus `eos` at its end.
fn attention_score(probs: &Array3<f32>, hyp_index: usize, hyp: &[i32], eos: i64) -> f32 {
    let mut score = 0.0f32;
    for (j, &token) in hyp.iter().enumerate() {
        score += probs[[hyp_index, j, token as usize]];
    }
    score + probs[[hyp_index, hyp.len(), eos as usize]]
}

/// Blend the two decoder directions.
fn combine_scores(left: f32, right: f32, reverse_weight: f32) -> f32 {
    left * (1.0 - reverse_weight) + right * reverse_weight
}

/// One stream's mutable session over a shared [`ModelResource`].
pub struct OnnxAsrModel {
    resource: Arc<ModelResource>,
    /// Subsampled frames consumed so far (starts at the cache length so
    /// that attention at chunk 0 only sees padding).
    offset: i64,
    att_cache: Array4<f32>,
    cnn_cache: Array4<f32>,
    /// Per-chunk encoder output, retained for rescoring.
    encoder_outs: Vec<Array3<f32>>,
    /// Trailing input frames re-prepended to the next chunk.
    cached_feature: Vec<Vec<f32>>,
}

impl OnnxAsrModel {
    pub fn new(resource: Arc<ModelResource>) -> Self {
        let mut model = Self {
            resource,
            offset: 0,
            att_cache: Array4::zeros((0, 0, 0, 0)),
            cnn_cache: Array4::zeros((0, 0, 0, 0)),
            encoder_outs: Vec::new(),
            cached_feature: Vec::new(),
        };
        model.reset_session();
        model
    }

    fn reset_session(&mut self) {
        let meta = &self.resource.meta;
        let cache_len = meta.required_cache_size();
        let head_dim2 = meta.output_size / meta.head * 2;

        self.offset = cache_len as i64;
        self.att_cache = Array4::zeros((meta.num_blocks, meta.head, cache_len, head_dim2));
        self.cnn_cache = Array4::zeros((
            meta.num_blocks,
            1,
            meta.output_size,
            meta.cnn_module_kernel - 1,
        ));
        self.encoder_outs.clear();
        self.cached_feature.clear();
    }

    fn check_cache_shapes(&self) -> Result<()> {
        let meta = &self.resource.meta;
        let head_dim2 = meta.output_size / meta.head * 2;

        let att = self.att_cache.shape();
        if att[0] != meta.num_blocks || att[1] != meta.head || att[3] != head_dim2 {
            return Err(Error::Internal(format!(
                "attention cache shape mismatch: {:?}",
                att
            )));
        }
        if meta.num_left_chunks > 0 && att[2] != meta.required_cache_size() {
            return Err(Error::Internal(format!(
                "attention cache length {} != {}",
                att[2],
                meta.required_cache_size()
            )));
        }

        let cnn = self.cnn_cache.shape();
        if cnn[0] != meta.num_blocks
            || cnn[1] != 1
            || cnn[2] != meta.output_size
            || cnn[3] != meta.cnn_module_kernel - 1
        {
            return Err(Error::Internal(format!(
                "convolution cache shape mismatch: {:?}",
                cnn
            )));
        }
        Ok(())
    }
}

impl AsrModel for OnnxAsrModel {
    fn meta(&self) -> &ModelMeta {
        &self.resource.meta
    }

    fn reset(&mut self) {
        self.reset_session();
    }

    fn forward_encoder_chunk(&mut self, frames: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        if frames.is_empty() {
            return Ok(Vec::new());
        }
        let meta = &self.resource.meta;
        let feature_dim = frames[0].len();

        // splice the cached overlap in front of the new frames
        let num_frames = self.cached_feature.len() + frames.len();
        let mut feats = Vec::with_capacity(num_frames * feature_dim);
        for frame in self.cached_feature.iter().chain(frames.iter()) {
            if frame.len() != feature_dim {
                return Err(Error::internal("inconsistent feature dimension in chunk"));
            }
            feats.extend_from_slice(frame);
        }
        let chunk = Array3::from_shape_vec((1, num_frames, feature_dim), feats)
            .map_err(|e| Error::Internal(format!("bad chunk shape: {}", e)))?;

        let offset = ndarray::arr0(self.offset);
        let required_cache_size = ndarray::arr0(required_cache_size_input(meta));
        let att_mask = build_att_mask(
            self.offset,
            meta.chunk_size,
            meta.num_left_chunks,
            self.att_cache.shape()[2],
        );

        let names = &self.resource.encoder_out_names;
        let (encoded, new_att_cache, new_cnn_cache) = {
            let outputs = self
                .resource
                .encoder
                .run(
                    ort::inputs![
                        "chunk" => chunk.view(),
                        "offset" => offset.view(),
                        "required_cache_size" => required_cache_size.view(),
                        "att_cache" => self.att_cache.view(),
                        "cnn_cache" => self.cnn_cache.view(),
                        "att_mask" => att_mask.view(),
                    ]
                    .map_err(|e| Error::Inference(e.to_string()))?,
                )
                .map_err(|e| Error::Inference(format!("encoder failed: {}", e)))?;

            let encoded = outputs
                .get(names[0].as_str())
                .ok_or_else(|| Error::Inference(format!("missing encoder output {}", names[0])))?
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Inference(e.to_string()))?
                .to_owned()
                .into_dimensionality::<Ix3>()
                .map_err(|e| Error::Internal(format!("encoded is not rank 3: {}", e)))?;
            let new_att_cache = outputs
                .get(names[1].as_str())
                .ok_or_else(|| Error::Inference(format!("missing encoder output {}", names[1])))?
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Inference(e.to_string()))?
                .to_owned()
                .into_dimensionality::<Ix4>()
                .map_err(|e| Error::Internal(format!("attention cache is not rank 4: {}", e)))?;
            let new_cnn_cache = outputs
                .get(names[2].as_str())
                .ok_or_else(|| Error::Inference(format!("missing encoder output {}", names[2])))?
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Inference(e.to_string()))?
                .to_owned()
                .into_dimensionality::<Ix4>()
                .map_err(|e| Error::Internal(format!("convolution cache is not rank 4: {}", e)))?;
            (encoded, new_att_cache, new_cnn_cache)
        };

        self.offset += encoded.shape()[1] as i64;
        self.att_cache = new_att_cache;
        self.cnn_cache = new_cnn_cache;
        self.check_cache_shapes()?;

        let log_probs = {
            let outputs = self
                .resource
                .ctc
                .run(
                    ort::inputs![
                        self.resource.ctc_in_name.as_str() => encoded.view(),
                    ]
                    .map_err(|e| Error::Inference(e.to_string()))?,
                )
                .map_err(|e| Error::Inference(format!("ctc failed: {}", e)))?;
            outputs
                .get(self.resource.ctc_out_name.as_str())
                .ok_or_else(|| {
                    Error::Inference(format!("missing ctc output {}", self.resource.ctc_out_name))
                })?
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Inference(e.to_string()))?
                .to_owned()
                .into_dimensionality::<Ix3>()
                .map_err(|e| Error::Internal(format!("ctc output is not rank 3: {}", e)))?
        };

        self.encoder_outs.push(encoded);

        // keep the conv lookahead overlap for the next chunk
        let keep = meta.right_context.min(num_frames);
        let mut input_frames: Vec<Vec<f32>> = self
            .cached_feature
            .drain(..)
            .chain(frames.iter().cloned())
            .collect();
        self.cached_feature = input_frames.split_off(num_frames - keep);

        let (t_out, vocab) = (log_probs.shape()[1], log_probs.shape()[2]);
        let mut out = Vec::with_capacity(t_out);
        for t in 0..t_out {
            out.push((0..vocab).map(|v| log_probs[[0, t, v]]).collect());
        }
        tracing::debug!(
            input_frames = num_frames,
            encoder_frames = t_out,
            offset = self.offset,
            "encoded chunk"
        );
        Ok(out)
    }

    fn attention_rescore(&mut self, hyps: &[Vec<i32>], reverse_weight: f32) -> Result<Vec<f32>> {
        if hyps.is_empty() {
            return Ok(Vec::new());
        }
        if self.encoder_outs.is_empty() {
            return Ok(vec![0.0; hyps.len()]);
        }
        let meta = &self.resource.meta;

        let views: Vec<_> = self.encoder_outs.iter().map(|a| a.view()).collect();
        let encoder_out = concatenate(Axis(1), &views)
            .map_err(|e| Error::Internal(format!("failed to join encoder output: {}", e)))?;

        let (hyps_pad, hyps_lens) = pad_hypotheses(hyps, meta.sos);

        let out_names = &self.resource.rescore_out_names;
        let (left_probs, right_probs) = {
            let outputs = self
                .resource
                .rescore
                .run(
                    ort::inputs![
                        "hyps_pad" => hyps_pad.view(),
                        "hyps_lens" => hyps_lens.view(),
                        "encoder_out" => encoder_out.view(),
                    ]
                    .map_err(|e| Error::Inference(e.to_string()))?,
                )
                .map_err(|e| Error::Inference(format!("rescoring decoder failed: {}", e)))?;

            let left = outputs
                .get(out_names[0].as_str())
                .ok_or_else(|| Error::Inference(format!("missing decoder output {}", out_names[0])))?
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Inference(e.to_string()))?
                .to_owned()
                .into_dimensionality::<Ix3>()
                .map_err(|e| Error::Internal(format!("decoder output is not rank 3: {}", e)))?;
            let right = outputs
                .get(out_names[1].as_str())
                .ok_or_else(|| Error::Inference(format!("missing decoder output {}", out_names[1])))?
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Inference(e.to_string()))?
                .to_owned()
                .into_dimensionality::<Ix3>()
                .map_err(|e| Error::Internal(format!("decoder output is not rank 3: {}", e)))?;
            (left, right)
        };

        let mut scores = Vec::with_capacity(hyps.len());
        for (i, hyp) in hyps.iter().enumerate() {
            let left = attention_score(&left_probs, i, hyp, meta.eos);
            let right = if meta.is_bidirectional_decoder && reverse_weight > 0.0 {
                let reversed: Vec<i32> = hyp.iter().rev().copied().collect();
                attention_score(&right_probs, i, &reversed, meta.eos)
            } else {
                0.0
            };
            scores.push(combine_scores(left, right, reverse_weight));
        }
        Ok(scores)
    }

    fn duplicate(&self) -> Box<dyn AsrModel> {
        Box::new(OnnxAsrModel::new(self.resource.clone()))
    }
}
