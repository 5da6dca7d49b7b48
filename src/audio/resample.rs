//! Sample rate conversion with rubato
//!
//! Capture devices run at whatever rate the hardware likes and speakers
//! may refuse the wire rate, so audio crosses rates in both directions.

use anyhow::{anyhow, bail, Result};
use rubato::{FftFixedIn, Resampler};

/// Input frames handed to the resampler per call
const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

fn fft_resampler(from_rate: u32, to_rate: u32) -> Result<FftFixedIn<f32>> {
    if from_rate == 0 || to_rate == 0 {
        bail!("Cannot resample {}Hz to {}Hz", from_rate, to_rate);
    }

    FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_SIZE,
        SUB_CHUNKS,
        1,
    )
    .map_err(|e| anyhow!("Resampler init failed: {}", e))
}

/// Resample a complete mono buffer
///
/// The result is aligned with the input (resampler delay removed) and
/// holds `len * to_rate / from_rate` samples, rounded to nearest.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = fft_resampler(from_rate, to_rate)?;
    let delay = resampler.output_delay();
    let expected = ((samples.len() as u64 * to_rate as u64 + from_rate as u64 / 2)
        / from_rate as u64) as usize;

    let mut output = Vec::with_capacity(delay + expected + CHUNK_SIZE);
    let mut rest = samples;

    while rest.len() >= resampler.input_frames_next() {
        let (chunk, tail) = rest.split_at(resampler.input_frames_next());
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| anyhow!("Resample failed: {}", e))?;
        output.extend_from_slice(&result[0]);
        rest = tail;
    }

    if !rest.is_empty() {
        let tail: [&[f32]; 1] = [rest];
        let result = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(|e| anyhow!("Resample failed: {}", e))?;
        output.extend_from_slice(&result[0]);
    }

    // Flush the tail still sitting in the filter
    while output.len() < delay + expected {
        let result = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| anyhow!("Resample failed: {}", e))?;
        output.extend_from_slice(&result[0]);
    }

    output.truncate(delay + expected);
    output.drain(..delay);
    Ok(output)
}

/// Resampler for an unbounded mono stream arriving in arbitrary blocks
///
/// Input is buffered until a full chunk is available, so output lags the
/// input by at most one chunk.
pub struct StreamResampler {
    resampler: FftFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    pending: Vec<f32>,
    skip: usize,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        let resampler = fft_resampler(input_rate, output_rate)?;
        let skip = resampler.output_delay();

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
            skip,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Feed samples and collect whatever output is ready
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        let mut consumed = 0;

        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }

            let chunk = &self.pending[consumed..consumed + needed];
            let result = self
                .resampler
                .process(&[chunk], None)
                .map_err(|e| anyhow!("Resample failed: {}", e))?;
            output.extend_from_slice(&result[0]);
            consumed += needed;
        }

        self.pending.drain(..consumed);

        // Leading filter delay is silence
        if self.skip > 0 {
            let skipped = self.skip.min(output.len());
            output.drain(..skipped);
            self.skip -= skipped;
        }

        Ok(output)
    }
}
