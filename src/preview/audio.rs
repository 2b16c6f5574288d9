use super::PreviewError;
use std::io::Cursor;
use symphonia::core::{
    codecs::CODEC_TYPE_NULL, formats::FormatOptions, io::MediaSourceStream,
    meta::MetadataOptions, probe::Hint,
};

/// Probe an audio container and return its duration in seconds.
///
/// Only the container header is read; no packets are decoded.
pub fn audio_duration(data: Vec<u8>, extension: Option<&str>) -> Result<f64, PreviewError> {
    let cursor = Cursor::new(data);
    let media_source = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        media_source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(PreviewError::NoTracks)?;

    let params = &track.codec_params;
    let n_frames = params.n_frames.ok_or(PreviewError::UnknownDuration)?;

    // Prefer the stream time base, fall back to the sample rate
    if let Some(time_base) = params.time_base {
        let time = time_base.calc_time(n_frames);
        return Ok(time.seconds as f64 + time.frac);
    }

    let sample_rate = params.sample_rate.ok_or(PreviewError::UnknownDuration)?;
    Ok(n_frames as f64 / sample_rate as f64)
}
